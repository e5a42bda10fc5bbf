use super::EvaluationContext;
use crate::dataset::Dataset;
use crate::error::QueryEvaluationError;
use crate::results::{QueryResults, QuerySolutions};
use log::{debug, warn};
use rdf_mosaic_model::{Bindings, BlankNode, Multiset, NamedNode, Subject, Term, Triple};
use rustc_hash::{FxHashMap, FxHashSet};
use spargebra::term::{NamedNodePattern, TermPattern, TriplePattern};
use spargebra::Query;
use std::time::Duration;

/// Evaluation options of a single query.
#[derive(Debug, Clone, Default)]
pub struct QueryOptions {
    /// Hard deadline for the whole evaluation, checked at operator
    /// boundaries.
    pub timeout: Option<Duration>,
    /// When the deadline elapses inside an accumulation loop, keep the rows
    /// found so far instead of failing the query.
    pub partial_results_on_timeout: bool,
}

/// Evaluates a parsed query against a dataset.
///
/// `SELECT` produces solutions, `ASK` a boolean and `CONSTRUCT` the
/// instantiated template triples. `DESCRIBE` needs a describe algorithm
/// outside of this engine and is reported as unsupported.
pub fn evaluate_query(
    dataset: &dyn Dataset,
    query: &Query,
    options: QueryOptions,
) -> Result<QueryResults, QueryEvaluationError> {
    match query {
        Query::Select {
            dataset: declared,
            pattern,
            ..
        } => {
            debug!("evaluating SELECT query");
            let mut ctx = EvaluationContext::new(dataset, declared.as_ref(), options);
            let result = ctx.evaluate(pattern, Multiset::Identity)?;
            warn_on_partial(&ctx);

            let mut variables = Vec::new();
            pattern.on_in_scope_variable(|v| {
                if !variables.contains(v) {
                    variables.push(v.clone());
                }
            });
            let rows = result.into_rows()?.into_row_vec();
            Ok(QueryResults::Solutions(QuerySolutions::new(
                variables, rows,
            )))
        }
        Query::Ask {
            dataset: declared,
            pattern,
            ..
        } => {
            debug!("evaluating ASK query");
            let mut ctx = EvaluationContext::new(dataset, declared.as_ref(), options);
            let result = ctx.evaluate(pattern, Multiset::Identity)?;
            warn_on_partial(&ctx);
            Ok(QueryResults::Boolean(!result.is_empty()))
        }
        Query::Construct {
            template,
            dataset: declared,
            pattern,
            ..
        } => {
            debug!("evaluating CONSTRUCT query");
            let mut ctx = EvaluationContext::new(dataset, declared.as_ref(), options);
            let result = ctx.evaluate(pattern, Multiset::Identity)?;
            warn_on_partial(&ctx);

            let mut seen = FxHashSet::default();
            let mut triples = Vec::new();
            for row in result.into_rows()?.into_row_vec() {
                for triple in instantiate_template(template, &row) {
                    if seen.insert(triple.clone()) {
                        triples.push(triple);
                    }
                }
            }
            Ok(QueryResults::Graph(triples))
        }
        Query::Describe { .. } => Err(QueryEvaluationError::UnsupportedDescribe),
    }
}

fn warn_on_partial(ctx: &EvaluationContext<'_>) {
    if ctx.finished_partially() {
        warn!("evaluation deadline elapsed, returning partial results");
    }
}

/// Instantiates a CONSTRUCT template for one solution. Template blank nodes
/// are freshened per solution; entries that would produce an invalid triple
/// (unbound variable, literal subject, non-IRI predicate) are skipped.
fn instantiate_template(template: &[TriplePattern], row: &Bindings) -> Vec<Triple> {
    let mut blanks = FxHashMap::default();
    template
        .iter()
        .filter_map(|pattern| {
            let subject = subject_for(&pattern.subject, row, &mut blanks)?;
            let predicate = predicate_for(&pattern.predicate, row)?;
            let object = object_for(&pattern.object, row, &mut blanks)?;
            Some(Triple::new(subject, predicate, object))
        })
        .collect()
}

fn fresh_blank(blanks: &mut FxHashMap<String, BlankNode>, id: &str) -> BlankNode {
    blanks
        .entry(id.to_owned())
        .or_insert_with(BlankNode::default)
        .clone()
}

fn subject_for(
    pattern: &TermPattern,
    row: &Bindings,
    blanks: &mut FxHashMap<String, BlankNode>,
) -> Option<Subject> {
    match pattern {
        TermPattern::NamedNode(n) => Some(n.clone().into()),
        TermPattern::BlankNode(b) => Some(fresh_blank(blanks, b.as_str()).into()),
        TermPattern::Variable(v) => match row.get(v) {
            Some(Term::NamedNode(n)) => Some(n.clone().into()),
            Some(Term::BlankNode(b)) => Some(b.clone().into()),
            _ => None,
        },
        TermPattern::Literal(_) => None,
    }
}

fn predicate_for(pattern: &NamedNodePattern, row: &Bindings) -> Option<NamedNode> {
    match pattern {
        NamedNodePattern::NamedNode(n) => Some(n.clone()),
        NamedNodePattern::Variable(v) => match row.get(v) {
            Some(Term::NamedNode(n)) => Some(n.clone()),
            _ => None,
        },
    }
}

fn object_for(
    pattern: &TermPattern,
    row: &Bindings,
    blanks: &mut FxHashMap<String, BlankNode>,
) -> Option<Term> {
    match pattern {
        TermPattern::NamedNode(n) => Some(n.clone().into()),
        TermPattern::Literal(l) => Some(l.clone().into()),
        TermPattern::BlankNode(b) => Some(fresh_blank(blanks, b.as_str()).into()),
        TermPattern::Variable(v) => row.get(v).cloned(),
    }
}
