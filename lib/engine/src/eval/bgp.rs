use super::EvaluationContext;
use crate::error::QueryEvaluationError;
use rdf_mosaic_model::{Bindings, Multiset, NamedNode, RowMultiset, Term, Triple, Variable};
use spargebra::term::{BlankNode, NamedNodePattern, TermPattern, TriplePattern};

/// Evaluates a basic graph pattern by extending the input rows through each
/// triple pattern in turn against the active graph scope.
pub(super) fn evaluate_bgp(
    ctx: &mut EvaluationContext<'_>,
    patterns: &[TriplePattern],
    input: Multiset,
) -> Result<Multiset, QueryEvaluationError> {
    if matches!(input, Multiset::Null) {
        return Ok(Multiset::Null);
    }
    if patterns.is_empty() {
        return Ok(input);
    }

    let scope = ctx.active_scope();
    let mut rows = input.into_rows()?.into_row_vec();
    for pattern in patterns {
        if ctx.budget_exhausted()? {
            // Rows matched against a prefix of the patterns are not
            // solutions, so a timed-out scan keeps nothing.
            rows.clear();
            break;
        }
        let mut extended = Vec::new();
        for row in &rows {
            let subject = resolve_term_pattern(&pattern.subject, row);
            let object = resolve_term_pattern(&pattern.object, row);
            let predicate = match resolve_predicate_pattern(&pattern.predicate, row) {
                Ok(predicate) => predicate,
                // The predicate position is bound to something that is not
                // an IRI, so this row cannot match any triple.
                Err(RowCannotMatch) => continue,
            };

            let triples = ctx.dataset().triples_matching(
                &scope,
                subject.as_ref(),
                predicate.as_ref(),
                object.as_ref(),
            )?;
            for triple in triples {
                if let Some(new_row) = extend_row(row, pattern, &triple) {
                    extended.push(new_row);
                }
            }
        }
        rows = extended;
        if rows.is_empty() {
            break;
        }
    }

    Ok(Multiset::from(rows.into_iter().collect::<RowMultiset>()).nulled_if_empty())
}

/// Internal variable standing in for a blank node of the pattern. Blank
/// nodes behave as variables that no projection can observe.
pub(super) fn blank_node_variable(node: &BlankNode) -> Variable {
    Variable::new_unchecked(format!("__bnode_{}", node.as_str()))
}

/// The concrete term a pattern position requires given the current row, or
/// `None` when the position is an unbound variable and matches anything.
pub(super) fn resolve_term_pattern(pattern: &TermPattern, row: &Bindings) -> Option<Term> {
    match pattern {
        TermPattern::NamedNode(n) => Some(n.clone().into()),
        TermPattern::Literal(l) => Some(l.clone().into()),
        TermPattern::Variable(v) => row.get(v).cloned(),
        TermPattern::BlankNode(b) => row.get(&blank_node_variable(b)).cloned(),
    }
}

pub(super) struct RowCannotMatch;

fn resolve_predicate_pattern(
    pattern: &NamedNodePattern,
    row: &Bindings,
) -> Result<Option<NamedNode>, RowCannotMatch> {
    match pattern {
        NamedNodePattern::NamedNode(n) => Ok(Some(n.clone())),
        NamedNodePattern::Variable(v) => match row.get(v) {
            Some(Term::NamedNode(n)) => Ok(Some(n.clone())),
            Some(_) => Err(RowCannotMatch),
            None => Ok(None),
        },
    }
}

/// Extends `row` with the bindings a matched triple implies, or returns
/// `None` when a variable repeated within the pattern disagrees.
fn extend_row(row: &Bindings, pattern: &TriplePattern, triple: &Triple) -> Option<Bindings> {
    let mut extended = row.clone();
    if !bind_term_pattern(
        &mut extended,
        &pattern.subject,
        triple.subject.clone().into(),
    ) {
        return None;
    }
    if let NamedNodePattern::Variable(v) = &pattern.predicate {
        if !try_bind(&mut extended, v, triple.predicate.clone().into()) {
            return None;
        }
    }
    if !bind_term_pattern(&mut extended, &pattern.object, triple.object.clone()) {
        return None;
    }
    Some(extended)
}

pub(super) fn bind_term_pattern(row: &mut Bindings, pattern: &TermPattern, term: Term) -> bool {
    match pattern {
        TermPattern::Variable(v) => try_bind(row, v, term),
        TermPattern::BlankNode(b) => try_bind(row, &blank_node_variable(b), term),
        TermPattern::NamedNode(_) | TermPattern::Literal(_) => true,
    }
}

fn try_bind(row: &mut Bindings, variable: &Variable, term: Term) -> bool {
    match row.get(variable) {
        Some(existing) => *existing == term,
        None => {
            row.bind(variable.clone(), term);
            true
        }
    }
}
