mod bgp;
mod expression;
mod graph;
mod group;
mod modifiers;
mod operators;
mod path;
mod query;

pub use query::{evaluate_query, QueryOptions};

use crate::dataset::{Dataset, GraphScope};
use crate::error::QueryEvaluationError;
use rdf_mosaic_model::{Multiset, NamedNode, Variable};
use spargebra::algebra::{GraphPattern, QueryDataset};
use std::time::Instant;

/// Carries everything a single query evaluation needs: the dataset handle,
/// the dataset description declared by the query (`FROM` / `FROM NAMED`), the
/// evaluation options and the current graph-scope stack.
///
/// [`evaluate`](Self::evaluate) is the single entry point operators use to
/// recursively evaluate sub-algebra; it feeds each node its input multiset
/// and returns the node's output, so no operator re-derives that contract.
///
/// Evaluation is strictly single-threaded call/return recursion. The scope
/// stack makes nested GRAPH evaluations safe: a scope pushed for a
/// sub-evaluation is popped on every exit path, including errors.
pub struct EvaluationContext<'a> {
    dataset: &'a dyn Dataset,
    default_graphs: Vec<NamedNode>,
    named_graphs: Option<Vec<NamedNode>>,
    options: QueryOptions,
    scopes: Vec<GraphScope>,
    started: Instant,
    partial: bool,
    fresh_variables: u64,
}

impl<'a> EvaluationContext<'a> {
    pub fn new(
        dataset: &'a dyn Dataset,
        query_dataset: Option<&QueryDataset>,
        options: QueryOptions,
    ) -> Self {
        let default_graphs = query_dataset
            .map(|d| d.default.clone())
            .unwrap_or_default();
        let named_graphs = query_dataset.and_then(|d| d.named.clone());

        // FROM clauses replace the dataset's own default graph by the union
        // of the named graphs they list.
        let base_scope = if default_graphs.is_empty() {
            GraphScope::DefaultGraph
        } else {
            GraphScope::NamedGraphs(default_graphs.iter().cloned().map(Into::into).collect())
        };

        Self {
            dataset,
            default_graphs,
            named_graphs,
            options,
            scopes: vec![base_scope],
            started: Instant::now(),
            partial: false,
            fresh_variables: 0,
        }
    }

    /// Evaluates an algebra node against the given input multiset.
    pub fn evaluate(
        &mut self,
        pattern: &GraphPattern,
        input: Multiset,
    ) -> Result<Multiset, QueryEvaluationError> {
        self.check_deadline()?;
        match pattern {
            GraphPattern::Bgp { patterns } => bgp::evaluate_bgp(self, patterns, input),
            GraphPattern::Path {
                subject,
                path,
                object,
            } => path::evaluate_path(self, subject, path, object, input),
            GraphPattern::Join { left, right } => {
                let left = self.evaluate(left, input)?;
                if matches!(left, Multiset::Null) {
                    return Ok(Multiset::Null);
                }
                // The right side sees the left result as its input so that
                // operators sensitive to bound variables (paths, GRAPH ?g)
                // can restrict themselves to it.
                let right = self.evaluate(right, left.clone())?;
                Ok(left.join(right)?)
            }
            GraphPattern::LeftJoin {
                left,
                right,
                expression,
            } => operators::evaluate_left_join(self, left, right, expression.as_ref(), input),
            GraphPattern::Filter { expr, inner } => {
                operators::evaluate_filter(self, expr, inner, input)
            }
            GraphPattern::Union { left, right } => {
                let left = self.evaluate(left, input.clone())?;
                let right = self.evaluate(right, input)?;
                Ok(left.union(right)?)
            }
            GraphPattern::Graph { name, inner } => graph::evaluate_graph(self, name, inner, input),
            GraphPattern::Extend {
                inner,
                variable,
                expression,
            } => operators::evaluate_extend(self, inner, variable, expression, input),
            GraphPattern::Minus { left, right } => {
                let left = self.evaluate(left, input.clone())?;
                // MINUS evaluates its right side independently of the left
                // bindings.
                let right = self.evaluate(right, input)?;
                Ok(left.minus(right)?)
            }
            GraphPattern::Values {
                variables,
                bindings,
            } => operators::evaluate_values(variables, bindings, input),
            GraphPattern::OrderBy { inner, expression } => {
                modifiers::evaluate_order_by(self, inner, expression, input)
            }
            GraphPattern::Project { inner, variables } => {
                modifiers::evaluate_project(self, inner, variables, input)
            }
            GraphPattern::Distinct { inner } => modifiers::evaluate_distinct(self, inner, input),
            GraphPattern::Reduced { inner } => modifiers::evaluate_reduced(self, inner, input),
            GraphPattern::Slice {
                inner,
                start,
                length,
            } => modifiers::evaluate_slice(self, inner, *start, *length, input),
            GraphPattern::Group {
                inner,
                variables,
                aggregates,
            } => group::evaluate_group(self, inner, variables, aggregates, input),
            GraphPattern::Service { .. } => Err(QueryEvaluationError::UnsupportedService),
        }
    }

    pub(crate) fn dataset(&self) -> &'a dyn Dataset {
        self.dataset
    }

    /// The graph scope lookups currently run against.
    pub(crate) fn active_scope(&self) -> GraphScope {
        self.scopes
            .last()
            .cloned()
            .unwrap_or(GraphScope::DefaultGraph)
    }

    /// Runs `body` with `scope` as the active graph selection and restores
    /// the previous selection afterwards, also when `body` fails.
    pub(crate) fn with_graph_scope<T>(
        &mut self,
        scope: GraphScope,
        body: impl FnOnce(&mut Self) -> Result<T, QueryEvaluationError>,
    ) -> Result<T, QueryEvaluationError> {
        self.scopes.push(scope);
        let result = body(self);
        self.scopes.pop();
        result
    }

    /// The graph names declared by `FROM NAMED`, or `None` when the query
    /// declares none.
    pub(crate) fn declared_named_graphs(&self) -> Option<&[NamedNode]> {
        self.named_graphs.as_deref().filter(|n| !n.is_empty())
    }

    /// The graph names declared by `FROM`.
    pub(crate) fn declared_default_graphs(&self) -> &[NamedNode] {
        &self.default_graphs
    }

    fn deadline_elapsed(&self) -> bool {
        matches!(self.options.timeout, Some(timeout) if self.started.elapsed() > timeout)
    }

    /// Fails with a timeout error once the configured deadline elapsed,
    /// unless partial results are allowed — then the accumulation loops stop
    /// early instead (see [`budget_exhausted`](Self::budget_exhausted)).
    pub(crate) fn check_deadline(&self) -> Result<(), QueryEvaluationError> {
        match self.options.timeout {
            Some(timeout)
                if self.started.elapsed() > timeout
                    && !self.options.partial_results_on_timeout =>
            {
                Err(QueryEvaluationError::Timeout(timeout))
            }
            _ => Ok(()),
        }
    }

    /// Deadline check for accumulation loops. Returns `Ok(true)` when the
    /// loop should stop early and keep the rows it found so far (partial
    /// results are allowed), fails when the timeout is a hard abort, and
    /// returns `Ok(false)` while the budget lasts.
    pub(crate) fn budget_exhausted(&mut self) -> Result<bool, QueryEvaluationError> {
        if !self.deadline_elapsed() {
            return Ok(false);
        }
        if self.options.partial_results_on_timeout {
            self.partial = true;
            Ok(true)
        } else {
            self.check_deadline().map(|()| false)
        }
    }

    /// Whether some accumulation loop stopped early because of the timeout.
    pub fn finished_partially(&self) -> bool {
        self.partial
    }

    /// A fresh internal variable for rewriting path sequences into joins.
    /// The binding is stripped again before the rewritten pattern's result
    /// leaves the path operator.
    pub(crate) fn fresh_variable(&mut self) -> Variable {
        let n = self.fresh_variables;
        self.fresh_variables += 1;
        Variable::new_unchecked(format!("__seq_{n}"))
    }
}
