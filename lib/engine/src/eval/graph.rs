use super::EvaluationContext;
use crate::dataset::GraphScope;
use crate::error::QueryEvaluationError;
use rdf_mosaic_model::{Bindings, Multiset, NamedOrBlankNode, RowMultiset, Term};
use rustc_hash::FxHashSet;
use spargebra::algebra::GraphPattern;
use spargebra::term::NamedNodePattern;

/// Evaluates a GRAPH clause: restricts or iterates the inner pattern over
/// the named graphs selected by the specifier and reconciles the graph
/// variable on each resulting row.
pub(super) fn evaluate_graph(
    ctx: &mut EvaluationContext<'_>,
    name: &NamedNodePattern,
    inner: &GraphPattern,
    input: Multiset,
) -> Result<Multiset, QueryEvaluationError> {
    let candidates = match resolve_candidate_graphs(ctx, name, &input)? {
        Some(candidates) => candidates,
        None => return Ok(Multiset::Null),
    };

    let graph_variable = match name {
        NamedNodePattern::Variable(v) => Some(v),
        NamedNodePattern::NamedNode(_) => None,
    };

    let mut seen = FxHashSet::default();
    let mut accumulated = RowMultiset::new();
    for graph in candidates {
        if !seen.insert(graph.clone()) {
            continue;
        }
        if ctx.budget_exhausted()? {
            break;
        }

        // Always evaluate the inner pattern against the original input, with
        // the candidate as the single active graph. The scope is restored on
        // every exit path.
        let result = ctx.with_graph_scope(GraphScope::Graph(graph.clone()), |ctx| {
            ctx.evaluate(inner, input.clone())
        })?;
        let graph_term = match graph {
            NamedOrBlankNode::NamedNode(n) => Term::from(n),
            NamedOrBlankNode::BlankNode(b) => Term::from(b),
        };

        match result {
            // Contributes nothing.
            Multiset::Null => {}
            // Contributes exactly one row: the graph binding if the
            // specifier is a variable, an empty row otherwise.
            Multiset::Identity => {
                let mut row = Bindings::new();
                if let Some(v) = graph_variable {
                    row.bind(v.clone(), graph_term);
                }
                accumulated.add(row);
            }
            Multiset::Rows(mut rows) => {
                if let Some(v) = graph_variable {
                    // Bind the graph variable where it is still unbound and
                    // drop rows bound to a different graph.
                    rows.add_variable(v.clone());
                    rows.retain_rows_mut(|row| match row.get(v) {
                        None => {
                            row.bind(v.clone(), graph_term.clone());
                            true
                        }
                        Some(bound) => *bound == graph_term,
                    });
                }
                accumulated.union(rows);
            }
            Multiset::Groups(_) => {
                return Err(QueryEvaluationError::internal(
                    "a GRAPH clause produced a group multiset",
                ))
            }
        }
    }

    Ok(Multiset::Rows(accumulated).nulled_if_empty())
}

/// The graphs a GRAPH clause ranges over, or `None` when the clause is
/// statically empty.
fn resolve_candidate_graphs(
    ctx: &mut EvaluationContext<'_>,
    name: &NamedNodePattern,
    input: &Multiset,
) -> Result<Option<Vec<NamedOrBlankNode>>, QueryEvaluationError> {
    match name {
        NamedNodePattern::NamedNode(graph) => {
            if !ctx.dataset().has_graph(graph.as_ref().into())? {
                return Ok(None);
            }
            // With FROM NAMED present, a fixed specifier must be one of the
            // declared named graphs.
            if let Some(named) = ctx.declared_named_graphs() {
                if !named.contains(graph) {
                    return Ok(None);
                }
            }
            Ok(Some(vec![graph.clone().into()]))
        }
        NamedNodePattern::Variable(v) => {
            if input.contains_variable(v) && input.is_bound_in_all_rows(v) {
                // Already bound everywhere: a pure filter over those values.
                let mut graphs = Vec::new();
                if let Multiset::Rows(rows) = input {
                    for row in rows.iter() {
                        match row.get(v) {
                            Some(Term::NamedNode(n)) => {
                                graphs.push(NamedOrBlankNode::from(n.clone()));
                            }
                            Some(Term::BlankNode(b)) => {
                                graphs.push(NamedOrBlankNode::from(b.clone()));
                            }
                            _ => {}
                        }
                    }
                }
                Ok(Some(graphs))
            } else if let Some(named) = ctx.declared_named_graphs() {
                Ok(Some(named.iter().cloned().map(Into::into).collect()))
            } else if !ctx.declared_default_graphs().is_empty() {
                // The declared dataset contains no named graph at all, so
                // there is nothing a GRAPH clause could range over.
                Ok(None)
            } else {
                Ok(Some(ctx.dataset().graph_names()?))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::QueryOptions;
    use super::*;
    use crate::dataset::MemoryDataset;
    use rdf_mosaic_model::{NamedNode, Triple, Variable};
    use spargebra::algebra::QueryDataset;
    use spargebra::term::{TermPattern, TriplePattern};

    fn iri(value: &str) -> NamedNode {
        NamedNode::new_unchecked(value)
    }

    fn var(name: &str) -> Variable {
        Variable::new_unchecked(name)
    }

    fn accept_all() -> GraphPattern {
        GraphPattern::Bgp {
            patterns: vec![TriplePattern {
                subject: TermPattern::Variable(var("s")),
                predicate: NamedNodePattern::Variable(var("p")),
                object: TermPattern::Variable(var("o")),
            }],
        }
    }

    fn sample() -> MemoryDataset {
        let mut dataset = MemoryDataset::new();
        for graph in ["http://x/g1", "http://x/g2", "http://x/g3"] {
            dataset.insert_in(
                iri(graph),
                Triple::new(iri("http://x/a"), iri("http://x/p"), iri("http://x/b")),
            );
        }
        dataset
    }

    fn named_graph_spec(graphs: &[&str]) -> QueryDataset {
        QueryDataset {
            default: Vec::new(),
            named: Some(graphs.iter().map(|g| iri(g)).collect()),
        }
    }

    #[test]
    fn fixed_graph_outside_from_named_is_null() {
        let dataset = sample();
        let spec = named_graph_spec(&["http://x/g1", "http://x/g2"]);
        let mut ctx = EvaluationContext::new(&dataset, Some(&spec), QueryOptions::default());

        let result = evaluate_graph(
            &mut ctx,
            &NamedNodePattern::NamedNode(iri("http://x/g3")),
            &accept_all(),
            Multiset::Identity,
        )
        .unwrap();
        assert!(matches!(result, Multiset::Null));
    }

    #[test]
    fn fixed_graph_missing_from_dataset_is_null() {
        let dataset = sample();
        let mut ctx = EvaluationContext::new(&dataset, None, QueryOptions::default());

        let result = evaluate_graph(
            &mut ctx,
            &NamedNodePattern::NamedNode(iri("http://x/nowhere")),
            &accept_all(),
            Multiset::Identity,
        )
        .unwrap();
        assert!(matches!(result, Multiset::Null));
    }

    #[test]
    fn unbound_variable_ranges_over_all_graphs() {
        let dataset = sample();
        let mut ctx = EvaluationContext::new(&dataset, None, QueryOptions::default());

        let result = evaluate_graph(
            &mut ctx,
            &NamedNodePattern::Variable(var("g")),
            &accept_all(),
            Multiset::Identity,
        )
        .unwrap();
        // One accept-all match per graph, with ?g bound per row.
        assert_eq!(result.len(), 3);
        let rows = result.into_rows().unwrap().into_row_vec();
        assert!(rows.iter().all(|r| r.contains(&var("g"))));
    }

    #[test]
    fn unbound_variable_with_default_graphs_only_is_null() {
        let dataset = sample();
        let spec = QueryDataset {
            default: vec![iri("http://x/g1")],
            named: None,
        };
        let mut ctx = EvaluationContext::new(&dataset, Some(&spec), QueryOptions::default());

        let result = evaluate_graph(
            &mut ctx,
            &NamedNodePattern::Variable(var("g")),
            &accept_all(),
            Multiset::Identity,
        )
        .unwrap();
        assert!(matches!(result, Multiset::Null));
    }

    #[test]
    fn bound_variable_filters_to_those_graphs() {
        let dataset = sample();
        let mut ctx = EvaluationContext::new(&dataset, None, QueryOptions::default());

        let mut rows = RowMultiset::new();
        rows.add(
            [(var("g"), Term::from(iri("http://x/g2")))]
                .into_iter()
                .collect(),
        );
        let result = evaluate_graph(
            &mut ctx,
            &NamedNodePattern::Variable(var("g")),
            &accept_all(),
            Multiset::Rows(rows),
        )
        .unwrap();
        assert_eq!(result.len(), 1);
        let rows = result.into_rows().unwrap().into_row_vec();
        assert_eq!(rows[0].get(&var("g")), Some(&iri("http://x/g2").into()));
    }
}
