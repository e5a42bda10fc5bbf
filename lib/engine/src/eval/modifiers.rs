use super::expression::{numeric_cmp, numeric_literal};
use super::operators::evaluated_term;
use super::EvaluationContext;
use crate::error::QueryEvaluationError;
use rdf_mosaic_model::{Multiset, RowMultiset, Term, Variable};
use rustc_hash::FxHashSet;
use spargebra::algebra::{GraphPattern, OrderExpression};
use std::cmp::Ordering;

/// SELECT projection: restricts every row to the projected variables. The
/// projected shape is declared even for variables no row binds.
pub(super) fn evaluate_project(
    ctx: &mut EvaluationContext<'_>,
    inner: &GraphPattern,
    variables: &[Variable],
    input: Multiset,
) -> Result<Multiset, QueryEvaluationError> {
    let inner = ctx.evaluate(inner, input)?;
    Ok(match inner {
        Multiset::Null => Multiset::Null,
        Multiset::Identity => Multiset::Identity,
        Multiset::Rows(rows) => {
            let mut result = RowMultiset::with_variables(variables.to_vec());
            for row in rows.into_row_vec() {
                result.add(row.projected(variables));
            }
            Multiset::Rows(result)
        }
        Multiset::Groups(_) => {
            return Err(QueryEvaluationError::internal(
                "a projection received a group multiset",
            ))
        }
    })
}

/// DISTINCT: full-row deduplication, keeping the first occurrence.
pub(super) fn evaluate_distinct(
    ctx: &mut EvaluationContext<'_>,
    inner: &GraphPattern,
    input: Multiset,
) -> Result<Multiset, QueryEvaluationError> {
    let inner = ctx.evaluate(inner, input)?;
    Ok(match inner {
        Multiset::Rows(rows) => {
            let mut seen = FxHashSet::default();
            let mut result = RowMultiset::with_variables(rows.variables().to_vec());
            for row in rows.into_row_vec() {
                if seen.insert(row.clone()) {
                    result.add(row);
                }
            }
            Multiset::Rows(result)
        }
        other => other,
    })
}

/// REDUCED: the weaker guarantee, removing adjacent duplicates only.
pub(super) fn evaluate_reduced(
    ctx: &mut EvaluationContext<'_>,
    inner: &GraphPattern,
    input: Multiset,
) -> Result<Multiset, QueryEvaluationError> {
    let inner = ctx.evaluate(inner, input)?;
    Ok(match inner {
        Multiset::Rows(rows) => {
            let mut result = RowMultiset::with_variables(rows.variables().to_vec());
            let mut rows = rows.into_row_vec();
            rows.dedup();
            for row in rows {
                result.add(row);
            }
            Multiset::Rows(result)
        }
        other => other,
    })
}

/// OFFSET / LIMIT applied by output row position; a missing length is
/// unlimited.
pub(super) fn evaluate_slice(
    ctx: &mut EvaluationContext<'_>,
    inner: &GraphPattern,
    start: usize,
    length: Option<usize>,
    input: Multiset,
) -> Result<Multiset, QueryEvaluationError> {
    let inner = ctx.evaluate(inner, input)?;
    if matches!(inner, Multiset::Null) {
        return Ok(Multiset::Null);
    }
    let rows = inner.into_rows()?;
    let mut result = RowMultiset::with_variables(rows.variables().to_vec());
    let taken = rows
        .into_row_vec()
        .into_iter()
        .skip(start)
        .take(length.unwrap_or(usize::MAX));
    for row in taken {
        result.add(row);
    }
    Ok(Multiset::Rows(result))
}

/// ORDER BY: a stable sort over the comparator chain derived from the order
/// expressions.
pub(super) fn evaluate_order_by(
    ctx: &mut EvaluationContext<'_>,
    inner: &GraphPattern,
    expressions: &[OrderExpression],
    input: Multiset,
) -> Result<Multiset, QueryEvaluationError> {
    let inner = ctx.evaluate(inner, input)?;
    let rows = match inner {
        Multiset::Rows(rows) => rows,
        other => return Ok(other),
    };

    let variables = rows.variables().to_vec();
    let rows = rows.into_row_vec();

    // Evaluate all sort keys up front; expression errors order like unbound.
    let mut keyed = Vec::with_capacity(rows.len());
    for row in rows {
        let mut keys = Vec::with_capacity(expressions.len());
        for expression in expressions {
            let inner_expression = match expression {
                OrderExpression::Asc(e) | OrderExpression::Desc(e) => e,
            };
            keys.push(evaluated_term(ctx, inner_expression, &row)?);
        }
        keyed.push((keys, row));
    }

    keyed.sort_by(|(a, _), (b, _)| {
        for (i, expression) in expressions.iter().enumerate() {
            let ordering = compare_for_ordering(a[i].as_ref(), b[i].as_ref());
            let ordering = match expression {
                OrderExpression::Asc(_) => ordering,
                OrderExpression::Desc(_) => ordering.reverse(),
            };
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        Ordering::Equal
    });

    let mut result = RowMultiset::with_variables(variables);
    for (_, row) in keyed {
        result.add(row);
    }
    Ok(Multiset::Rows(result))
}

/// The total order ORDER BY sorts by: unbound before blank nodes before
/// IRIs before literals; literals compare by value where the value space is
/// understood and fall back to a lexical order otherwise, so the sort is
/// always total.
pub(super) fn compare_for_ordering(a: Option<&Term>, b: Option<&Term>) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(a), Some(b)) => match (a, b) {
            (Term::BlankNode(x), Term::BlankNode(y)) => x.as_str().cmp(y.as_str()),
            (Term::BlankNode(_), _) => Ordering::Less,
            (_, Term::BlankNode(_)) => Ordering::Greater,
            (Term::NamedNode(x), Term::NamedNode(y)) => x.as_str().cmp(y.as_str()),
            (Term::NamedNode(_), _) => Ordering::Less,
            (_, Term::NamedNode(_)) => Ordering::Greater,
            (Term::Literal(x), Term::Literal(y)) => {
                if let (Some(n), Some(m)) = (numeric_literal(x), numeric_literal(y)) {
                    if let Some(ordering) = numeric_cmp(n, m) {
                        return ordering;
                    }
                }
                (x.datatype().as_str(), x.value(), x.language())
                    .cmp(&(y.datatype().as_str(), y.value(), y.language()))
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::super::QueryOptions;
    use super::*;
    use crate::dataset::MemoryDataset;
    use rdf_mosaic_model::{Literal, NamedNode};
    use spargebra::algebra::Expression;
    use spargebra::term::GroundTerm;

    fn var(name: &str) -> Variable {
        Variable::new_unchecked(name)
    }

    fn n(i: i64) -> Option<GroundTerm> {
        Some(GroundTerm::Literal(Literal::from(i)))
    }

    fn values(rows: Vec<Vec<Option<GroundTerm>>>) -> GraphPattern {
        GraphPattern::Values {
            variables: vec![var("v")],
            bindings: rows,
        }
    }

    #[test]
    fn distinct_is_idempotent() {
        let dataset = MemoryDataset::new();
        let mut ctx = EvaluationContext::new(&dataset, None, QueryOptions::default());
        let pattern = values(vec![vec![n(1)], vec![n(1)], vec![n(1)]]);

        let once = evaluate_distinct(&mut ctx, &pattern, Multiset::Identity).unwrap();
        assert_eq!(once.len(), 1);

        let distinct_node = GraphPattern::Distinct {
            inner: Box::new(pattern),
        };
        let twice = evaluate_distinct(&mut ctx, &distinct_node, Multiset::Identity).unwrap();
        assert_eq!(twice.len(), 1);
    }

    #[test]
    fn reduced_removes_adjacent_duplicates_only() {
        let dataset = MemoryDataset::new();
        let mut ctx = EvaluationContext::new(&dataset, None, QueryOptions::default());
        let pattern = values(vec![vec![n(1)], vec![n(1)], vec![n(2)], vec![n(1)]]);

        let result = evaluate_reduced(&mut ctx, &pattern, Multiset::Identity).unwrap();
        assert_eq!(result.len(), 3);
    }

    #[test]
    fn slice_applies_offset_then_limit() {
        let dataset = MemoryDataset::new();
        let mut ctx = EvaluationContext::new(&dataset, None, QueryOptions::default());
        let pattern = values(vec![vec![n(1)], vec![n(2)], vec![n(3)], vec![n(4)]]);

        let result =
            evaluate_slice(&mut ctx, &pattern, 1, Some(2), Multiset::Identity).unwrap();
        let rows = result.into_rows().unwrap().into_row_vec();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].get(&var("v")), Some(&Literal::from(2).into()));

        let unlimited = evaluate_slice(
            &mut ctx,
            &values(vec![vec![n(1)], vec![n(2)]]),
            0,
            None,
            Multiset::Identity,
        )
        .unwrap();
        assert_eq!(unlimited.len(), 2);
    }

    #[test]
    fn order_by_sorts_unbound_first_and_is_stable() {
        let dataset = MemoryDataset::new();
        let mut ctx = EvaluationContext::new(&dataset, None, QueryOptions::default());
        let pattern = values(vec![vec![n(3)], vec![None], vec![n(1)]]);

        let result = evaluate_order_by(
            &mut ctx,
            &pattern,
            &[OrderExpression::Asc(Expression::Variable(var("v")))],
            Multiset::Identity,
        )
        .unwrap();
        let rows = result.into_rows().unwrap().into_row_vec();
        assert!(!rows[0].contains(&var("v")));
        assert_eq!(rows[1].get(&var("v")), Some(&Literal::from(1).into()));
        assert_eq!(rows[2].get(&var("v")), Some(&Literal::from(3).into()));
    }

    #[test]
    fn order_by_desc_reverses() {
        let dataset = MemoryDataset::new();
        let mut ctx = EvaluationContext::new(&dataset, None, QueryOptions::default());
        let pattern = values(vec![vec![n(1)], vec![n(3)]]);

        let result = evaluate_order_by(
            &mut ctx,
            &pattern,
            &[OrderExpression::Desc(Expression::Variable(var("v")))],
            Multiset::Identity,
        )
        .unwrap();
        let rows = result.into_rows().unwrap().into_row_vec();
        assert_eq!(rows[0].get(&var("v")), Some(&Literal::from(3).into()));
    }

    #[test]
    fn projection_declares_missing_variables() {
        let dataset = MemoryDataset::new();
        let mut ctx = EvaluationContext::new(&dataset, None, QueryOptions::default());
        let pattern = values(vec![vec![n(1)]]);

        let result = evaluate_project(
            &mut ctx,
            &pattern,
            &[var("v"), var("w")],
            Multiset::Identity,
        )
        .unwrap();
        let Multiset::Rows(rows) = result else {
            panic!("expected rows")
        };
        assert!(rows.contains_variable(&var("w")));
        assert_eq!(rows.len(), 1);
    }

    #[test]
    fn ordering_ranks_term_kinds() {
        let blank = Term::from(rdf_mosaic_model::BlankNode::new_unchecked("b"));
        let iri = Term::from(NamedNode::new_unchecked("http://x/a"));
        let literal = Term::from(Literal::from(1));
        assert_eq!(compare_for_ordering(None, Some(&blank)), Ordering::Less);
        assert_eq!(
            compare_for_ordering(Some(&blank), Some(&iri)),
            Ordering::Less
        );
        assert_eq!(
            compare_for_ordering(Some(&iri), Some(&literal)),
            Ordering::Less
        );
    }
}
