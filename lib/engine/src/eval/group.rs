use super::modifiers::compare_for_ordering;
use super::operators::evaluated_term;
use super::EvaluationContext;
use crate::error::QueryEvaluationError;
use itertools::Itertools;
use rdf_mosaic_model::{
    Bindings, GroupMultiset, Multiset, RowMultiset, SolutionGroup, Term, Variable,
};
use rdf_mosaic_model::vocab::xsd;
use rdf_mosaic_model::Literal;
use rustc_hash::{FxHashMap, FxHashSet};
use spargebra::algebra::{AggregateExpression, AggregateFunction, GraphPattern};

/// GROUP BY: partitions the inner rows by their group-key variable tuple and
/// binds one row per group carrying the key and the aggregate results.
///
/// Without group variables, a single implicit group holds every row (or no
/// row at all), so that aggregates over an empty input still produce one
/// solution.
pub(super) fn evaluate_group(
    ctx: &mut EvaluationContext<'_>,
    inner: &GraphPattern,
    variables: &[Variable],
    aggregates: &[(Variable, AggregateExpression)],
    input: Multiset,
) -> Result<Multiset, QueryEvaluationError> {
    let inner = ctx.evaluate(inner, input)?;
    let rows = inner.into_rows()?.into_row_vec();

    let groups = partition(rows, variables);

    let mut result = RowMultiset::with_variables(variables.to_vec());
    for (variable, _) in aggregates {
        result.add_variable(variable.clone());
    }
    for group in groups.into_groups() {
        let (key, members) = group.into_parts();
        let mut row = key;
        for (variable, aggregate) in aggregates {
            // A failing aggregate leaves its variable unbound in the group's
            // row instead of discarding the group.
            if let Some(term) = evaluate_aggregate(ctx, aggregate, &members)? {
                if !row.contains(variable) {
                    row.bind(variable.clone(), term);
                }
            }
        }
        result.add(row);
    }
    Ok(Multiset::Rows(result))
}

fn partition(rows: Vec<Bindings>, variables: &[Variable]) -> GroupMultiset {
    let mut groups = GroupMultiset::new(variables.to_vec());
    if variables.is_empty() {
        groups.push(SolutionGroup::new(Bindings::new(), rows));
        return groups;
    }

    let mut order = Vec::new();
    let mut members: FxHashMap<Bindings, Vec<Bindings>> = FxHashMap::default();
    for row in rows {
        let key = row.projected(variables);
        match members.get_mut(&key) {
            Some(group) => group.push(row),
            None => {
                members.insert(key.clone(), vec![row]);
                order.push(key);
            }
        }
    }
    for key in order {
        if let Some(rows) = members.remove(&key) {
            groups.push(SolutionGroup::new(key, rows));
        }
    }
    groups
}

/// Evaluates one aggregate over the member rows of a group. `Ok(None)` means
/// the aggregate failed for this group and its variable stays unbound.
fn evaluate_aggregate(
    ctx: &mut EvaluationContext<'_>,
    aggregate: &AggregateExpression,
    members: &[Bindings],
) -> Result<Option<Term>, QueryEvaluationError> {
    match aggregate {
        AggregateExpression::CountSolutions { distinct } => {
            let count = if *distinct {
                members.iter().collect::<FxHashSet<_>>().len()
            } else {
                members.len()
            };
            Ok(Some(integer_term(count)))
        }
        AggregateExpression::FunctionCall {
            name,
            expr,
            distinct,
        } => {
            // Rows where the expression errors contribute no value.
            let mut values = Vec::new();
            for row in members {
                if let Some(term) = evaluated_term(ctx, expr, row)? {
                    values.push(term);
                }
            }
            if *distinct {
                let mut seen = FxHashSet::default();
                values.retain(|term| seen.insert(term.clone()));
            }
            Ok(apply_aggregate_function(name, values))
        }
    }
}

fn apply_aggregate_function(name: &AggregateFunction, values: Vec<Term>) -> Option<Term> {
    match name {
        AggregateFunction::Count => Some(integer_term(values.len())),
        AggregateFunction::Sum => numeric_fold(values, NumericFold::Sum),
        AggregateFunction::Avg => numeric_fold(values, NumericFold::Avg),
        AggregateFunction::Min => values
            .into_iter()
            .min_by(|a, b| compare_for_ordering(Some(a), Some(b))),
        AggregateFunction::Max => values
            .into_iter()
            .max_by(|a, b| compare_for_ordering(Some(a), Some(b))),
        AggregateFunction::Sample => values.into_iter().next(),
        AggregateFunction::GroupConcat { separator } => {
            let separator = separator.as_deref().unwrap_or(" ");
            let joined = values
                .iter()
                .map(|term| match term {
                    Term::Literal(l) => l.value().to_owned(),
                    Term::NamedNode(n) => n.as_str().to_owned(),
                    Term::BlankNode(b) => b.as_str().to_owned(),
                })
                .join(separator);
            Some(Literal::new_simple_literal(joined).into())
        }
        AggregateFunction::Custom(_) => None,
    }
}

enum NumericFold {
    Sum,
    Avg,
}

fn numeric_fold(values: Vec<Term>, fold: NumericFold) -> Option<Term> {
    use super::expression::{numeric_literal, numeric_op, numeric_term, Numeric, NumericOp};

    if values.is_empty() {
        // SUM and AVG of the empty group are both zero.
        return Some(integer_term(0));
    }

    let count = values.len();
    let mut sum = Numeric::Integer(0.into());
    for value in &values {
        let Term::Literal(literal) = value else {
            return None;
        };
        let number = numeric_literal(literal)?;
        sum = numeric_op(NumericOp::Add, sum, number).ok()?;
    }

    match fold {
        NumericFold::Sum => Some(numeric_term(sum)),
        NumericFold::Avg => {
            let count = Numeric::Integer(i64::try_from(count).ok()?.into());
            Some(numeric_term(numeric_op(NumericOp::Divide, sum, count).ok()?))
        }
    }
}

fn integer_term(value: usize) -> Term {
    Literal::new_typed_literal(value.to_string(), xsd::INTEGER).into()
}

#[cfg(test)]
mod tests {
    use super::super::QueryOptions;
    use super::*;
    use crate::dataset::MemoryDataset;
    use spargebra::algebra::Expression;
    use spargebra::term::GroundTerm;

    fn var(name: &str) -> Variable {
        Variable::new_unchecked(name)
    }

    fn values_pattern() -> GraphPattern {
        // (?g, ?v): (a, 1), (a, 3), (b, 5)
        let g = |s: &str| {
            Some(GroundTerm::NamedNode(
                rdf_mosaic_model::NamedNode::new_unchecked(format!("http://x/{s}")),
            ))
        };
        let n = |i: i64| Some(GroundTerm::Literal(Literal::from(i)));
        GraphPattern::Values {
            variables: vec![var("g"), var("v")],
            bindings: vec![
                vec![g("a"), n(1)],
                vec![g("a"), n(3)],
                vec![g("b"), n(5)],
            ],
        }
    }

    #[test]
    fn grouping_partitions_by_key() {
        let dataset = MemoryDataset::new();
        let mut ctx = EvaluationContext::new(&dataset, None, QueryOptions::default());
        let aggregates = vec![(
            var("total"),
            AggregateExpression::FunctionCall {
                name: AggregateFunction::Sum,
                expr: Expression::Variable(var("v")),
                distinct: false,
            },
        )];

        let result = evaluate_group(
            &mut ctx,
            &values_pattern(),
            &[var("g")],
            &aggregates,
            Multiset::Identity,
        )
        .unwrap();

        let rows = result.into_rows().unwrap().into_row_vec();
        assert_eq!(rows.len(), 2);
        let a = rows
            .iter()
            .find(|r| {
                r.get(&var("g")).map(ToString::to_string)
                    == Some("<http://x/a>".to_owned())
            })
            .unwrap();
        assert_eq!(a.get(&var("total")), Some(&Literal::from(4).into()));
    }

    #[test]
    fn implicit_group_counts_all_rows() {
        let dataset = MemoryDataset::new();
        let mut ctx = EvaluationContext::new(&dataset, None, QueryOptions::default());
        let aggregates = vec![(
            var("n"),
            AggregateExpression::CountSolutions { distinct: false },
        )];

        let result = evaluate_group(
            &mut ctx,
            &values_pattern(),
            &[],
            &aggregates,
            Multiset::Identity,
        )
        .unwrap();

        let rows = result.into_rows().unwrap().into_row_vec();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get(&var("n")), Some(&Literal::from(3).into()));
    }

    #[test]
    fn implicit_group_over_nothing_still_produces_one_row() {
        let dataset = MemoryDataset::new();
        let mut ctx = EvaluationContext::new(&dataset, None, QueryOptions::default());
        let aggregates = vec![(
            var("n"),
            AggregateExpression::CountSolutions { distinct: false },
        )];
        let empty = GraphPattern::Values {
            variables: vec![var("v")],
            bindings: Vec::new(),
        };

        let result =
            evaluate_group(&mut ctx, &empty, &[], &aggregates, Multiset::Identity).unwrap();
        let rows = result.into_rows().unwrap().into_row_vec();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get(&var("n")), Some(&Literal::from(0).into()));
    }

    #[test]
    fn avg_divides_by_the_group_size() {
        let dataset = MemoryDataset::new();
        let mut ctx = EvaluationContext::new(&dataset, None, QueryOptions::default());
        let aggregates = vec![(
            var("avg"),
            AggregateExpression::FunctionCall {
                name: AggregateFunction::Avg,
                expr: Expression::Variable(var("v")),
                distinct: false,
            },
        )];

        let result = evaluate_group(
            &mut ctx,
            &values_pattern(),
            &[],
            &aggregates,
            Multiset::Identity,
        )
        .unwrap();
        let rows = result.into_rows().unwrap().into_row_vec();
        let Some(Term::Literal(avg)) = rows[0].get(&var("avg")).cloned() else {
            panic!("expected a literal average")
        };
        assert_eq!(avg.value(), "3");
    }
}
