use super::expression::{effective_boolean_value, evaluate_expression};
use super::EvaluationContext;
use crate::error::{ExpressionError, QueryEvaluationError};
use rdf_mosaic_model::{Bindings, Multiset, RowMultiset, Term, Variable};
use spargebra::algebra::{Expression, GraphPattern};
use spargebra::term::GroundTerm;

/// Evaluates an expression for one row, separating recoverable per-row
/// errors (`Ok(None)`) from fatal evaluation failures.
pub(super) fn evaluated_term(
    ctx: &mut EvaluationContext<'_>,
    expression: &Expression,
    row: &Bindings,
) -> Result<Option<Term>, QueryEvaluationError> {
    match evaluate_expression(ctx, expression, row) {
        Ok(term) => Ok(Some(term)),
        Err(ExpressionError::Fatal(error)) => Err(*error),
        Err(_) => Ok(None),
    }
}

/// The effective boolean value of an expression for one row; recoverable
/// errors count as false.
fn evaluated_ebv(
    ctx: &mut EvaluationContext<'_>,
    expression: &Expression,
    row: &Bindings,
) -> Result<bool, QueryEvaluationError> {
    Ok(evaluated_term(ctx, expression, row)?
        .and_then(|term| effective_boolean_value(&term).ok())
        .unwrap_or(false))
}

/// LeftJoin: preserves every left row, extending it with compatible right
/// rows that pass the optional filter; rows without any passing extension
/// stay as they are, with the right-side variables unbound.
pub(super) fn evaluate_left_join(
    ctx: &mut EvaluationContext<'_>,
    left: &GraphPattern,
    right: &GraphPattern,
    filter: Option<&Expression>,
    input: Multiset,
) -> Result<Multiset, QueryEvaluationError> {
    let left = ctx.evaluate(left, input)?;
    if matches!(left, Multiset::Null) {
        return Ok(Multiset::Null);
    }
    let right = ctx.evaluate(right, left.clone())?;
    if matches!(right, Multiset::Null) {
        return Ok(left);
    }

    let left_rows = left.into_rows()?;
    let right_rows = right.into_rows()?;
    let mut result = RowMultiset::with_variables(left_rows.variables().to_vec());
    for v in right_rows.variables() {
        result.add_variable(v.clone());
    }

    for left_row in left_rows.iter() {
        let mut extensions = Vec::new();
        for right_row in right_rows.iter() {
            if let Some(merged) = left_row.merged_with(right_row) {
                let keep = match filter {
                    None => true,
                    Some(expression) => evaluated_ebv(ctx, expression, &merged)?,
                };
                if keep {
                    extensions.push(merged);
                }
            }
        }
        if extensions.is_empty() {
            result.add(left_row.clone());
        } else {
            for row in extensions {
                result.add(row);
            }
        }
    }
    Ok(Multiset::Rows(result))
}

/// FILTER: keeps the rows whose expression evaluates to a true effective
/// boolean value; evaluation errors discard the row.
pub(super) fn evaluate_filter(
    ctx: &mut EvaluationContext<'_>,
    expression: &Expression,
    inner: &GraphPattern,
    input: Multiset,
) -> Result<Multiset, QueryEvaluationError> {
    let inner = ctx.evaluate(inner, input)?;
    match inner {
        Multiset::Null => Ok(Multiset::Null),
        Multiset::Identity => {
            if evaluated_ebv(ctx, expression, &Bindings::new())? {
                Ok(Multiset::Identity)
            } else {
                Ok(Multiset::Null)
            }
        }
        Multiset::Rows(rows) => {
            let mut result = RowMultiset::with_variables(rows.variables().to_vec());
            for row in rows.into_row_vec() {
                if evaluated_ebv(ctx, expression, &row)? {
                    result.add(row);
                }
            }
            Ok(Multiset::Rows(result))
        }
        Multiset::Groups(_) => Err(QueryEvaluationError::internal(
            "a FILTER received a group multiset",
        )),
    }
}

/// BIND / LET assignment.
///
/// Row policy: an unbound variable gets the evaluated value (or stays unbound
/// on a recoverable error); a variable already bound to the same value keeps
/// the row, any divergence or evaluation error removes it.
pub(super) fn evaluate_extend(
    ctx: &mut EvaluationContext<'_>,
    inner: &GraphPattern,
    variable: &Variable,
    expression: &Expression,
    input: Multiset,
) -> Result<Multiset, QueryEvaluationError> {
    let inner = ctx.evaluate(inner, input)?;
    match inner {
        Multiset::Null => Ok(Multiset::Null),
        Multiset::Identity => {
            let mut rows = RowMultiset::new();
            rows.add_variable(variable.clone());
            if let Some(term) = evaluated_term(ctx, expression, &Bindings::new())? {
                let mut row = Bindings::new();
                row.bind(variable.clone(), term);
                rows.add(row);
            }
            Ok(Multiset::Rows(rows))
        }
        Multiset::Rows(mut rows) => {
            rows.add_variable(variable.clone());
            for id in rows.ids() {
                let Some(row) = rows.get(id).cloned() else {
                    continue;
                };
                let value = evaluated_term(ctx, expression, &row)?;
                match (row.get(variable), value) {
                    // Bound and matching: the row survives as it is.
                    (Some(current), Some(value)) if *current == value => {}
                    // Divergent value or evaluation error on a bound row.
                    (Some(_), _) => rows.remove(id),
                    (None, Some(value)) => {
                        if let Some(row) = rows.get_mut(id) {
                            row.bind(variable.clone(), value);
                        }
                    }
                    // Evaluation error on an unbound row: no assignment.
                    (None, None) => {}
                }
            }
            Ok(Multiset::Rows(rows))
        }
        Multiset::Groups(_) => Err(QueryEvaluationError::internal(
            "a BIND received a group multiset",
        )),
    }
}

/// VALUES: the inline data block joined with the input.
pub(super) fn evaluate_values(
    variables: &[Variable],
    bindings: &[Vec<Option<GroundTerm>>],
    input: Multiset,
) -> Result<Multiset, QueryEvaluationError> {
    let mut rows = RowMultiset::with_variables(variables.to_vec());
    for binding in bindings {
        let mut row = Bindings::new();
        for (variable, value) in variables.iter().zip(binding) {
            if let Some(term) = value {
                row.bind(variable.clone(), ground_term(term));
            }
        }
        rows.add(row);
    }
    Ok(input.join(Multiset::Rows(rows))?)
}

fn ground_term(term: &GroundTerm) -> Term {
    match term {
        GroundTerm::NamedNode(n) => n.clone().into(),
        GroundTerm::Literal(l) => l.clone().into(),
    }
}

#[cfg(test)]
mod tests {
    use super::super::QueryOptions;
    use super::*;
    use crate::dataset::MemoryDataset;
    use rdf_mosaic_model::{Literal, NamedNode};

    fn var(name: &str) -> Variable {
        Variable::new_unchecked(name)
    }

    fn iri(value: &str) -> NamedNode {
        NamedNode::new_unchecked(value)
    }

    fn row(pairs: &[(&str, Term)]) -> Bindings {
        pairs
            .iter()
            .map(|(v, t)| (var(v), t.clone()))
            .collect()
    }

    fn rows_pattern(rows: Vec<Bindings>) -> GraphPattern {
        // VALUES is the simplest way to inject fixed rows under the algebra
        // interface.
        let variables: Vec<Variable> = rows
            .iter()
            .flat_map(|r| r.variables().cloned().collect::<Vec<_>>())
            .collect::<std::collections::BTreeSet<_>>()
            .into_iter()
            .collect();
        let bindings = rows
            .iter()
            .map(|r| {
                variables
                    .iter()
                    .map(|v| {
                        r.get(v).map(|t| match t {
                            Term::NamedNode(n) => GroundTerm::NamedNode(n.clone()),
                            Term::Literal(l) => GroundTerm::Literal(l.clone()),
                            Term::BlankNode(_) => unreachable!("no blank nodes in fixtures"),
                        })
                    })
                    .collect()
            })
            .collect();
        GraphPattern::Values {
            variables,
            bindings,
        }
    }

    #[test]
    fn extend_binds_divergences_and_errors_per_row() {
        let dataset = MemoryDataset::new();
        let mut ctx = EvaluationContext::new(&dataset, None, QueryOptions::default());

        // Row 1: ?x unbound -> gets bound. Row 2: ?x already bound to the
        // same value -> kept. Row 3: ?x bound to something else -> removed.
        let one = Term::from(Literal::from(1));
        let rows = vec![
            row(&[(("y"), Term::from(iri("http://x/a")))]),
            row(&[("x", one.clone())]),
            row(&[("x", Term::from(Literal::from(2)))]),
        ];
        let pattern = rows_pattern(rows);
        let result = evaluate_extend(
            &mut ctx,
            &pattern,
            &var("x"),
            &Expression::Literal(Literal::from(1)),
            Multiset::Identity,
        )
        .unwrap();

        let rows = result.into_rows().unwrap().into_row_vec();
        assert_eq!(rows.len(), 2);
        assert!(rows.iter().all(|r| r.get(&var("x")) == Some(&one)));
    }

    #[test]
    fn extend_leaves_rows_unbound_on_expression_error() {
        let dataset = MemoryDataset::new();
        let mut ctx = EvaluationContext::new(&dataset, None, QueryOptions::default());

        let pattern = rows_pattern(vec![row(&[("y", Term::from(iri("http://x/a")))])]);
        // ?missing is unbound, so the expression errors on every row.
        let result = evaluate_extend(
            &mut ctx,
            &pattern,
            &var("x"),
            &Expression::Variable(var("missing")),
            Multiset::Identity,
        )
        .unwrap();

        let rows = result.into_rows().unwrap().into_row_vec();
        assert_eq!(rows.len(), 1);
        assert!(!rows[0].contains(&var("x")));
    }

    #[test]
    fn left_join_pads_unmatched_rows() {
        let dataset = MemoryDataset::new();
        let mut ctx = EvaluationContext::new(&dataset, None, QueryOptions::default());

        let left = rows_pattern(vec![
            row(&[("x", Term::from(iri("http://x/a")))]),
            row(&[("x", Term::from(iri("http://x/b")))]),
        ]);
        let right = rows_pattern(vec![row(&[
            ("x", Term::from(iri("http://x/a"))),
            ("y", Term::from(iri("http://x/match"))),
        ])]);

        let result =
            evaluate_left_join(&mut ctx, &left, &right, None, Multiset::Identity).unwrap();
        let rows = result.into_rows().unwrap().into_row_vec();
        assert_eq!(rows.len(), 2);
        let matched = rows.iter().find(|r| r.contains(&var("y"))).unwrap();
        assert_eq!(matched.get(&var("x")), Some(&iri("http://x/a").into()));
        assert!(rows.iter().any(|r| !r.contains(&var("y"))));
    }

    #[test]
    fn left_join_filter_failure_reverts_to_the_left_row() {
        let dataset = MemoryDataset::new();
        let mut ctx = EvaluationContext::new(&dataset, None, QueryOptions::default());

        let left = rows_pattern(vec![row(&[("x", Term::from(Literal::from(1)))])]);
        let right = rows_pattern(vec![row(&[("y", Term::from(Literal::from(2)))])]);
        // FILTER(?x > ?y) fails for the combined row.
        let filter = Expression::Greater(
            Box::new(Expression::Variable(var("x"))),
            Box::new(Expression::Variable(var("y"))),
        );

        let result =
            evaluate_left_join(&mut ctx, &left, &right, Some(&filter), Multiset::Identity)
                .unwrap();
        let rows = result.into_rows().unwrap().into_row_vec();
        assert_eq!(rows.len(), 1);
        assert!(!rows[0].contains(&var("y")));
    }

    #[test]
    fn filter_drops_rows_with_expression_errors() {
        let dataset = MemoryDataset::new();
        let mut ctx = EvaluationContext::new(&dataset, None, QueryOptions::default());

        let pattern = rows_pattern(vec![
            row(&[("x", Term::from(Literal::from(5)))]),
            row(&[("y", Term::from(Literal::from(5)))]),
        ]);
        // ?x is unbound in the second row, which makes the comparison error
        // and the row disappear.
        let filter = Expression::Greater(
            Box::new(Expression::Variable(var("x"))),
            Box::new(Expression::Literal(Literal::from(1))),
        );

        let result = evaluate_filter(&mut ctx, &filter, &pattern, Multiset::Identity).unwrap();
        let rows = result.into_rows().unwrap().into_row_vec();
        assert_eq!(rows.len(), 1);
        assert!(rows[0].contains(&var("x")));
    }

    #[test]
    fn values_joins_with_the_input() {
        let mut input = RowMultiset::new();
        input.add(row(&[("x", Term::from(iri("http://x/a")))]));
        let result = evaluate_values(
            &[var("x"), var("y")],
            &[
                vec![
                    Some(GroundTerm::NamedNode(iri("http://x/a"))),
                    Some(GroundTerm::NamedNode(iri("http://x/1"))),
                ],
                vec![
                    Some(GroundTerm::NamedNode(iri("http://x/b"))),
                    Some(GroundTerm::NamedNode(iri("http://x/2"))),
                ],
            ],
            Multiset::Rows(input),
        )
        .unwrap();

        let rows = result.into_rows().unwrap().into_row_vec();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get(&var("y")), Some(&iri("http://x/1").into()));
    }
}
