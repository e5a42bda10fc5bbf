use super::EvaluationContext;
use crate::error::ExpressionError;
use oxsdatatypes::{Boolean, DateTime, Decimal, Double, Float, Integer};
use rdf_mosaic_model::vocab::xsd;
use rdf_mosaic_model::{Bindings, Literal, Multiset, NamedNode, RowMultiset, Term};
use spargebra::algebra::{Expression, Function, GraphPattern};
use std::cmp::Ordering;

/// Evaluates a scalar expression against one row.
///
/// All failures are reported through [`ExpressionError`]; the caller decides
/// the row-level consequence. Only [`ExpressionError::Fatal`] aborts the
/// query, everything else is local to the row.
pub(super) fn evaluate_expression(
    ctx: &mut EvaluationContext<'_>,
    expression: &Expression,
    row: &Bindings,
) -> Result<Term, ExpressionError> {
    match expression {
        Expression::NamedNode(n) => Ok(n.clone().into()),
        Expression::Literal(l) => Ok(l.clone().into()),
        Expression::Variable(v) => row
            .get(v)
            .cloned()
            .ok_or_else(|| ExpressionError::UnboundVariable(v.clone())),
        Expression::Or(left, right) => {
            // SPARQL three-valued logic: an error on one side is recovered
            // by a true on the other.
            match boolean_of(ctx, left, row) {
                Ok(true) => Ok(bool_term(true)),
                Ok(false) => boolean_of(ctx, right, row).map(bool_term),
                Err(error) if matches!(error, ExpressionError::Fatal(_)) => Err(error),
                Err(error) => match boolean_of(ctx, right, row) {
                    Ok(true) => Ok(bool_term(true)),
                    Ok(false) => Err(error),
                    Err(other) => Err(other),
                },
            }
        }
        Expression::And(left, right) => {
            match boolean_of(ctx, left, row) {
                Ok(false) => Ok(bool_term(false)),
                Ok(true) => boolean_of(ctx, right, row).map(bool_term),
                Err(error) if matches!(error, ExpressionError::Fatal(_)) => Err(error),
                Err(error) => match boolean_of(ctx, right, row) {
                    Ok(false) => Ok(bool_term(false)),
                    Ok(true) => Err(error),
                    Err(other) => Err(other),
                },
            }
        }
        Expression::Equal(left, right) => {
            let left = evaluate_expression(ctx, left, row)?;
            let right = evaluate_expression(ctx, right, row)?;
            value_equals(&left, &right).map(bool_term)
        }
        Expression::SameTerm(left, right) => {
            let left = evaluate_expression(ctx, left, row)?;
            let right = evaluate_expression(ctx, right, row)?;
            Ok(bool_term(left == right))
        }
        Expression::Greater(left, right) => compare(ctx, left, right, row, Ordering::is_gt),
        Expression::GreaterOrEqual(left, right) => compare(ctx, left, right, row, Ordering::is_ge),
        Expression::Less(left, right) => compare(ctx, left, right, row, Ordering::is_lt),
        Expression::LessOrEqual(left, right) => compare(ctx, left, right, row, Ordering::is_le),
        Expression::In(needle, haystack) => {
            let needle = evaluate_expression(ctx, needle, row)?;
            let mut deferred = None;
            for candidate in haystack {
                match evaluate_expression(ctx, candidate, row)
                    .and_then(|c| value_equals(&needle, &c))
                {
                    Ok(true) => return Ok(bool_term(true)),
                    Ok(false) => {}
                    Err(error) => deferred = Some(error),
                }
            }
            match deferred {
                Some(error) => Err(error),
                None => Ok(bool_term(false)),
            }
        }
        Expression::Add(left, right) => arithmetic(ctx, left, right, row, NumericOp::Add),
        Expression::Subtract(left, right) => arithmetic(ctx, left, right, row, NumericOp::Subtract),
        Expression::Multiply(left, right) => arithmetic(ctx, left, right, row, NumericOp::Multiply),
        Expression::Divide(left, right) => arithmetic(ctx, left, right, row, NumericOp::Divide),
        Expression::UnaryPlus(inner) => {
            let term = evaluate_expression(ctx, inner, row)?;
            numeric_of(&term)?;
            Ok(term)
        }
        Expression::UnaryMinus(inner) => {
            let term = evaluate_expression(ctx, inner, row)?;
            let negated = match numeric_of(&term)? {
                Numeric::Integer(i) => i
                    .checked_neg()
                    .map(Numeric::Integer)
                    .ok_or_else(|| ExpressionError::type_error("integer negation overflow"))?,
                Numeric::Decimal(d) => d
                    .checked_neg()
                    .map(Numeric::Decimal)
                    .ok_or_else(|| ExpressionError::type_error("decimal negation overflow"))?,
                Numeric::Float(f) => Numeric::Float(-f),
                Numeric::Double(d) => Numeric::Double(-d),
            };
            Ok(numeric_term(negated))
        }
        Expression::Not(inner) => {
            let value = boolean_of(ctx, inner, row)?;
            Ok(bool_term(!value))
        }
        Expression::Exists(pattern) => evaluate_exists(ctx, pattern, row),
        Expression::Bound(v) => Ok(bool_term(row.contains(v))),
        Expression::If(condition, then_branch, else_branch) => {
            if boolean_of(ctx, condition, row)? {
                evaluate_expression(ctx, then_branch, row)
            } else {
                evaluate_expression(ctx, else_branch, row)
            }
        }
        Expression::Coalesce(branches) => {
            for branch in branches {
                match evaluate_expression(ctx, branch, row) {
                    Ok(term) => return Ok(term),
                    Err(fatal @ ExpressionError::Fatal(_)) => return Err(fatal),
                    Err(_) => {}
                }
            }
            Err(ExpressionError::type_error("COALESCE had no valid branch"))
        }
        Expression::FunctionCall(function, args) => {
            let args = args
                .iter()
                .map(|arg| evaluate_expression(ctx, arg, row))
                .collect::<Result<Vec<_>, _>>()?;
            evaluate_function(function, &args)
        }
    }
}

/// EXISTS: the pattern has at least one solution compatible with the row.
fn evaluate_exists(
    ctx: &mut EvaluationContext<'_>,
    pattern: &GraphPattern,
    row: &Bindings,
) -> Result<Term, ExpressionError> {
    let mut input = RowMultiset::new();
    input.add(row.clone());
    let result = ctx.evaluate(pattern, Multiset::Rows(input))?;
    Ok(bool_term(!result.is_empty()))
}

fn boolean_of(
    ctx: &mut EvaluationContext<'_>,
    expression: &Expression,
    row: &Bindings,
) -> Result<bool, ExpressionError> {
    let term = evaluate_expression(ctx, expression, row)?;
    effective_boolean_value(&term)
}

fn compare(
    ctx: &mut EvaluationContext<'_>,
    left: &Expression,
    right: &Expression,
    row: &Bindings,
    accept: impl Fn(Ordering) -> bool,
) -> Result<Term, ExpressionError> {
    let left = evaluate_expression(ctx, left, row)?;
    let right = evaluate_expression(ctx, right, row)?;
    value_cmp(&left, &right).map(|ordering| bool_term(accept(ordering)))
}

/// The effective boolean value of a term per the SPARQL definition:
/// booleans are themselves, strings test non-emptiness, numbers test
/// non-zero (and non-NaN); everything else is a type error.
pub(super) fn effective_boolean_value(term: &Term) -> Result<bool, ExpressionError> {
    let Term::Literal(literal) = term else {
        return Err(ExpressionError::type_error(
            "the effective boolean value of a non-literal",
        ));
    };
    if literal.datatype() == xsd::BOOLEAN {
        let value: Boolean = literal
            .value()
            .parse()
            .map_err(|_| ExpressionError::type_error("malformed xsd:boolean literal"))?;
        return Ok(value.into());
    }
    if is_string_like(literal) {
        return Ok(!literal.value().is_empty());
    }
    match numeric_literal(literal) {
        Some(Numeric::Integer(i)) => Ok(i != Integer::from(0)),
        Some(Numeric::Decimal(d)) => Ok(d != Decimal::from(0)),
        Some(Numeric::Float(f)) => Ok(f != Float::from(0.) && !f.is_nan()),
        Some(Numeric::Double(d)) => Ok(d != Double::from(0.) && !d.is_nan()),
        None => Err(ExpressionError::type_error(
            "the effective boolean value of a non-boolean literal",
        )),
    }
}

/// Value equality for `=` and `IN`: numeric and temporal literals compare by
/// value, other known types structurally; literals in unknown datatypes only
/// compare when structurally equal.
fn value_equals(left: &Term, right: &Term) -> Result<bool, ExpressionError> {
    if left == right {
        return Ok(true);
    }
    match (left, right) {
        (Term::Literal(a), Term::Literal(b)) => {
            if let (Some(x), Some(y)) = (numeric_literal(a), numeric_literal(b)) {
                return Ok(numeric_cmp(x, y) == Some(Ordering::Equal));
            }
            if let (Some(x), Some(y)) = (date_time_literal(a), date_time_literal(b)) {
                return Ok(x == y);
            }
            if known_value_space(a) && known_value_space(b) {
                // Both values are understood and not equal.
                Ok(false)
            } else {
                Err(ExpressionError::type_error(
                    "equality between literals of unknown datatypes",
                ))
            }
        }
        _ => Ok(false),
    }
}

/// Value ordering for `<`, `>`, `<=`, `>=`.
fn value_cmp(left: &Term, right: &Term) -> Result<Ordering, ExpressionError> {
    let (Term::Literal(a), Term::Literal(b)) = (left, right) else {
        return Err(ExpressionError::type_error(
            "ordering comparison of non-literal terms",
        ));
    };
    if let (Some(x), Some(y)) = (numeric_literal(a), numeric_literal(b)) {
        return numeric_cmp(x, y)
            .ok_or_else(|| ExpressionError::type_error("numeric comparison with NaN"));
    }
    if let (Some(x), Some(y)) = (date_time_literal(a), date_time_literal(b)) {
        return x
            .partial_cmp(&y)
            .ok_or_else(|| ExpressionError::type_error("incomparable xsd:dateTime values"));
    }
    if a.datatype() == xsd::BOOLEAN && b.datatype() == xsd::BOOLEAN {
        let x: Boolean = a
            .value()
            .parse()
            .map_err(|_| ExpressionError::type_error("malformed xsd:boolean literal"))?;
        let y: Boolean = b
            .value()
            .parse()
            .map_err(|_| ExpressionError::type_error("malformed xsd:boolean literal"))?;
        return Ok(bool::from(x).cmp(&bool::from(y)));
    }
    if is_plain_string(a) && is_plain_string(b) {
        return Ok(a.value().cmp(b.value()));
    }
    Err(ExpressionError::type_error(
        "ordering comparison of incomparable literals",
    ))
}

fn evaluate_function(function: &Function, args: &[Term]) -> Result<Term, ExpressionError> {
    match (function, args) {
        (Function::Str, [term]) => match term {
            Term::NamedNode(n) => Ok(Literal::new_simple_literal(n.as_str()).into()),
            Term::Literal(l) => Ok(Literal::new_simple_literal(l.value()).into()),
            Term::BlankNode(_) => Err(ExpressionError::type_error("STR of a blank node")),
        },
        (Function::Lang, [term]) => match term {
            Term::Literal(l) => Ok(Literal::new_simple_literal(l.language().unwrap_or("")).into()),
            _ => Err(ExpressionError::type_error("LANG of a non-literal")),
        },
        (Function::Datatype, [term]) => match term {
            Term::Literal(l) => Ok(l.datatype().into_owned().into()),
            _ => Err(ExpressionError::type_error("DATATYPE of a non-literal")),
        },
        (Function::Iri, [term]) => match term {
            Term::NamedNode(n) => Ok(n.clone().into()),
            Term::Literal(l) if is_plain_string(l) => NamedNode::new(l.value())
                .map(Into::into)
                .map_err(|e| ExpressionError::type_error(format!("IRI(): {e}"))),
            _ => Err(ExpressionError::type_error("IRI of an unsuitable term")),
        },
        (Function::StrLen, [term]) => {
            let value = string_value(term)?;
            Ok(typed_integer(value.chars().count()))
        }
        (Function::UCase, [term]) => {
            rewrap_string(term, |value| value.to_uppercase())
        }
        (Function::LCase, [term]) => {
            rewrap_string(term, |value| value.to_lowercase())
        }
        (Function::Contains, [haystack, needle]) => {
            Ok(bool_term(string_value(haystack)?.contains(string_value(needle)?)))
        }
        (Function::StrStarts, [string, prefix]) => {
            Ok(bool_term(string_value(string)?.starts_with(string_value(prefix)?)))
        }
        (Function::StrEnds, [string, suffix]) => {
            Ok(bool_term(string_value(string)?.ends_with(string_value(suffix)?)))
        }
        (Function::Concat, args) => {
            let mut out = String::new();
            for arg in args {
                out.push_str(string_value(arg)?);
            }
            Ok(Literal::new_simple_literal(out).into())
        }
        (Function::IsIri, [term]) => Ok(bool_term(matches!(term, Term::NamedNode(_)))),
        (Function::IsBlank, [term]) => Ok(bool_term(matches!(term, Term::BlankNode(_)))),
        (Function::IsLiteral, [term]) => Ok(bool_term(matches!(term, Term::Literal(_)))),
        (Function::IsNumeric, [term]) => Ok(bool_term(numeric_of(term).is_ok())),
        (function, _) => Err(ExpressionError::Unsupported(function.to_string())),
    }
}

/// Keeps the language tag / datatype of a string literal while transforming
/// its value, as UCASE and LCASE require.
fn rewrap_string(term: &Term, transform: impl FnOnce(&str) -> String) -> Result<Term, ExpressionError> {
    let Term::Literal(literal) = term else {
        return Err(ExpressionError::type_error("string function on a non-literal"));
    };
    if !is_string_like(literal) {
        return Err(ExpressionError::type_error(
            "string function on a non-string literal",
        ));
    }
    let transformed = transform(literal.value());
    Ok(match literal.language() {
        Some(language) => Literal::new_language_tagged_literal_unchecked(transformed, language),
        None => Literal::new_simple_literal(transformed),
    }
    .into())
}

fn string_value(term: &Term) -> Result<&str, ExpressionError> {
    match term {
        Term::Literal(l) if is_string_like(l) => Ok(l.value()),
        _ => Err(ExpressionError::type_error("expected a string literal")),
    }
}

fn is_string_like(literal: &Literal) -> bool {
    literal.language().is_some() || literal.datatype() == xsd::STRING
}

fn is_plain_string(literal: &Literal) -> bool {
    literal.language().is_none() && literal.datatype() == xsd::STRING
}

fn known_value_space(literal: &Literal) -> bool {
    is_string_like(literal)
        || numeric_literal(literal).is_some()
        || literal.datatype() == xsd::BOOLEAN
        || date_time_literal(literal).is_some()
}

fn date_time_literal(literal: &Literal) -> Option<DateTime> {
    if literal.datatype() == xsd::DATE_TIME {
        literal.value().parse().ok()
    } else {
        None
    }
}

fn bool_term(value: bool) -> Term {
    Literal::from(value).into()
}

fn typed_integer(value: usize) -> Term {
    Literal::new_typed_literal(value.to_string(), xsd::INTEGER).into()
}

// Numeric handling over the XSD promotion lattice
// integer -> decimal -> float -> double.

#[derive(Debug, Clone, Copy)]
pub(super) enum Numeric {
    Integer(Integer),
    Decimal(Decimal),
    Float(Float),
    Double(Double),
}

#[derive(Debug, Clone, Copy)]
pub(super) enum NumericOp {
    Add,
    Subtract,
    Multiply,
    Divide,
}

fn arithmetic(
    ctx: &mut EvaluationContext<'_>,
    left: &Expression,
    right: &Expression,
    row: &Bindings,
    op: NumericOp,
) -> Result<Term, ExpressionError> {
    let left = evaluate_expression(ctx, left, row)?;
    let right = evaluate_expression(ctx, right, row)?;
    let result = numeric_op(op, numeric_of(&left)?, numeric_of(&right)?)?;
    Ok(numeric_term(result))
}

pub(super) fn numeric_of(term: &Term) -> Result<Numeric, ExpressionError> {
    match term {
        Term::Literal(literal) => numeric_literal(literal)
            .ok_or_else(|| ExpressionError::type_error("expected a numeric literal")),
        _ => Err(ExpressionError::type_error("expected a numeric literal")),
    }
}

pub(super) fn numeric_literal(literal: &Literal) -> Option<Numeric> {
    let datatype = literal.datatype();
    let value = literal.value();
    if datatype == xsd::INTEGER {
        value.parse().ok().map(Numeric::Integer)
    } else if datatype == xsd::DECIMAL {
        value.parse().ok().map(Numeric::Decimal)
    } else if datatype == xsd::FLOAT {
        value.parse().ok().map(Numeric::Float)
    } else if datatype == xsd::DOUBLE {
        value.parse().ok().map(Numeric::Double)
    } else {
        None
    }
}

pub(super) fn numeric_term(value: Numeric) -> Term {
    match value {
        Numeric::Integer(i) => Literal::new_typed_literal(i.to_string(), xsd::INTEGER),
        Numeric::Decimal(d) => Literal::new_typed_literal(d.to_string(), xsd::DECIMAL),
        Numeric::Float(f) => Literal::new_typed_literal(f.to_string(), xsd::FLOAT),
        Numeric::Double(d) => Literal::new_typed_literal(d.to_string(), xsd::DOUBLE),
    }
    .into()
}

pub(super) fn numeric_cmp(left: Numeric, right: Numeric) -> Option<Ordering> {
    match promote(left, right) {
        (Numeric::Integer(a), Numeric::Integer(b)) => Some(a.cmp(&b)),
        (Numeric::Decimal(a), Numeric::Decimal(b)) => Some(a.cmp(&b)),
        (Numeric::Float(a), Numeric::Float(b)) => a.partial_cmp(&b),
        (Numeric::Double(a), Numeric::Double(b)) => a.partial_cmp(&b),
        _ => None,
    }
}

pub(super) fn numeric_op(
    op: NumericOp,
    left: Numeric,
    right: Numeric,
) -> Result<Numeric, ExpressionError> {
    let overflow = || ExpressionError::type_error("numeric operation overflow");
    match promote(left, right) {
        (Numeric::Integer(a), Numeric::Integer(b)) => match op {
            NumericOp::Add => a.checked_add(b).map(Numeric::Integer).ok_or_else(overflow),
            NumericOp::Subtract => a.checked_sub(b).map(Numeric::Integer).ok_or_else(overflow),
            NumericOp::Multiply => a.checked_mul(b).map(Numeric::Integer).ok_or_else(overflow),
            // Dividing two integers produces a decimal.
            NumericOp::Divide => Decimal::from(a)
                .checked_div(Decimal::from(b))
                .map(Numeric::Decimal)
                .ok_or_else(|| ExpressionError::type_error("division by zero")),
        },
        (Numeric::Decimal(a), Numeric::Decimal(b)) => match op {
            NumericOp::Add => a.checked_add(b).map(Numeric::Decimal).ok_or_else(overflow),
            NumericOp::Subtract => a.checked_sub(b).map(Numeric::Decimal).ok_or_else(overflow),
            NumericOp::Multiply => a.checked_mul(b).map(Numeric::Decimal).ok_or_else(overflow),
            NumericOp::Divide => a
                .checked_div(b)
                .map(Numeric::Decimal)
                .ok_or_else(|| ExpressionError::type_error("division by zero")),
        },
        (Numeric::Float(a), Numeric::Float(b)) => Ok(Numeric::Float(match op {
            NumericOp::Add => a + b,
            NumericOp::Subtract => a - b,
            NumericOp::Multiply => a * b,
            NumericOp::Divide => a / b,
        })),
        (Numeric::Double(a), Numeric::Double(b)) => Ok(Numeric::Double(match op {
            NumericOp::Add => a + b,
            NumericOp::Subtract => a - b,
            NumericOp::Multiply => a * b,
            NumericOp::Divide => a / b,
        })),
        _ => Err(ExpressionError::type_error("numeric promotion failure")),
    }
}

fn promote(left: Numeric, right: Numeric) -> (Numeric, Numeric) {
    match (left, right) {
        (Numeric::Integer(a), Numeric::Decimal(b)) => {
            (Numeric::Decimal(Decimal::from(a)), Numeric::Decimal(b))
        }
        (Numeric::Decimal(a), Numeric::Integer(b)) => {
            (Numeric::Decimal(a), Numeric::Decimal(Decimal::from(b)))
        }
        (Numeric::Integer(a), Numeric::Float(b)) => {
            (Numeric::Float(Float::from(a)), Numeric::Float(b))
        }
        (Numeric::Float(a), Numeric::Integer(b)) => {
            (Numeric::Float(a), Numeric::Float(Float::from(b)))
        }
        (Numeric::Decimal(a), Numeric::Float(b)) => {
            (Numeric::Float(Float::from(a)), Numeric::Float(b))
        }
        (Numeric::Float(a), Numeric::Decimal(b)) => {
            (Numeric::Float(a), Numeric::Float(Float::from(b)))
        }
        (Numeric::Integer(a), Numeric::Double(b)) => {
            (Numeric::Double(Double::from(a)), Numeric::Double(b))
        }
        (Numeric::Double(a), Numeric::Integer(b)) => {
            (Numeric::Double(a), Numeric::Double(Double::from(b)))
        }
        (Numeric::Decimal(a), Numeric::Double(b)) => {
            (Numeric::Double(Double::from(a)), Numeric::Double(b))
        }
        (Numeric::Double(a), Numeric::Decimal(b)) => {
            (Numeric::Double(a), Numeric::Double(Double::from(b)))
        }
        (Numeric::Float(a), Numeric::Double(b)) => {
            (Numeric::Double(Double::from(a)), Numeric::Double(b))
        }
        (Numeric::Double(a), Numeric::Float(b)) => {
            (Numeric::Double(a), Numeric::Double(Double::from(b)))
        }
        same => same,
    }
}
