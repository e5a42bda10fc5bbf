use super::bgp::{bind_term_pattern, blank_node_variable, resolve_term_pattern};
use super::EvaluationContext;
use crate::error::QueryEvaluationError;
use rdf_mosaic_model::{Bindings, Multiset, NamedNode, RowMultiset, Term, Variable};
use rustc_hash::FxHashSet;
use spargebra::algebra::{GraphPattern, PropertyPathExpression};
use spargebra::term::{NamedNodePattern, TermPattern, TriplePattern};

/// Evaluates a property-path pattern between two endpoints.
///
/// Plain predicates reduce to a triple pattern; sequences and alternatives
/// are rewritten structurally; the repetition operators run the closure
/// traversal below.
pub(super) fn evaluate_path(
    ctx: &mut EvaluationContext<'_>,
    subject: &TermPattern,
    path: &PropertyPathExpression,
    object: &TermPattern,
    input: Multiset,
) -> Result<Multiset, QueryEvaluationError> {
    if matches!(input, Multiset::Null) {
        return Ok(Multiset::Null);
    }
    match path {
        PropertyPathExpression::NamedNode(predicate) => {
            let pattern = TriplePattern {
                subject: subject.clone(),
                predicate: NamedNodePattern::NamedNode(predicate.clone()),
                object: object.clone(),
            };
            ctx.evaluate(&GraphPattern::Bgp {
                patterns: vec![pattern],
            }, input)
        }
        PropertyPathExpression::Reverse(inner) => {
            evaluate_path(ctx, object, inner, subject, input)
        }
        PropertyPathExpression::Sequence(first, second) => {
            let mid = ctx.fresh_variable();
            let mid_pattern = TermPattern::Variable(mid.clone());
            let left = evaluate_path(ctx, subject, first, &mid_pattern, input)?;
            if matches!(left, Multiset::Null) {
                return Ok(Multiset::Null);
            }
            let right = evaluate_path(ctx, &mid_pattern, second, object, left.clone())?;
            Ok(without_variable(left.join(right)?, &mid))
        }
        PropertyPathExpression::Alternative(left, right) => {
            let left = evaluate_path(ctx, subject, left, object, input.clone())?;
            let right = evaluate_path(ctx, subject, right, object, input)?;
            Ok(left.union(right)?)
        }
        PropertyPathExpression::ZeroOrMore(inner) => {
            evaluate_closure(ctx, subject, inner, object, &input, Repetition::ZeroOrMore)
        }
        PropertyPathExpression::OneOrMore(inner) => {
            evaluate_closure(ctx, subject, inner, object, &input, Repetition::OneOrMore)
        }
        PropertyPathExpression::ZeroOrOne(inner) => {
            let zero = evaluate_zero_length(ctx, subject, object, &input)?;
            let one = evaluate_path(ctx, subject, inner, object, input)?;
            union_distinct(zero, one)
        }
        PropertyPathExpression::NegatedPropertySet(forbidden) => {
            evaluate_negated_property_set(ctx, subject, forbidden, object, input)
        }
    }
}

/// Evaluates a path of length exactly zero: start and end must denote the
/// same node.
///
/// The branches below enumerate, in order, which endpoints are fixed terms
/// and which are variables already bound in the input.
pub(super) fn evaluate_zero_length(
    ctx: &mut EvaluationContext<'_>,
    subject: &TermPattern,
    object: &TermPattern,
    input: &Multiset,
) -> Result<Multiset, QueryEvaluationError> {
    let subj_var = pattern_variable(subject);
    let obj_var = pattern_variable(object);

    if subj_var.is_none() && obj_var.is_none() {
        return Ok(if fixed_term(subject) == fixed_term(object) {
            Multiset::Identity
        } else {
            Multiset::Null
        });
    }

    let scope = ctx.active_scope();
    let rows = input_rows(input)?;
    let mut output = RowMultiset::new();
    // Filled by the branches that have to consult the dataset; the matches
    // are turned into rows afterwards.
    let mut candidates = None;

    match (&subj_var, &obj_var) {
        (Some(sv), Some(ov)) => {
            let s_bound = input.contains_variable(sv);
            let o_bound = input.contains_variable(ov);
            if s_bound && o_bound {
                let mut triples = Vec::new();
                for row in &rows {
                    if let (Some(s), Some(o)) = (row.get(sv), row.get(ov)) {
                        triples.extend(ctx.dataset().triples_with_subject_object(&scope, s, o)?);
                    }
                }
                candidates = Some(triples);
            } else if s_bound {
                let mut triples = Vec::new();
                for row in &rows {
                    if let Some(s) = row.get(sv) {
                        triples.extend(ctx.dataset().triples_with_subject(&scope, s)?);
                    }
                }
                candidates = Some(triples);
            } else if o_bound {
                let mut triples = Vec::new();
                for row in &rows {
                    if let Some(o) = row.get(ov) {
                        triples.extend(ctx.dataset().triples_with_object(&scope, o)?);
                    }
                }
                candidates = Some(triples);
            } else {
                // Fully unbound: every node of the active scope reaches
                // itself.
                let mut nodes = FxHashSet::default();
                for triple in ctx.dataset().triples(&scope)? {
                    nodes.insert(Term::from(triple.subject));
                    nodes.insert(triple.object);
                }
                for node in nodes {
                    let mut row = Bindings::new();
                    row.bind(sv.clone(), node.clone());
                    if ov != sv {
                        row.bind(ov.clone(), node);
                    }
                    output.add(row);
                }
            }
        }
        (Some(sv), None) => {
            let object_term = fixed_term(object).ok_or_else(|| {
                QueryEvaluationError::internal("zero-length path object is neither variable nor term")
            })?;
            if input.contains_variable(sv) {
                // Keep the rows whose bound value equals the fixed endpoint.
                for row in &rows {
                    if row.get(sv) == Some(&object_term) {
                        output.add(row.clone());
                    }
                }
            } else {
                // The fixed endpoint trivially reaches itself.
                let mut row = Bindings::new();
                row.bind(sv.clone(), object_term);
                output.add(row);
            }
        }
        (None, Some(ov)) => {
            let subject_term = fixed_term(subject).ok_or_else(|| {
                QueryEvaluationError::internal("zero-length path subject is neither variable nor term")
            })?;
            if input.contains_variable(ov) {
                for row in &rows {
                    if row.get(ov) == Some(&subject_term) {
                        output.add(row.clone());
                    }
                }
            } else {
                let mut row = Bindings::new();
                row.bind(ov.clone(), subject_term);
                output.add(row);
            }
        }
        (None, None) => {
            return Err(QueryEvaluationError::internal(
                "zero-length path reached an unexpected branch",
            ))
        }
    }

    if let Some(triples) = candidates {
        let mut matches = FxHashSet::default();
        for triple in triples {
            let s = Term::from(triple.subject);
            if accepts(subject, &s) && accepts(object, &triple.object) {
                matches.insert((s, triple.object));
            }
        }
        if matches.is_empty() {
            return Ok(Multiset::Null);
        }
        for (s, o) in matches {
            let mut row = Bindings::new();
            if let Some(sv) = &subj_var {
                row.bind(sv.clone(), s);
            }
            if let Some(ov) = &obj_var {
                if Some(ov) != subj_var.as_ref() {
                    row.bind(ov.clone(), o);
                }
            }
            output.add(row);
        }
    }

    Ok(Multiset::Rows(output))
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Repetition {
    ZeroOrMore,
    OneOrMore,
}

/// Evaluates `path*` or `path+` by breadth-first traversal of candidate node
/// walks.
///
/// Every walk starts at a seed determined by whichever endpoint is fixed or
/// bound; each round expands only the walks discovered in the previous round.
/// A walk is only recorded when its (seed, reached node) pair is new, which
/// bounds the walk list on cyclic data and guarantees termination.
fn evaluate_closure(
    ctx: &mut EvaluationContext<'_>,
    subject: &TermPattern,
    inner: &PropertyPathExpression,
    object: &TermPattern,
    input: &Multiset,
    repetition: Repetition,
) -> Result<Multiset, QueryEvaluationError> {
    let subj_var = pattern_variable(subject);
    let obj_var = pattern_variable(object);
    let both_terms = subj_var.is_none() && obj_var.is_none();
    let min_nodes = match repetition {
        Repetition::ZeroOrMore => 1,
        Repetition::OneOrMore => 2,
    };

    let mut reverse = false;
    let mut seeds: Vec<Term> = Vec::new();
    if subj_var.is_none() {
        seeds.extend(fixed_term(subject));
    } else if subj_var
        .as_ref()
        .map_or(false, |sv| input.contains_variable(sv))
    {
        seeds = bound_values(input, subj_var.as_ref())?;
    } else if obj_var.is_none() {
        seeds.extend(fixed_term(object));
        reverse = true;
    } else if obj_var
        .as_ref()
        .map_or(false, |ov| input.contains_variable(ov))
    {
        seeds = bound_values(input, obj_var.as_ref())?;
        reverse = true;
    }
    if seeds.is_empty() {
        // No usable starting set: walk from every node of the active scope.
        let mut nodes = FxHashSet::default();
        for triple in ctx.dataset().triples(&ctx.active_scope())? {
            let s = Term::from(triple.subject);
            if nodes.insert(s.clone()) {
                seeds.push(s);
            }
            if nodes.insert(triple.object.clone()) {
                seeds.push(triple.object);
            }
        }
    }

    let mut walks: Vec<Vec<Term>> = seeds.into_iter().map(|seed| vec![seed]).collect();
    let mut visited: FxHashSet<(Term, Term)> = FxHashSet::default();
    let mut expanded = 0;
    loop {
        if ctx.budget_exhausted()? {
            break;
        }
        let frontier_end = walks.len();
        for i in expanded..frontier_end {
            let walk = walks[i].clone();
            let Some(last) = walk.last().cloned() else {
                continue;
            };
            for next in evaluate_step(ctx, inner, &last, reverse)? {
                let pair = (walk[0].clone(), next.clone());
                if visited.insert(pair) {
                    let mut longer = walk.clone();
                    longer.push(next);
                    walks.push(longer);
                }
            }
        }
        expanded = frontier_end;

        // With two fixed endpoints the only question is whether any walk
        // exists, so stop as soon as one is acceptable.
        if both_terms
            && walks
                .iter()
                .any(|walk| walk_is_accepted(walk, subject, object, reverse, min_nodes))
        {
            break;
        }
        if walks.len() == frontier_end {
            break;
        }
    }

    if walks.is_empty() {
        return Ok(Multiset::Null);
    }

    let mut output = RowMultiset::new();
    let mut returned: FxHashSet<Bindings> = FxHashSet::default();
    let mut found = false;
    for walk in &walks {
        if !walk_is_accepted(walk, subject, object, reverse, min_nodes) {
            continue;
        }
        if both_terms {
            found = true;
            break;
        }
        let (start, end) = walk_endpoints(walk, reverse);
        let mut row = Bindings::new();
        let mut consistent = true;
        if let Some(sv) = &subj_var {
            row.bind(sv.clone(), start.clone());
        }
        if let Some(ov) = &obj_var {
            if Some(ov) == subj_var.as_ref() {
                consistent = row.get(ov) == Some(end);
            } else {
                row.bind(ov.clone(), end.clone());
            }
        }
        if consistent && returned.insert(row.clone()) {
            output.add(row);
        }
    }

    let positive = if both_terms {
        if found {
            Multiset::Identity
        } else {
            Multiset::Null
        }
    } else {
        Multiset::Rows(output)
    };

    match repetition {
        Repetition::ZeroOrMore => {
            // A node reaches itself at distance zero even without any edge.
            let zero = evaluate_zero_length(ctx, subject, object, input)?;
            union_distinct(positive, zero)
        }
        Repetition::OneOrMore => Ok(positive.nulled_if_empty()),
    }
}

fn walk_endpoints<'a>(walk: &'a [Term], reverse: bool) -> (&'a Term, &'a Term) {
    let first = &walk[0];
    let last = walk.last().unwrap_or(first);
    if reverse {
        (last, first)
    } else {
        (first, last)
    }
}

fn walk_is_accepted(
    walk: &[Term],
    subject: &TermPattern,
    object: &TermPattern,
    reverse: bool,
    min_nodes: usize,
) -> bool {
    if walk.len() < min_nodes {
        return false;
    }
    let (start, end) = walk_endpoints(walk, reverse);
    accepts(subject, start) && accepts(object, end)
}

/// One application of the inner path expression from `node`, in the given
/// direction: the single-step relation the closure operators iterate.
pub(super) fn evaluate_step(
    ctx: &mut EvaluationContext<'_>,
    path: &PropertyPathExpression,
    node: &Term,
    reverse: bool,
) -> Result<Vec<Term>, QueryEvaluationError> {
    Ok(match path {
        PropertyPathExpression::NamedNode(predicate) => {
            let scope = ctx.active_scope();
            if reverse {
                ctx.dataset()
                    .triples_matching(&scope, None, Some(predicate), Some(node))?
                    .into_iter()
                    .map(|t| Term::from(t.subject))
                    .collect()
            } else {
                ctx.dataset()
                    .triples_matching(&scope, Some(node), Some(predicate), None)?
                    .into_iter()
                    .map(|t| t.object)
                    .collect()
            }
        }
        PropertyPathExpression::Reverse(inner) => evaluate_step(ctx, inner, node, !reverse)?,
        PropertyPathExpression::Sequence(first, second) => {
            let (head, tail) = if reverse {
                (second, first)
            } else {
                (first, second)
            };
            let mut out = Vec::new();
            let mut seen = FxHashSet::default();
            for mid in evaluate_step(ctx, head, node, reverse)? {
                for end in evaluate_step(ctx, tail, &mid, reverse)? {
                    if seen.insert(end.clone()) {
                        out.push(end);
                    }
                }
            }
            out
        }
        PropertyPathExpression::Alternative(left, right) => {
            let mut out = evaluate_step(ctx, left, node, reverse)?;
            let mut seen: FxHashSet<Term> = out.iter().cloned().collect();
            for term in evaluate_step(ctx, right, node, reverse)? {
                if seen.insert(term.clone()) {
                    out.push(term);
                }
            }
            out
        }
        PropertyPathExpression::ZeroOrMore(inner) => {
            reachable_nodes(ctx, inner, node, reverse, true)?
        }
        PropertyPathExpression::OneOrMore(inner) => {
            reachable_nodes(ctx, inner, node, reverse, false)?
        }
        PropertyPathExpression::ZeroOrOne(inner) => {
            let mut out = vec![node.clone()];
            let mut seen: FxHashSet<Term> = out.iter().cloned().collect();
            for term in evaluate_step(ctx, inner, node, reverse)? {
                if seen.insert(term.clone()) {
                    out.push(term);
                }
            }
            out
        }
        PropertyPathExpression::NegatedPropertySet(forbidden) => {
            let scope = ctx.active_scope();
            let (subject, object) = if reverse {
                (None, Some(node))
            } else {
                (Some(node), None)
            };
            let mut out = Vec::new();
            let mut seen = FxHashSet::default();
            for triple in ctx
                .dataset()
                .triples_matching(&scope, subject, None, object)?
            {
                if forbidden.contains(&triple.predicate) {
                    continue;
                }
                let reached = if reverse {
                    Term::from(triple.subject)
                } else {
                    triple.object
                };
                if seen.insert(reached.clone()) {
                    out.push(reached);
                }
            }
            out
        }
    })
}

/// All nodes reachable from `node` by repeated application of `path`,
/// optionally including `node` itself for the reflexive closure.
fn reachable_nodes(
    ctx: &mut EvaluationContext<'_>,
    path: &PropertyPathExpression,
    node: &Term,
    reverse: bool,
    include_start: bool,
) -> Result<Vec<Term>, QueryEvaluationError> {
    let mut visited = FxHashSet::default();
    let mut queue = vec![node.clone()];
    let mut out = Vec::new();
    if include_start {
        out.push(node.clone());
    }
    visited.insert(node.clone());
    while let Some(current) = queue.pop() {
        for next in evaluate_step(ctx, path, &current, reverse)? {
            if visited.insert(next.clone()) {
                out.push(next.clone());
                queue.push(next);
            } else if !include_start && next == *node && !out.contains(&next) {
                // A cycle back to the start still makes the start reachable
                // at positive length.
                out.push(next);
            }
        }
    }
    Ok(out)
}

fn evaluate_negated_property_set(
    ctx: &mut EvaluationContext<'_>,
    subject: &TermPattern,
    forbidden: &[NamedNode],
    object: &TermPattern,
    input: Multiset,
) -> Result<Multiset, QueryEvaluationError> {
    if matches!(input, Multiset::Null) {
        return Ok(Multiset::Null);
    }
    let scope = ctx.active_scope();
    let mut output = RowMultiset::new();
    for row in input_rows(&input)? {
        let subject_term = resolve_term_pattern(subject, &row);
        let object_term = resolve_term_pattern(object, &row);
        for triple in ctx.dataset().triples_matching(
            &scope,
            subject_term.as_ref(),
            None,
            object_term.as_ref(),
        )? {
            if forbidden.contains(&triple.predicate) {
                continue;
            }
            let mut extended = row.clone();
            if bind_term_pattern(&mut extended, subject, triple.subject.clone().into())
                && bind_term_pattern(&mut extended, object, triple.object.clone())
            {
                output.add(extended);
            }
        }
    }
    Ok(Multiset::Rows(output).nulled_if_empty())
}

/// Removes a rewriting-internal variable from a multiset's rows and shape.
fn without_variable(multiset: Multiset, variable: &Variable) -> Multiset {
    match multiset {
        Multiset::Rows(rows) => {
            let variables = rows
                .variables()
                .iter()
                .filter(|v| *v != variable)
                .cloned()
                .collect();
            let mut out = RowMultiset::with_variables(variables);
            for mut row in rows.into_row_vec() {
                row.unbind(variable);
                out.add(row);
            }
            Multiset::Rows(out)
        }
        other => other,
    }
}

/// Appends the rows of `extra` that are not already present in `base`.
fn union_distinct(base: Multiset, extra: Multiset) -> Result<Multiset, QueryEvaluationError> {
    Ok(match (base, extra) {
        (Multiset::Null, x) | (x, Multiset::Null) => x,
        (Multiset::Identity, _) | (_, Multiset::Identity) => Multiset::Identity,
        (Multiset::Rows(mut base), Multiset::Rows(extra)) => {
            let existing: FxHashSet<Bindings> = base.iter().cloned().collect();
            for row in extra.into_row_vec() {
                if !existing.contains(&row) {
                    base.add(row);
                }
            }
            Multiset::Rows(base).nulled_if_empty()
        }
        (Multiset::Groups(_), _) | (_, Multiset::Groups(_)) => {
            return Err(QueryEvaluationError::internal(
                "a group multiset reached path evaluation",
            ))
        }
    })
}

fn pattern_variable(pattern: &TermPattern) -> Option<Variable> {
    match pattern {
        TermPattern::Variable(v) => Some(v.clone()),
        TermPattern::BlankNode(b) => Some(blank_node_variable(b)),
        TermPattern::NamedNode(_) | TermPattern::Literal(_) => None,
    }
}

fn fixed_term(pattern: &TermPattern) -> Option<Term> {
    match pattern {
        TermPattern::NamedNode(n) => Some(n.clone().into()),
        TermPattern::Literal(l) => Some(l.clone().into()),
        TermPattern::Variable(_) | TermPattern::BlankNode(_) => None,
    }
}

/// Endpoint pattern acceptance: a fixed term only accepts itself, a variable
/// accepts anything.
fn accepts(pattern: &TermPattern, term: &Term) -> bool {
    match pattern {
        TermPattern::NamedNode(n) => *term == Term::from(n.clone()),
        TermPattern::Literal(l) => *term == Term::from(l.clone()),
        TermPattern::Variable(_) | TermPattern::BlankNode(_) => true,
    }
}

fn bound_values(
    input: &Multiset,
    variable: Option<&Variable>,
) -> Result<Vec<Term>, QueryEvaluationError> {
    let Some(variable) = variable else {
        return Ok(Vec::new());
    };
    let mut seen = FxHashSet::default();
    let mut out = Vec::new();
    for row in input_rows(input)? {
        if let Some(term) = row.get(variable) {
            if seen.insert(term.clone()) {
                out.push(term.clone());
            }
        }
    }
    Ok(out)
}

fn input_rows(input: &Multiset) -> Result<Vec<Bindings>, QueryEvaluationError> {
    Ok(match input {
        Multiset::Null => Vec::new(),
        Multiset::Identity => vec![Bindings::new()],
        Multiset::Rows(rows) => rows.iter().cloned().collect(),
        Multiset::Groups(_) => {
            return Err(QueryEvaluationError::internal(
                "a group multiset reached path evaluation",
            ))
        }
    })
}
