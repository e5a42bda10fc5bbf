use crate::Bindings;
use oxrdf::Variable;
use std::fmt;

/// A multiset of solution rows, the result type of algebra evaluation.
///
/// The special shapes are first-class variants so that every operator has to
/// handle them explicitly:
/// - [`Null`](Self::Null) holds no solution and absorbs joins.
/// - [`Identity`](Self::Identity) holds exactly one solution binding nothing
///   and is the neutral element of join.
/// - [`Rows`](Self::Rows) is an ordinary multiset of rows.
/// - [`Groups`](Self::Groups) only appears between GROUP BY and the aggregate
///   bindings consuming it; feeding it into any other operation is an error.
#[derive(Debug, Clone, Default)]
pub enum Multiset {
    #[default]
    Null,
    Identity,
    Rows(RowMultiset),
    Groups(GroupMultiset),
}

/// Error raised when a multiset shape reaches an operation it cannot take
/// part in. This signals a malformed algebra tree and aborts the query.
#[derive(Debug, thiserror::Error)]
#[error("a group multiset cannot take part in a {0} operation")]
pub struct IncomposableMultiset(&'static str);

impl Multiset {
    /// Number of solutions.
    pub fn len(&self) -> usize {
        match self {
            Self::Null => 0,
            Self::Identity => 1,
            Self::Rows(rows) => rows.len(),
            Self::Groups(groups) => groups.len(),
        }
    }

    /// Returns whether there is no solution at all.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns whether the declared variable shape contains `variable`.
    pub fn contains_variable(&self, variable: &Variable) -> bool {
        match self {
            Self::Null | Self::Identity => false,
            Self::Rows(rows) => rows.contains_variable(variable),
            Self::Groups(groups) => groups.variables().contains(variable),
        }
    }

    /// Returns whether `variable` is bound in every row. An empty multiset
    /// has no row violating this, matching the "bound in all input solutions"
    /// tests of the GRAPH and path operators.
    pub fn is_bound_in_all_rows(&self, variable: &Variable) -> bool {
        match self {
            Self::Null => true,
            Self::Identity => false,
            Self::Rows(rows) => rows.iter().all(|row| row.contains(variable)),
            Self::Groups(_) => false,
        }
    }

    /// Natural join on shared variables. `Null` is absorbing and `Identity`
    /// neutral.
    pub fn join(self, other: Self) -> Result<Self, IncomposableMultiset> {
        Ok(match (self, other) {
            (Self::Null, _) | (_, Self::Null) => Self::Null,
            (Self::Identity, x) | (x, Self::Identity) => x,
            (Self::Groups(_), _) | (_, Self::Groups(_)) => {
                return Err(IncomposableMultiset("join"))
            }
            (Self::Rows(left), Self::Rows(right)) => {
                let mut result = RowMultiset::new();
                for v in left.variables().iter().chain(right.variables()) {
                    result.add_variable(v.clone());
                }
                for (_, l) in &left.rows {
                    for (_, r) in &right.rows {
                        if let Some(merged) = l.merged_with(r) {
                            result.add(merged);
                        }
                    }
                }
                Self::Rows(result)
            }
        })
    }

    /// Appends the solutions of `other` to this multiset. `Null` is the unit;
    /// an `Identity` operand contributes its single empty row.
    pub fn union(self, other: Self) -> Result<Self, IncomposableMultiset> {
        let into_rows = |m: Self| -> Result<RowMultiset, IncomposableMultiset> {
            match m {
                Self::Null => Ok(RowMultiset::new()),
                Self::Identity => {
                    let mut rows = RowMultiset::new();
                    rows.add(Bindings::new());
                    Ok(rows)
                }
                Self::Rows(rows) => Ok(rows),
                Self::Groups(_) => Err(IncomposableMultiset("union")),
            }
        };
        Ok(match (self, other) {
            (Self::Null, x) | (x, Self::Null) => x,
            (left, right) => {
                let mut rows = into_rows(left)?;
                rows.union(into_rows(right)?);
                Self::Rows(rows)
            }
        })
    }

    /// SPARQL MINUS: keeps the left rows for which no right row is both
    /// compatible and sharing at least one bound variable. Right rows with a
    /// disjoint domain never eliminate anything.
    pub fn minus(self, other: Self) -> Result<Self, IncomposableMultiset> {
        Ok(match (self, other) {
            (Self::Null, _) => Self::Null,
            // The empty row shares no variable with anything, so an Identity
            // left side survives and an Identity right side removes nothing.
            (left, Self::Null | Self::Identity) => left,
            (Self::Identity, Self::Rows(_)) => Self::Identity,
            (Self::Groups(_), _) | (_, Self::Groups(_)) => {
                return Err(IncomposableMultiset("minus"))
            }
            (Self::Rows(mut left), Self::Rows(right)) => {
                left.rows.retain(|(_, l)| {
                    !right
                        .iter()
                        .any(|r| l.is_compatible_with(r) && l.shares_variable_with(r))
                });
                Self::Rows(left)
            }
        })
    }

    /// Flattens to an ordinary row multiset: `Null` becomes empty, `Identity`
    /// a single empty row.
    pub fn into_rows(self) -> Result<RowMultiset, IncomposableMultiset> {
        match self {
            Self::Null => Ok(RowMultiset::new()),
            Self::Identity => {
                let mut rows = RowMultiset::new();
                rows.add(Bindings::new());
                Ok(rows)
            }
            Self::Rows(rows) => Ok(rows),
            Self::Groups(_) => Err(IncomposableMultiset("row")),
        }
    }

    /// Normalizes an empty row multiset to `Null`. Operators that accumulate
    /// per-graph or per-path results use this on their way out.
    pub fn nulled_if_empty(self) -> Self {
        match self {
            Self::Rows(rows) if rows.is_empty() => Self::Null,
            other => other,
        }
    }
}

impl From<RowMultiset> for Multiset {
    fn from(rows: RowMultiset) -> Self {
        Self::Rows(rows)
    }
}

impl From<GroupMultiset> for Multiset {
    fn from(groups: GroupMultiset) -> Self {
        Self::Groups(groups)
    }
}

/// An ordinary multiset: a declared variable shape plus rows in insertion
/// order, each carrying an id that is unique for the lifetime of the multiset.
/// Ids support removal and in-place row rewriting without invalidating
/// iteration order.
#[derive(Debug, Clone, Default)]
pub struct RowMultiset {
    variables: Vec<Variable>,
    rows: Vec<(usize, Bindings)>,
    next_id: usize,
}

impl RowMultiset {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_variables(variables: Vec<Variable>) -> Self {
        Self {
            variables,
            rows: Vec::new(),
            next_id: 0,
        }
    }

    /// Appends a row, declaring any variable it binds that is not yet part of
    /// the shape, and returns the fresh row id.
    pub fn add(&mut self, row: Bindings) -> usize {
        for v in row.variables() {
            if !self.variables.contains(v) {
                self.variables.push(v.clone());
            }
        }
        let id = self.next_id;
        self.next_id += 1;
        self.rows.push((id, row));
        id
    }

    /// Removes the row with the given id, if present.
    pub fn remove(&mut self, id: usize) {
        self.rows.retain(|(row_id, _)| *row_id != id);
    }

    pub fn get(&self, id: usize) -> Option<&Bindings> {
        self.rows
            .iter()
            .find(|(row_id, _)| *row_id == id)
            .map(|(_, row)| row)
    }

    pub fn get_mut(&mut self, id: usize) -> Option<&mut Bindings> {
        self.rows
            .iter_mut()
            .find(|(row_id, _)| *row_id == id)
            .map(|(_, row)| row)
    }

    /// Declares a variable as part of the shape without binding it anywhere.
    pub fn add_variable(&mut self, variable: Variable) {
        if !self.variables.contains(&variable) {
            self.variables.push(variable);
        }
    }

    pub fn contains_variable(&self, variable: &Variable) -> bool {
        self.variables.contains(variable)
    }

    pub fn variables(&self) -> &[Variable] {
        &self.variables
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Row ids in insertion order.
    pub fn ids(&self) -> Vec<usize> {
        self.rows.iter().map(|(id, _)| *id).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Bindings> {
        self.rows.iter().map(|(_, row)| row)
    }

    /// Keeps the rows for which `keep` returns true; the callback may rewrite
    /// the row in place. Newly bound variables must be declared by the caller
    /// through [`add_variable`](Self::add_variable).
    pub fn retain_rows_mut(&mut self, mut keep: impl FnMut(&mut Bindings) -> bool) {
        self.rows.retain_mut(|(_, row)| keep(row));
    }

    /// Appends all rows of `other` under fresh ids and merges the declared
    /// shapes.
    pub fn union(&mut self, other: Self) {
        for v in other.variables {
            self.add_variable(v);
        }
        for (_, row) in other.rows {
            let id = self.next_id;
            self.next_id += 1;
            self.rows.push((id, row));
        }
    }

    pub fn into_row_vec(self) -> Vec<Bindings> {
        self.rows.into_iter().map(|(_, row)| row).collect()
    }
}

impl FromIterator<Bindings> for RowMultiset {
    fn from_iter<I: IntoIterator<Item = Bindings>>(iter: I) -> Self {
        let mut rows = Self::new();
        for row in iter {
            rows.add(row);
        }
        rows
    }
}

impl fmt::Display for RowMultiset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "[")?;
        for (_, row) in &self.rows {
            writeln!(f, "  {row}")?;
        }
        write!(f, "]")
    }
}

/// The result of GROUP BY: one entry per group, each pairing the group-key
/// row with the member rows assigned to it. Only the aggregate-binding step
/// consumes this shape.
#[derive(Debug, Clone, Default)]
pub struct GroupMultiset {
    variables: Vec<Variable>,
    groups: Vec<SolutionGroup>,
}

/// One group of a [`GroupMultiset`].
#[derive(Debug, Clone)]
pub struct SolutionGroup {
    key: Bindings,
    members: Vec<Bindings>,
}

impl SolutionGroup {
    pub fn new(key: Bindings, members: Vec<Bindings>) -> Self {
        Self { key, members }
    }

    /// The group-key row: the values of the GROUP BY variables.
    pub fn key(&self) -> &Bindings {
        &self.key
    }

    /// The rows of the original multiset assigned to this group.
    pub fn members(&self) -> &[Bindings] {
        &self.members
    }

    pub fn into_parts(self) -> (Bindings, Vec<Bindings>) {
        (self.key, self.members)
    }
}

impl GroupMultiset {
    pub fn new(variables: Vec<Variable>) -> Self {
        Self {
            variables,
            groups: Vec::new(),
        }
    }

    pub fn push(&mut self, group: SolutionGroup) {
        self.groups.push(group);
    }

    /// The GROUP BY key variables.
    pub fn variables(&self) -> &[Variable] {
        &self.variables
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    pub fn groups(&self) -> &[SolutionGroup] {
        &self.groups
    }

    pub fn into_groups(self) -> Vec<SolutionGroup> {
        self.groups
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use oxrdf::{NamedNode, Term};

    fn var(name: &str) -> Variable {
        Variable::new_unchecked(name)
    }

    fn iri(iri: &str) -> Term {
        NamedNode::new_unchecked(iri).into()
    }

    fn row(pairs: &[(&str, &str)]) -> Bindings {
        pairs
            .iter()
            .map(|(v, t)| (var(v), iri(t)))
            .collect()
    }

    fn rows_of(m: &Multiset) -> Vec<Bindings> {
        match m {
            Multiset::Null => Vec::new(),
            Multiset::Identity => vec![Bindings::new()],
            Multiset::Rows(rows) => rows.iter().cloned().collect(),
            Multiset::Groups(groups) => {
                groups.groups().iter().map(|g| g.key().clone()).collect()
            }
        }
    }

    fn same_rows(a: &Multiset, b: &Multiset) -> bool {
        let mut left = rows_of(a);
        let mut right = rows_of(b);
        if left.len() != right.len() {
            return false;
        }
        while let Some(row) = left.pop() {
            match right.iter().position(|r| *r == row) {
                Some(i) => {
                    right.remove(i);
                }
                None => return false,
            }
        }
        true
    }

    fn sample() -> Multiset {
        let mut rows = RowMultiset::new();
        rows.add(row(&[("x", "http://example.com/a")]));
        rows.add(row(&[("x", "http://example.com/b"), ("y", "http://example.com/c")]));
        Multiset::Rows(rows)
    }

    #[test]
    fn join_with_identity_is_neutral() {
        let joined = sample().join(Multiset::Identity).unwrap();
        assert!(same_rows(&joined, &sample()));
    }

    #[test]
    fn join_with_null_is_absorbing() {
        let joined = sample().join(Multiset::Null).unwrap();
        assert!(matches!(joined, Multiset::Null));
        let joined = Multiset::Null.join(sample()).unwrap();
        assert!(matches!(joined, Multiset::Null));
    }

    #[test]
    fn join_merges_compatible_rows_only() {
        let mut right = RowMultiset::new();
        right.add(row(&[("x", "http://example.com/a"), ("z", "http://example.com/z")]));
        right.add(row(&[("x", "http://example.com/nope")]));

        let joined = sample().join(Multiset::Rows(right)).unwrap();
        let rows = rows_of(&joined);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get(&var("z")), Some(&iri("http://example.com/z")));
    }

    #[test]
    fn join_of_disjoint_shapes_is_a_product() {
        let mut right = RowMultiset::new();
        right.add(row(&[("z", "http://example.com/1")]));
        right.add(row(&[("z", "http://example.com/2")]));

        let joined = sample().join(Multiset::Rows(right)).unwrap();
        assert_eq!(joined.len(), 4);
    }

    #[test]
    fn union_with_null_is_a_no_op() {
        let a = sample().union(sample()).unwrap();
        let b = sample().union(sample()).unwrap().union(Multiset::Null).unwrap();
        assert!(same_rows(&a, &b));
    }

    #[test]
    fn union_renumbers_ids() {
        let mut a = RowMultiset::new();
        a.add(row(&[("x", "http://example.com/1")]));
        let mut b = RowMultiset::new();
        b.add(row(&[("x", "http://example.com/2")]));
        a.union(b);

        let ids = a.ids();
        assert_eq!(ids.len(), 2);
        assert_ne!(ids[0], ids[1]);
    }

    #[test]
    fn minus_requires_a_shared_variable() {
        let mut right = RowMultiset::new();
        right.add(row(&[("z", "http://example.com/unrelated")]));
        let result = sample().minus(Multiset::Rows(right)).unwrap();
        assert_eq!(result.len(), 2);

        let mut right = RowMultiset::new();
        right.add(row(&[("x", "http://example.com/a")]));
        let result = sample().minus(Multiset::Rows(right)).unwrap();
        assert_eq!(result.len(), 1);
    }

    #[test]
    fn removal_by_id_keeps_other_rows() {
        let mut rows = RowMultiset::new();
        let first = rows.add(row(&[("x", "http://example.com/1")]));
        let second = rows.add(row(&[("x", "http://example.com/2")]));
        rows.remove(first);
        assert_eq!(rows.len(), 1);
        assert!(rows.get(second).is_some());
        assert!(rows.get(first).is_none());
    }

    #[test]
    fn empty_rows_normalize_to_null() {
        let m = Multiset::Rows(RowMultiset::new()).nulled_if_empty();
        assert!(matches!(m, Multiset::Null));
        let m = sample().nulled_if_empty();
        assert_eq!(m.len(), 2);
    }

    #[test]
    fn groups_cannot_join() {
        let groups = GroupMultiset::new(vec![var("x")]);
        assert!(Multiset::Groups(groups).join(sample()).is_err());
    }
}
