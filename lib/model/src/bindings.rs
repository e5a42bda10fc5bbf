use oxrdf::{Term, Variable};
use std::collections::btree_map;
use std::collections::BTreeMap;
use std::fmt;

/// One row of a solution multiset: a partial assignment of RDF terms to
/// variables.
///
/// A missing entry means the variable is *unbound*; there is no null term.
/// Two rows are equal iff they bind the same variables to equal terms, and the
/// `Hash` implementation is consistent with that, so rows can be deduplicated
/// through hash sets.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct Bindings {
    values: BTreeMap<Variable, Term>,
}

impl Bindings {
    /// Creates an empty row that binds nothing.
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds a previously unbound variable to `term`.
    ///
    /// Callers must check [`contains`](Self::contains) first: binding an
    /// already bound variable is a programming error and the existing value is
    /// kept.
    pub fn bind(&mut self, variable: Variable, term: Term) {
        debug_assert!(
            !self.values.contains_key(&variable),
            "variable {variable} is already bound"
        );
        self.values.entry(variable).or_insert(term);
    }

    /// Returns the term bound to `variable`, if any.
    pub fn get(&self, variable: &Variable) -> Option<&Term> {
        self.values.get(variable)
    }

    /// Returns whether `variable` is bound in this row.
    pub fn contains(&self, variable: &Variable) -> bool {
        self.values.contains_key(variable)
    }

    /// The variables bound by this row.
    pub fn variables(&self) -> impl Iterator<Item = &Variable> {
        self.values.keys()
    }

    /// The (variable, term) pairs of this row in variable order.
    pub fn iter(&self) -> impl Iterator<Item = (&Variable, &Term)> {
        self.values.iter()
    }

    /// Number of bound variables.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Returns whether the row binds no variable at all.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Removes the binding for `variable` and returns it.
    pub fn unbind(&mut self, variable: &Variable) -> Option<Term> {
        self.values.remove(variable)
    }

    /// Two rows are compatible when every variable bound by both is bound to
    /// the same term. This is the join condition of the SPARQL multiset
    /// algebra.
    pub fn is_compatible_with(&self, other: &Self) -> bool {
        self.values
            .iter()
            .all(|(v, t)| other.get(v).map_or(true, |o| o == t))
    }

    /// Merges two compatible rows into one, or returns `None` when a shared
    /// variable disagrees.
    pub fn merged_with(&self, other: &Self) -> Option<Self> {
        if !self.is_compatible_with(other) {
            return None;
        }
        let mut values = self.values.clone();
        for (v, t) in &other.values {
            values.entry(v.clone()).or_insert_with(|| t.clone());
        }
        Some(Self { values })
    }

    /// Restricts the row to the given variables, dropping all other bindings.
    pub fn projected(&self, variables: &[Variable]) -> Self {
        Self {
            values: self
                .values
                .iter()
                .filter(|(v, _)| variables.contains(v))
                .map(|(v, t)| (v.clone(), t.clone()))
                .collect(),
        }
    }

    /// Returns whether this row binds at least one variable also bound by
    /// `other`. Used by MINUS, where rows with disjoint domains never
    /// eliminate each other.
    pub fn shares_variable_with(&self, other: &Self) -> bool {
        self.values.keys().any(|v| other.contains(v))
    }
}

impl fmt::Display for Bindings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, (v, t)) in self.values.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{v} -> {t}")?;
        }
        write!(f, "}}")
    }
}

impl FromIterator<(Variable, Term)> for Bindings {
    fn from_iter<I: IntoIterator<Item = (Variable, Term)>>(iter: I) -> Self {
        Self {
            values: iter.into_iter().collect(),
        }
    }
}

impl IntoIterator for Bindings {
    type Item = (Variable, Term);
    type IntoIter = btree_map::IntoIter<Variable, Term>;

    fn into_iter(self) -> Self::IntoIter {
        self.values.into_iter()
    }
}
