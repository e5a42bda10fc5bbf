use crate::error::DatasetError;
use rdf_mosaic_model::{NamedNode, NamedOrBlankNode, NamedOrBlankNodeRef, Subject, Term, Triple};
use rustc_hash::FxHashMap;

/// The graph selection that triple lookups run against.
///
/// The scope is an explicit argument of every lookup instead of mutable
/// dataset state: GRAPH evaluation pushes a [`Graph`](Self::Graph) scope for
/// the duration of its sub-evaluation and the previous scope is restored on
/// every exit path, so nested and failing evaluations cannot leak a
/// selection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GraphScope {
    /// The unnamed default graph of the dataset.
    DefaultGraph,
    /// The union of the given named graphs, as selected by `FROM` clauses.
    NamedGraphs(Vec<NamedOrBlankNode>),
    /// A single named graph, as selected by a GRAPH clause.
    Graph(NamedOrBlankNode),
}

/// The dataset collaborator the evaluator runs against.
///
/// Implementations provide graph lookup and triple-pattern retrieval; the
/// evaluator owns all algebra semantics. The provided lookup combinations
/// mirror what the path and zero-length-path operators need.
pub trait Dataset {
    /// Returns whether the dataset holds a named graph with this name.
    fn has_graph(&self, graph: NamedOrBlankNodeRef<'_>) -> Result<bool, DatasetError>;

    /// The names of all named graphs in the dataset.
    fn graph_names(&self) -> Result<Vec<NamedOrBlankNode>, DatasetError>;

    /// All triples in `scope` matching the bound components. A `None`
    /// component matches anything.
    fn triples_matching(
        &self,
        scope: &GraphScope,
        subject: Option<&Term>,
        predicate: Option<&NamedNode>,
        object: Option<&Term>,
    ) -> Result<Vec<Triple>, DatasetError>;

    /// All triples in `scope`.
    fn triples(&self, scope: &GraphScope) -> Result<Vec<Triple>, DatasetError> {
        self.triples_matching(scope, None, None, None)
    }

    fn triples_with_subject(
        &self,
        scope: &GraphScope,
        subject: &Term,
    ) -> Result<Vec<Triple>, DatasetError> {
        self.triples_matching(scope, Some(subject), None, None)
    }

    fn triples_with_object(
        &self,
        scope: &GraphScope,
        object: &Term,
    ) -> Result<Vec<Triple>, DatasetError> {
        self.triples_matching(scope, None, None, Some(object))
    }

    fn triples_with_subject_object(
        &self,
        scope: &GraphScope,
        subject: &Term,
        object: &Term,
    ) -> Result<Vec<Triple>, DatasetError> {
        self.triples_matching(scope, Some(subject), None, Some(object))
    }
}

pub(crate) fn subject_matches(subject: &Subject, term: &Term) -> bool {
    match (subject, term) {
        (Subject::NamedNode(s), Term::NamedNode(t)) => s == t,
        (Subject::BlankNode(s), Term::BlankNode(t)) => s == t,
        _ => false,
    }
}

/// A simple in-memory dataset: one unnamed default graph plus any number of
/// named graphs. Triples are kept set-like per graph.
#[derive(Debug, Clone, Default)]
pub struct MemoryDataset {
    default_graph: Vec<Triple>,
    named_graphs: FxHashMap<NamedOrBlankNode, Vec<Triple>>,
}

impl MemoryDataset {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a triple into the default graph.
    pub fn insert(&mut self, triple: Triple) {
        if !self.default_graph.contains(&triple) {
            self.default_graph.push(triple);
        }
    }

    /// Inserts a triple into the named graph `graph`, creating it if needed.
    pub fn insert_in(&mut self, graph: impl Into<NamedOrBlankNode>, triple: Triple) {
        let triples = self.named_graphs.entry(graph.into()).or_default();
        if !triples.contains(&triple) {
            triples.push(triple);
        }
    }

    /// Creates an empty named graph if it does not exist yet.
    pub fn insert_graph(&mut self, graph: impl Into<NamedOrBlankNode>) {
        self.named_graphs.entry(graph.into()).or_default();
    }

    /// Total number of triples across all graphs.
    pub fn len(&self) -> usize {
        self.default_graph.len() + self.named_graphs.values().map(Vec::len).sum::<usize>()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn scope_triples<'a>(&'a self, scope: &GraphScope) -> Vec<&'a Triple> {
        match scope {
            GraphScope::DefaultGraph => self.default_graph.iter().collect(),
            GraphScope::Graph(name) => self
                .named_graphs
                .get(name)
                .map(|triples| triples.iter().collect())
                .unwrap_or_default(),
            GraphScope::NamedGraphs(names) => names
                .iter()
                .filter_map(|name| self.named_graphs.get(name))
                .flat_map(|triples| triples.iter())
                .collect(),
        }
    }
}

impl Dataset for MemoryDataset {
    fn has_graph(&self, graph: NamedOrBlankNodeRef<'_>) -> Result<bool, DatasetError> {
        Ok(self.named_graphs.contains_key(&graph.into_owned()))
    }

    fn graph_names(&self) -> Result<Vec<NamedOrBlankNode>, DatasetError> {
        Ok(self.named_graphs.keys().cloned().collect())
    }

    fn triples_matching(
        &self,
        scope: &GraphScope,
        subject: Option<&Term>,
        predicate: Option<&NamedNode>,
        object: Option<&Term>,
    ) -> Result<Vec<Triple>, DatasetError> {
        Ok(self
            .scope_triples(scope)
            .into_iter()
            .filter(|t| subject.map_or(true, |s| subject_matches(&t.subject, s)))
            .filter(|t| predicate.map_or(true, |p| t.predicate == *p))
            .filter(|t| object.map_or(true, |o| t.object == *o))
            .cloned()
            .collect())
    }
}
