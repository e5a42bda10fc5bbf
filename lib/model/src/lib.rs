mod bindings;
mod multiset;

pub use bindings::*;
pub use multiset::*;

// Re-export the oxrdf term types. All other crates in the workspace go through
// these re-exports instead of depending on oxrdf directly.
pub use oxrdf::{
    BlankNode, BlankNodeRef, GraphName, GraphNameRef, IriParseError, Literal, LiteralRef,
    NamedNode, NamedNodeRef, NamedOrBlankNode, NamedOrBlankNodeRef, Subject, SubjectRef, Term,
    TermRef, Triple, TripleRef, Variable, VariableNameParseError, VariableRef,
};
pub use oxrdf::vocab;
