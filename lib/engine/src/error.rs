use rdf_mosaic_model::{IncomposableMultiset, Variable};
use std::error::Error;
use std::time::Duration;

/// A fatal SPARQL evaluation error.
///
/// Raising one of these aborts the whole query; it is never handled at the
/// level of an individual solution row.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum QueryEvaluationError {
    /// An error from the underlying RDF dataset.
    #[error(transparent)]
    Dataset(#[from] DatasetError),
    /// A multiset shape reached an operation it cannot take part in. This
    /// indicates a malformed algebra tree.
    #[error(transparent)]
    Multiset(#[from] IncomposableMultiset),
    /// The configured evaluation timeout elapsed.
    #[error("query evaluation timed out after {0:?}")]
    Timeout(Duration),
    /// `SERVICE` patterns require a federation layer this engine does not
    /// provide.
    #[error("SERVICE evaluation is not supported")]
    UnsupportedService,
    /// `DESCRIBE` resolution is delegated to a describe algorithm outside of
    /// the evaluator.
    #[error("DESCRIBE queries are not supported")]
    UnsupportedDescribe,
    /// An internal error that likely indicates a bug in the evaluator.
    #[error("internal error: {0}")]
    Internal(String),
}

impl QueryEvaluationError {
    pub(crate) fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }
}

/// An error from the dataset collaborator. The evaluator treats these as
/// fatal.
#[derive(Debug, thiserror::Error)]
#[error(transparent)]
pub struct DatasetError(Box<dyn Error + Send + Sync + 'static>);

impl DatasetError {
    pub fn new(error: impl Into<Box<dyn Error + Send + Sync + 'static>>) -> Self {
        Self(error.into())
    }
}

/// A recoverable, per-row expression evaluation error.
///
/// Operators handle these locally (dropping the row, leaving a variable
/// unbound, treating a filter as false); they never abort the query. The only
/// exception is [`Fatal`](Self::Fatal), which wraps a genuine evaluation
/// failure surfaced inside an expression (e.g. `EXISTS` hitting a dataset
/// error) and must be re-raised by the operator.
#[derive(Debug, thiserror::Error)]
pub enum ExpressionError {
    #[error("variable {0} is not bound")]
    UnboundVariable(Variable),
    #[error("type error: {0}")]
    Type(String),
    #[error("unsupported expression: {0}")]
    Unsupported(String),
    #[error(transparent)]
    Fatal(Box<QueryEvaluationError>),
}

impl ExpressionError {
    pub(crate) fn type_error(message: impl Into<String>) -> Self {
        Self::Type(message.into())
    }
}

impl From<QueryEvaluationError> for ExpressionError {
    fn from(error: QueryEvaluationError) -> Self {
        Self::Fatal(Box::new(error))
    }
}
