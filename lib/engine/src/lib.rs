mod dataset;
pub mod error;
mod eval;
mod results;

pub use dataset::{Dataset, GraphScope, MemoryDataset};
pub use error::{DatasetError, ExpressionError, QueryEvaluationError};
pub use eval::{evaluate_query, EvaluationContext, QueryOptions};
pub use results::{QueryResults, QuerySolutions};
