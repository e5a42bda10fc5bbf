#![doc = include_str!("../README.md")]
#![doc(test(attr(deny(warnings))))]

pub mod model {
    pub use rdf_mosaic_model::*;
}

pub mod engine {
    pub use rdf_mosaic_engine::*;
}

// The parser collaborator, re-exported so callers can build algebra trees
// without adding their own dependency on it.
pub use spargebra;

pub use rdf_mosaic_engine::{
    evaluate_query, Dataset, DatasetError, EvaluationContext, ExpressionError, GraphScope,
    MemoryDataset, QueryEvaluationError, QueryOptions, QueryResults, QuerySolutions,
};
