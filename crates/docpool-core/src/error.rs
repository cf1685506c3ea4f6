//! Typed errors raised by the feature index.
//!
//! Everything else in the pipeline reports through `anyhow`; these are
//! the cases callers are expected to match on.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IndexError {
    /// Keyword extraction or transform was attempted before any fit.
    #[error("feature index is not trained; run vectorization first")]
    NotTrained,

    #[error("row {row} is out of range for an index of {rows} rows")]
    RowOutOfRange { row: usize, rows: usize },

    /// A persisted vector could not be turned back into a row.
    #[error("malformed sparse vector: {0}")]
    MalformedVector(String),
}
