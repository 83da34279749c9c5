//! Retrieval error types.

use std::fmt;
use std::time::Duration;

use landmark_projection::ProjectionError;
use landmark_spatial::IndexError;
use thiserror::Error;

/// Query state machine position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryStage {
    Idle,
    Stage1,
    Stage2,
    Done,
}

impl fmt::Display for QueryStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueryStage::Idle => write!(f, "idle"),
            QueryStage::Stage1 => write!(f, "stage 1"),
            QueryStage::Stage2 => write!(f, "stage 2"),
            QueryStage::Done => write!(f, "done"),
        }
    }
}

/// Errors returned by the retrieval engine.
///
/// An empty or partial result is not an error; see
/// [`Diagnostic`](crate::Diagnostic).
#[derive(Debug, Error)]
pub enum RetrievalError {
    #[error("Invalid query: {0}")]
    InvalidQuery(#[from] ProjectionError),

    #[error("final_k must be > 0, got {0}")]
    InvalidK(usize),

    #[error("Query timed out before {stage} after {elapsed:?}")]
    Timeout { stage: QueryStage, elapsed: Duration },

    #[error("Query cancelled before {stage}")]
    Cancelled { stage: QueryStage },

    #[error("Index error: {0}")]
    Index(#[from] IndexError),

    #[error("Invalid retrieval settings: {0}")]
    InvalidSettings(String),
}
