//! Service error types.

use landmark_projection::ProjectionError;
use landmark_retrieval::RetrievalError;
use landmark_spatial::IndexError;
use landmark_storage::StorageError;
use landmark_tuning::TuningError;
use landmark_types::{AtomId, LandmarkError};
use thiserror::Error;

/// Errors surfaced synchronously to an ingest caller.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("Invalid vector: {0}")]
    Projection(#[from] ProjectionError),

    /// Producer-supplied id differs from the content hash
    #[error("Atom id mismatch: expected {expected}, computed {computed}")]
    IdMismatch { expected: AtomId, computed: AtomId },

    #[error("Index error: {0}")]
    Index(#[from] IndexError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

impl IngestError {
    /// Whether retrying the same request can never succeed.
    pub fn is_permanent(&self) -> bool {
        !matches!(self, IngestError::Storage(_))
    }
}

impl From<RetrievalError> for IngestError {
    fn from(err: RetrievalError) -> Self {
        match err {
            RetrievalError::InvalidQuery(e) => IngestError::Projection(e),
            RetrievalError::Index(e) => IngestError::Index(e),
            other => IngestError::Index(IndexError::Consistency(other.to_string())),
        }
    }
}

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("Configuration error: {0}")]
    Config(#[from] LandmarkError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Projection error: {0}")]
    Projection(#[from] ProjectionError),

    #[error("Index error: {0}")]
    Index(#[from] IndexError),

    #[error("Retrieval error: {0}")]
    Retrieval(#[from] RetrievalError),

    #[error("Ingest error: {0}")]
    Ingest(#[from] IngestError),

    #[error("Tuning error: {0}")]
    Tuning(#[from] TuningError),

    #[error("Background task failed: {0}")]
    Task(String),
}
