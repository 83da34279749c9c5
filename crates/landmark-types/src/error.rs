//! Error types shared across the landmark workspace.

use thiserror::Error;

/// Unified error type for configuration and domain-type failures.
#[derive(Debug, Error)]
pub enum LandmarkError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Malformed identifier
    #[error("Invalid atom id: {0}")]
    InvalidAtomId(String),

    /// Invalid input error
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}
