//! Projection error types.

use thiserror::Error;

/// Errors raised while building landmarks or projecting a vector.
///
/// Bad input is rejected at ingress and never silently coerced.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ProjectionError {
    /// Input dimensionality differs from the landmark dimensionality
    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// Input contains NaN or infinite components
    #[error("Invalid vector: {0}")]
    InvalidVector(String),

    /// Normalization requested for an all-zero vector
    #[error("Cannot normalize a zero vector")]
    ZeroVector,

    /// Landmark configuration cannot produce an orthonormal basis
    #[error("Invalid landmark configuration: {0}")]
    InvalidConfig(String),

    /// Persisted landmarks do not match their fingerprint
    #[error("Landmark fingerprint mismatch: stored {stored}, computed {computed}")]
    FingerprintMismatch { stored: String, computed: String },
}
