//! # landmark-projection
//!
//! Maps high-dimensional embedding vectors onto a small fixed number of
//! orthonormal landmark axes.
//!
//! The landmarks are generated once from a fixed seed and never
//! re-randomized, so a coordinate can always be recomputed from the raw
//! vector alone. Projection is linear, which makes it continuous: small
//! input perturbations move the coordinate by at most the same amount.

pub mod error;
pub mod projector;

pub use error::ProjectionError;
pub use projector::{validate_vector, Projector};
