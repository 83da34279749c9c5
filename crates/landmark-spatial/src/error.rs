//! Spatial index error types.

use landmark_types::{Bounds, Coord};
use thiserror::Error;

/// Errors that can occur during spatial index operations.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum IndexError {
    /// Coordinate outside the configured bounding box under the reject policy
    #[error("Coordinate {coord:?} outside bounds [{}, {}]", .bounds.min, .bounds.max)]
    OutOfBounds { coord: Coord, bounds: Bounds },

    /// Coordinate has a NaN or infinite component
    #[error("Invalid coordinate: {0:?}")]
    InvalidCoordinate(Coord),

    /// Index parameters failed validation
    #[error("Invalid index parameters: {0}")]
    InvalidParams(String),

    /// A shadow rebuild is already running
    #[error("Rebuild already in progress")]
    RebuildInProgress,

    /// Tree and location table disagree
    #[error("Index consistency error: {0}")]
    Consistency(String),
}
