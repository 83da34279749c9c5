//! # landmark-spatial
//!
//! Spatial indexing over projected coordinates.
//!
//! ## Features
//! - Hilbert curve keys over a quantized, bounded cube
//! - `SpatialIndex` trait decoupled from any storage engine
//! - Copy-on-write R-tree: readers load an immutable version and never
//!   block on writers
//! - Online rebuild into a shadow tree (Hilbert-packed), with writes
//!   journaled and replayed before the atomic swap

pub mod curve;
pub mod error;
pub mod index;
pub mod rtree;

pub use curve::{hilbert_cell, hilbert_key, CurveIndexer, Linearized};
pub use error::IndexError;
pub use index::{IndexStats, Neighbor, RangeResult, RebuildStats, SpatialIndex};
pub use rtree::{RTreeIndex, Rect};
