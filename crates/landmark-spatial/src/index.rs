//! Spatial index trait and types.
//!
//! Defines the interface the retrieval engine uses for stage-1 candidate
//! lookup, independent of the tree implementation behind it.

use std::time::Duration;

use landmark_types::{AtomId, Bounds, Coord, IndexParams, ProjectedCoordinate};
use serde::Serialize;

use crate::error::IndexError;

/// One range-query hit.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbor {
    pub atom_id: AtomId,
    /// Euclidean distance in projected space
    pub distance: f32,
}

/// Hits ordered by distance, then atom id.
#[derive(Debug, Clone, Default)]
pub struct RangeResult {
    pub hits: Vec<Neighbor>,
    /// Tree nodes expanded while answering
    pub nodes_visited: usize,
}

impl RangeResult {
    pub fn len(&self) -> usize {
        self.hits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hits.is_empty()
    }
}

/// Summary of a completed shadow rebuild.
#[derive(Debug, Clone, Serialize)]
pub struct RebuildStats {
    pub entries: usize,
    /// Writes journaled during the build and replayed before the swap
    pub replayed: usize,
    pub height: usize,
    pub generation: u64,
    pub clamped: usize,
    pub elapsed: Duration,
}

/// Index statistics
#[derive(Debug, Clone, Serialize)]
pub struct IndexStats {
    pub len: usize,
    pub height: usize,
    /// Bumped by every structural change
    pub generation: u64,
    pub params: IndexParams,
    /// Per-axis extent of all stored coordinates
    pub extent: Option<(Coord, Coord)>,
    /// Entries whose coordinate lies outside `params.bounds`
    pub outside_bounds: usize,
    pub clamped_total: u64,
    pub rejected_total: u64,
    pub rebuild_count: u64,
    pub last_rebuild_ms: u64,
    pub queries: u64,
    pub nodes_visited_total: u64,
}

impl IndexStats {
    pub fn outside_fraction(&self) -> f64 {
        if self.len == 0 {
            0.0
        } else {
            self.outside_bounds as f64 / self.len as f64
        }
    }

    /// Cube covering the observed extent, padded by `pad` of its span.
    pub fn covering_bounds(&self, pad: f32) -> Option<Bounds> {
        self.extent.map(|(min, max)| Bounds::covering(&min, &max, pad))
    }

    pub fn mean_nodes_visited(&self) -> f64 {
        if self.queries == 0 {
            0.0
        } else {
            self.nodes_visited_total as f64 / self.queries as f64
        }
    }
}

/// Trait for spatial indexes over projected coordinates.
///
/// Implementations must allow range queries to proceed while inserts,
/// removals, and rebuilds are in progress.
pub trait SpatialIndex: Send + Sync {
    /// Insert or move an entry. Returns its curve key.
    fn insert(&self, atom_id: AtomId, coord: Coord) -> Result<u64, IndexError>;

    /// Remove an entry. Returns false if it was not present.
    fn remove(&self, atom_id: &AtomId) -> Result<bool, IndexError>;

    /// Up to `limit` entries within `radius` of `center`, nearest first.
    fn range_query(&self, center: &Coord, radius: f32, limit: usize) -> RangeResult;

    /// Replace the contents with `entries`, built in a shadow structure.
    ///
    /// Writes arriving while the shadow is built are replayed onto it
    /// before the swap. `entries` must be a complete snapshot.
    fn rebuild(
        &self,
        entries: Vec<(AtomId, Coord)>,
        params: IndexParams,
    ) -> Result<RebuildStats, IndexError>;

    /// Rebuild from the index's own entries, e.g. to apply new parameters.
    fn reindex(&self, params: IndexParams) -> Result<RebuildStats, IndexError>;

    /// Stored coordinate and key of an entry.
    fn entry(&self, atom_id: &AtomId) -> Option<ProjectedCoordinate>;

    fn contains(&self, atom_id: &AtomId) -> bool {
        self.entry(atom_id).is_some()
    }

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn params(&self) -> IndexParams;

    fn stats(&self) -> IndexStats;
}
