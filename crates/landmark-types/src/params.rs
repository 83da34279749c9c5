//! Persisted index parameters and the landmark record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::atom::{Coord, PROJECTED_DIMS};

/// Cubic bounding domain `[min, max]^k` for curve quantization.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    pub min: f32,
    pub max: f32,
}

impl Bounds {
    pub fn new(min: f32, max: f32) -> Self {
        Self { min, max }
    }

    pub fn span(&self) -> f32 {
        self.max - self.min
    }

    pub fn is_valid(&self) -> bool {
        self.min.is_finite() && self.max.is_finite() && self.max > self.min
    }

    pub fn contains(&self, coord: &Coord) -> bool {
        coord.iter().all(|c| *c >= self.min && *c <= self.max)
    }

    /// Smallest cube covering a per-axis extent, padded by `pad` of its span.
    pub fn covering(min: &Coord, max: &Coord, pad: f32) -> Self {
        let lo = min.iter().copied().fold(f32::INFINITY, f32::min);
        let hi = max.iter().copied().fold(f32::NEG_INFINITY, f32::max);
        let span = (hi - lo).max(f32::EPSILON);
        Self {
            min: lo - span * pad,
            max: hi + span * pad,
        }
    }

    /// Union of this cube with another.
    pub fn union(&self, other: &Bounds) -> Self {
        Self {
            min: self.min.min(other.min),
            max: self.max.max(other.max),
        }
    }
}

impl Default for Bounds {
    fn default() -> Self {
        Self { min: -1.0, max: 1.0 }
    }
}

/// What to do with a coordinate outside the configured bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutOfBoundsPolicy {
    /// Clamp to the boundary (lossy for the curve key only) and log
    #[default]
    Clamp,
    /// Reject the insert with an out-of-bounds error
    Reject,
}

/// Largest resolution for which `k` dimensions still fit a `u64` key.
pub const MAX_RESOLUTION_BITS: u8 = (64 / PROJECTED_DIMS) as u8;

/// Spatial index configuration that the tuning loop may change.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct IndexParams {
    pub bounds: Bounds,
    /// Quantization bits per dimension for the curve key
    pub resolution_bits: u8,
    pub out_of_bounds: OutOfBoundsPolicy,
    /// Maximum entries per tree node before it splits
    pub max_node_entries: usize,
}

impl Default for IndexParams {
    fn default() -> Self {
        Self {
            bounds: Bounds::default(),
            resolution_bits: 16,
            out_of_bounds: OutOfBoundsPolicy::Clamp,
            max_node_entries: 16,
        }
    }
}

impl IndexParams {
    pub fn validate(&self) -> Result<(), String> {
        if !self.bounds.is_valid() {
            return Err(format!(
                "bounds must be finite with max > min, got [{}, {}]",
                self.bounds.min, self.bounds.max
            ));
        }
        if self.resolution_bits == 0 || self.resolution_bits > MAX_RESOLUTION_BITS {
            return Err(format!(
                "resolution_bits must be 1-{}, got {}",
                MAX_RESOLUTION_BITS, self.resolution_bits
            ));
        }
        if self.max_node_entries < 4 {
            return Err(format!(
                "max_node_entries must be >= 4, got {}",
                self.max_node_entries
            ));
        }
        Ok(())
    }
}

/// Persisted landmark basis.
///
/// Changing the seed or dimension produces a new fingerprint; the stored
/// version is bumped and every projected coordinate is recomputed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LandmarkRecord {
    pub version: u32,
    pub seed: u64,
    pub dimension: usize,
    pub normalize: bool,
    /// Hex SHA-256 over the landmark vectors and generation inputs
    pub fingerprint: String,
    pub vectors: Vec<Vec<f64>>,
    pub created_at: DateTime<Utc>,
}
