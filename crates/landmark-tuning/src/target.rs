//! The seam between the tuning loop and the engine it tunes.

use async_trait::async_trait;
use landmark_spatial::IndexStats;
use landmark_types::{AtomId, Bounds, MergeGroup, RetrievalSettings, TuningSettings};

use crate::error::TuningError;

/// Index and catalog state read during Observe.
#[derive(Debug, Clone)]
pub struct IndexObservation {
    pub atom_count: usize,
    pub index: IndexStats,
    pub retrieval: RetrievalSettings,
    /// Low-importance idle atoms, least important first
    pub prune_candidates: Vec<AtomId>,
    pub duplicate_groups: Vec<MergeGroup>,
    /// Most retrieved atoms with their hit counts
    pub hot_atoms: Vec<(AtomId, u64)>,
    /// Frequently requested cached queries invalidated by a change
    pub stale_hot_queries: usize,
}

/// Operations the loop may perform on the engine.
///
/// Implementations must be idempotent: an action may be retried after a
/// partial failure.
#[async_trait]
pub trait TuningTarget: Send + Sync {
    async fn observe_index(
        &self,
        settings: &TuningSettings,
    ) -> Result<IndexObservation, TuningError>;

    /// Rebuild into a shadow index, optionally with new bounds or resolution.
    async fn rebuild_index(
        &self,
        bounds: Option<Bounds>,
        resolution_bits: Option<u8>,
    ) -> Result<(), TuningError>;

    async fn retune_retrieval(
        &self,
        candidate_multiplier: usize,
        initial_radius: f32,
        max_widenings: u32,
    ) -> Result<(), TuningError>;

    /// Remove atoms. Returns how many were present.
    async fn prune(&self, atom_ids: &[AtomId]) -> Result<usize, TuningError>;

    /// Collapse duplicates onto canonicals. Returns atoms removed.
    async fn merge(&self, groups: &[MergeGroup]) -> Result<usize, TuningError>;

    /// Re-run stale hot cached queries. Returns how many ran.
    async fn warm_cache(&self, limit: usize) -> Result<usize, TuningError>;

    fn importance(&self, atom_id: &AtomId) -> Option<f32>;

    /// Read-modify-write an atom's importance, serialized with the
    /// engine's other writes. `update` receives the in-memory value and
    /// returns the persisted value to install, if any.
    fn update_importance(
        &self,
        atom_id: &AtomId,
        update: &mut dyn FnMut(Option<f32>) -> Result<Option<f32>, TuningError>,
    ) -> Result<(), TuningError>;

    fn reset_hits(&self, atom_ids: &[AtomId]);
}
