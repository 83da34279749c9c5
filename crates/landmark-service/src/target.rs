//! Tuning-loop access to the engine.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use landmark_tuning::{IndexObservation, TuningError, TuningTarget};
use landmark_types::{AtomId, Bounds, MergeGroup, TuningSettings};
use tracing::info;

use crate::core::EngineCore;

/// Runs tuning actions against the engine on the blocking pool.
pub(crate) struct CoreTarget(pub(crate) Arc<EngineCore>);

impl CoreTarget {
    async fn blocking<T, F>(&self, f: F) -> Result<T, TuningError>
    where
        T: Send + 'static,
        F: FnOnce(&EngineCore) -> Result<T, TuningError> + Send + 'static,
    {
        let core = Arc::clone(&self.0);
        tokio::task::spawn_blocking(move || f(&core))
            .await
            .map_err(|e| TuningError::Target(format!("task failed: {}", e)))?
    }
}

fn target_err(e: impl std::fmt::Display) -> TuningError {
    TuningError::Target(e.to_string())
}

#[async_trait]
impl TuningTarget for CoreTarget {
    async fn observe_index(
        &self,
        settings: &TuningSettings,
    ) -> Result<IndexObservation, TuningError> {
        let settings = settings.clone();
        self.blocking(move |core| {
            let retrieval = &core.retrieval;
            let catalog = retrieval.catalog();
            let idle_before = Utc::now() - settings.prune_idle();
            Ok(IndexObservation {
                atom_count: catalog.len(),
                index: retrieval.index().stats(),
                retrieval: retrieval.settings(),
                prune_candidates: catalog.prune_candidates(
                    settings.prune_importance_floor,
                    idle_before,
                    settings.prune_max_batch,
                ),
                duplicate_groups: retrieval.near_duplicate_groups(
                    settings.duplicate_distance,
                    settings.duplicate_min_similarity,
                    settings.duplicate_scan_limit,
                    settings.max_merge_groups,
                ),
                hot_atoms: catalog.hot_atoms(settings.hot_atom_min_hits, settings.hot_atom_max_targets),
                stale_hot_queries: retrieval
                    .cache()
                    .stale_hot(catalog.generation(), settings.cache_warm_min_hits),
            })
        })
        .await
    }

    async fn rebuild_index(
        &self,
        bounds: Option<Bounds>,
        resolution_bits: Option<u8>,
    ) -> Result<(), TuningError> {
        self.blocking(move |core| {
            let mut params = core.retrieval.index().params();
            if let Some(bounds) = bounds {
                params.bounds = bounds;
            }
            if let Some(bits) = resolution_bits {
                params.resolution_bits = bits;
            }
            params.validate().map_err(TuningError::Target)?;

            let stats = core.retrieval.reindex(params).map_err(target_err)?;
            core.storage.put_index_params(&params)?;
            info!(
                entries = stats.entries,
                bounds_min = params.bounds.min,
                bounds_max = params.bounds.max,
                resolution_bits = params.resolution_bits,
                "Index rebuilt by tuning"
            );
            Ok(())
        })
        .await
    }

    async fn retune_retrieval(
        &self,
        candidate_multiplier: usize,
        initial_radius: f32,
        max_widenings: u32,
    ) -> Result<(), TuningError> {
        let mut settings = self.0.retrieval.settings();
        settings.candidate_multiplier = candidate_multiplier;
        settings.initial_radius = initial_radius;
        settings.max_widenings = max_widenings;
        self.0
            .retrieval
            .set_settings(settings.clone())
            .map_err(target_err)?;
        self.0.storage.put_retrieval_settings(&settings)?;
        Ok(())
    }

    async fn prune(&self, atom_ids: &[AtomId]) -> Result<usize, TuningError> {
        let ids = atom_ids.to_vec();
        self.blocking(move |core| core.remove_many(&ids).map_err(target_err))
            .await
    }

    async fn merge(&self, groups: &[MergeGroup]) -> Result<usize, TuningError> {
        let groups = groups.to_vec();
        self.blocking(move |core| {
            let mut removed = 0;
            for group in &groups {
                removed += core
                    .merge(&group.canonical, &group.duplicates)
                    .map_err(target_err)?;
            }
            Ok(removed)
        })
        .await
    }

    async fn warm_cache(&self, limit: usize) -> Result<usize, TuningError> {
        self.blocking(move |core| Ok(core.retrieval.warm_cache(limit)))
            .await
    }

    fn importance(&self, atom_id: &AtomId) -> Option<f32> {
        self.0.catalog().importance(atom_id)
    }

    fn update_importance(
        &self,
        atom_id: &AtomId,
        update: &mut dyn FnMut(Option<f32>) -> Result<Option<f32>, TuningError>,
    ) -> Result<(), TuningError> {
        self.0.update_importance(atom_id, update)
    }

    fn reset_hits(&self, atom_ids: &[AtomId]) {
        self.0.catalog().reset_hits(atom_ids);
    }
}
