//! In-memory tuning target for unit tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use landmark_types::{AtomId, Bounds, MergeGroup, TuningSettings};
use parking_lot::Mutex;

use crate::detectors::tests::empty_index_observation;
use crate::error::TuningError;
use crate::target::{IndexObservation, TuningTarget};

#[derive(Default)]
pub(crate) struct MockTarget {
    pub importances: Mutex<HashMap<AtomId, f32>>,
    pub observation: Mutex<Option<IndexObservation>>,
    /// Names of operations performed, in order
    pub calls: Mutex<Vec<String>>,
    pub pruned: Mutex<Vec<AtomId>>,
    /// Remaining failures before operations succeed
    pub fail_next: AtomicU32,
}

impl MockTarget {
    fn call(&self, name: &str) -> Result<(), TuningError> {
        if self
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(TuningError::Target(format!("{} failed", name)));
        }
        self.calls.lock().push(name.to_string());
        Ok(())
    }
}

#[async_trait]
impl TuningTarget for MockTarget {
    async fn observe_index(&self, _: &TuningSettings) -> Result<IndexObservation, TuningError> {
        Ok(self
            .observation
            .lock()
            .clone()
            .unwrap_or_else(empty_index_observation))
    }

    async fn rebuild_index(&self, _: Option<Bounds>, _: Option<u8>) -> Result<(), TuningError> {
        self.call("rebuild_index")
    }

    async fn retune_retrieval(&self, _: usize, _: f32, _: u32) -> Result<(), TuningError> {
        self.call("retune_retrieval")
    }

    async fn prune(&self, atom_ids: &[AtomId]) -> Result<usize, TuningError> {
        self.call("prune")?;
        self.pruned.lock().extend_from_slice(atom_ids);
        Ok(atom_ids.len())
    }

    async fn merge(&self, groups: &[MergeGroup]) -> Result<usize, TuningError> {
        self.call("merge")?;
        Ok(groups.len())
    }

    async fn warm_cache(&self, limit: usize) -> Result<usize, TuningError> {
        self.call("warm_cache")?;
        Ok(limit)
    }

    fn importance(&self, atom_id: &AtomId) -> Option<f32> {
        self.importances.lock().get(atom_id).copied()
    }

    fn update_importance(
        &self,
        atom_id: &AtomId,
        update: &mut dyn FnMut(Option<f32>) -> Result<Option<f32>, TuningError>,
    ) -> Result<(), TuningError> {
        let mut importances = self.importances.lock();
        if let Some(value) = update(importances.get(atom_id).copied())? {
            importances.insert(*atom_id, value);
        }
        Ok(())
    }

    fn reset_hits(&self, _: &[AtomId]) {}
}
