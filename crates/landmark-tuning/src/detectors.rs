//! Rule-based detectors for the Hypothesize phase.
//!
//! Detectors run in a fixed order against one [`Observation`]; each yields
//! at most one hypothesis. A detector error is reported and does not stop
//! the others.

use chrono::{DateTime, Utc};
use landmark_retrieval::{Baseline, WindowStats};
use landmark_types::{
    ActionPayload, Hypothesis, HypothesisKind, Risk, TuningSettings, WeightTarget,
};

use crate::error::TuningError;
use crate::target::IndexObservation;

/// Detector name of the latency regression rule.
pub const LATENCY_REGRESSION: &str = "latency_regression";

/// Padding applied to the observed extent when proposing new bounds.
const BOUNDS_PAD: f32 = 0.1;

/// Upper limit for widenings proposed by the exhaustion rule.
const MAX_PROPOSED_WIDENINGS: u32 = 32;
/// Upper bound on the candidate multiplier a retune may propose
const MAX_PROPOSED_MULTIPLIER: usize = 80;

/// Everything Observe collected for one cycle.
#[derive(Debug, Clone)]
pub struct Observation {
    pub cycle_id: String,
    pub at: DateTime<Utc>,
    pub window: WindowStats,
    pub baseline: Option<Baseline>,
    /// The baseline was set from this cycle's window
    pub baseline_established: bool,
    pub index: IndexObservation,
}

pub trait Detector: Send + Sync {
    fn name(&self) -> &'static str;

    fn detect(
        &self,
        observation: &Observation,
        settings: &TuningSettings,
    ) -> Result<Option<Hypothesis>, TuningError>;
}

/// The standard detector set, in evaluation order.
pub fn default_detectors() -> Vec<Box<dyn Detector>> {
    vec![
        Box::new(LatencyRegression),
        Box::new(PoolExhaustion),
        Box::new(LowImportancePrune),
        Box::new(NearDuplicates),
        Box::new(HotAtoms),
        Box::new(CacheWarm),
    ]
}

/// Sustained stage-1 latency above the baseline: rebuild the index.
pub struct LatencyRegression;

impl Detector for LatencyRegression {
    fn name(&self) -> &'static str {
        LATENCY_REGRESSION
    }

    fn detect(
        &self,
        obs: &Observation,
        settings: &TuningSettings,
    ) -> Result<Option<Hypothesis>, TuningError> {
        let Some(baseline) = obs.baseline else {
            return Ok(None);
        };
        if obs.window.latency_samples < settings.min_window_samples {
            return Ok(None);
        }

        let reference = baseline.stage1_p50_ms.max(1e-3);
        let ratio = obs.window.stage1_p50_ms / reference;
        if !ratio.is_finite() || ratio < settings.latency_regression_factor {
            return Ok(None);
        }

        let index = &obs.index.index;
        let bounds = if index.outside_fraction() >= settings.out_of_bounds_threshold {
            index
                .covering_bounds(BOUNDS_PAD)
                .map(|b| b.union(&index.params.bounds))
        } else {
            None
        };

        let priority = 90 + (ratio.floor() as u8).min(9);
        Ok(Some(Hypothesis::new(
            HypothesisKind::IndexRebuild,
            priority,
            Risk::Safe,
            format!(
                "stage-1 p50 {:.3}ms is {:.1}x the {:.3}ms baseline over {} samples",
                obs.window.stage1_p50_ms, ratio, baseline.stage1_p50_ms, obs.window.latency_samples
            ),
            ActionPayload::RebuildIndex {
                bounds,
                resolution_bits: None,
            },
        )))
    }
}

/// Sustained short candidate pools: resize bounds or widen the search.
pub struct PoolExhaustion;

impl Detector for PoolExhaustion {
    fn name(&self) -> &'static str {
        "pool_exhaustion"
    }

    fn detect(
        &self,
        obs: &Observation,
        settings: &TuningSettings,
    ) -> Result<Option<Hypothesis>, TuningError> {
        if obs.window.sample_count < settings.min_window_samples
            || obs.window.exhaustion_rate < settings.exhaustion_rate_threshold
        {
            return Ok(None);
        }

        let index = &obs.index.index;
        let outside = index.outside_fraction();
        if outside >= settings.out_of_bounds_threshold {
            let Some(bounds) = index.covering_bounds(BOUNDS_PAD) else {
                return Ok(None);
            };
            return Ok(Some(Hypothesis::new(
                HypothesisKind::IndexRebuild,
                80,
                Risk::Safe,
                format!(
                    "{:.0}% of queries exhausted the pool and {:.1}% of coordinates lie outside the index bounds",
                    obs.window.exhaustion_rate * 100.0,
                    outside * 100.0
                ),
                ActionPayload::RebuildIndex {
                    bounds: Some(bounds.union(&index.params.bounds)),
                    resolution_bits: None,
                },
            )));
        }

        let current = &obs.index.retrieval;
        if current.max_widenings >= MAX_PROPOSED_WIDENINGS
            && current.candidate_multiplier >= MAX_PROPOSED_MULTIPLIER
        {
            return Ok(None);
        }
        Ok(Some(Hypothesis::new(
            HypothesisKind::RetrievalRetune,
            70,
            Risk::Safe,
            format!(
                "{:.0}% of queries exhausted the pool after {:.1} widenings on average",
                obs.window.exhaustion_rate * 100.0,
                obs.window.mean_widenings
            ),
            ActionPayload::RetuneRetrieval {
                candidate_multiplier: (current.candidate_multiplier * 2)
                    .min(MAX_PROPOSED_MULTIPLIER)
                    .max(current.candidate_multiplier),
                initial_radius: current.initial_radius * 2.0,
                max_widenings: (current.max_widenings + 2)
                    .min(MAX_PROPOSED_WIDENINGS)
                    .max(current.max_widenings),
            },
        )))
    }
}

/// A cluster of unimportant, idle atoms: propose pruning them.
pub struct LowImportancePrune;

impl Detector for LowImportancePrune {
    fn name(&self) -> &'static str {
        "low_importance_prune"
    }

    fn detect(
        &self,
        obs: &Observation,
        settings: &TuningSettings,
    ) -> Result<Option<Hypothesis>, TuningError> {
        let candidates = &obs.index.prune_candidates;
        if candidates.len() < settings.prune_min_cluster.max(1) {
            return Ok(None);
        }
        let atom_ids: Vec<_> = candidates
            .iter()
            .take(settings.prune_max_batch)
            .copied()
            .collect();
        Ok(Some(Hypothesis::new(
            HypothesisKind::PruneLowImportance,
            40,
            Risk::RequiresApproval,
            format!(
                "{} atoms below importance {} with no access in {}s",
                atom_ids.len(),
                settings.prune_importance_floor,
                settings.prune_idle_secs
            ),
            ActionPayload::Prune { atom_ids },
        )))
    }
}

/// Atoms that project to nearly the same point and carry nearly the same vector.
pub struct NearDuplicates;

impl Detector for NearDuplicates {
    fn name(&self) -> &'static str {
        "near_duplicates"
    }

    fn detect(
        &self,
        obs: &Observation,
        _settings: &TuningSettings,
    ) -> Result<Option<Hypothesis>, TuningError> {
        let groups = &obs.index.duplicate_groups;
        if groups.is_empty() {
            return Ok(None);
        }
        let atoms: usize = groups.iter().map(|g| g.duplicates.len()).sum();
        Ok(Some(Hypothesis::new(
            HypothesisKind::MergeDuplicates,
            35,
            Risk::RequiresApproval,
            format!("{} near-duplicate atoms in {} groups", atoms, groups.len()),
            ActionPayload::Merge {
                groups: groups.clone(),
            },
        )))
    }
}

/// Frequently retrieved atoms: propose reinforcing their importance.
pub struct HotAtoms;

impl Detector for HotAtoms {
    fn name(&self) -> &'static str {
        "hot_atoms"
    }

    fn detect(
        &self,
        obs: &Observation,
        settings: &TuningSettings,
    ) -> Result<Option<Hypothesis>, TuningError> {
        let hot = &obs.index.hot_atoms;
        if hot.is_empty() {
            return Ok(None);
        }
        let targets: Vec<WeightTarget> = hot
            .iter()
            .take(settings.hot_atom_max_targets)
            .map(|(atom_id, _)| WeightTarget {
                atom_id: *atom_id,
                direction: 1.0,
            })
            .collect();
        Ok(Some(Hypothesis::new(
            HypothesisKind::WeightAdjust,
            30,
            Risk::RequiresApproval,
            format!(
                "{} atoms retrieved at least {} times",
                targets.len(),
                settings.hot_atom_min_hits
            ),
            ActionPayload::AdjustWeights { targets },
        )))
    }
}

/// Hot cached queries lost their answers to a change: re-run them.
pub struct CacheWarm;

impl Detector for CacheWarm {
    fn name(&self) -> &'static str {
        "cache_warm"
    }

    fn detect(
        &self,
        obs: &Observation,
        settings: &TuningSettings,
    ) -> Result<Option<Hypothesis>, TuningError> {
        let stale = obs.index.stale_hot_queries;
        if stale == 0 {
            return Ok(None);
        }
        Ok(Some(Hypothesis::new(
            HypothesisKind::CacheWarm,
            20,
            Risk::Safe,
            format!("{} hot cached queries are stale", stale),
            ActionPayload::WarmCache {
                limit: settings.cache_warm_limit.min(stale.max(1)),
            },
        )))
    }
}
