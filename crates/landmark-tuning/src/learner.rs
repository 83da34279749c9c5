//! Learn phase: outcome scoring, importance updates, and cycle pacing.
//!
//! The update rule is
//! `importance' = clamp(importance + learning_rate × score × direction)`,
//! applied at most once per (hypothesis, atom) and written together with its
//! audit entry in one batch.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use landmark_retrieval::WindowStats;
use landmark_storage::Storage;
use landmark_types::{AtomId, AuditEntry, Hypothesis, TuningSettings, WeightTarget};
use tracing::{debug, info, warn};

use crate::error::{LearningDivergence, TuningError};
use crate::target::TuningTarget;

/// An executed action whose effect has not been measured yet.
#[derive(Debug, Clone)]
pub struct PendingMeasurement {
    pub hypothesis: Hypothesis,
    pub executed_at: DateTime<Utc>,
    pub before: WindowStats,
    /// Weight targets armed by the action, applied once scored
    pub weight_targets: Vec<WeightTarget>,
    pub cycles_waited: u32,
}

/// Result of one weight update attempt.
#[derive(Debug, Clone)]
pub enum WeightUpdate {
    Applied(AuditEntry),
    AlreadyApplied,
    UnknownAtom,
    Diverged(LearningDivergence),
}

/// Signed improvement from `before` to `after`, in `[-1, 1]`.
///
/// Positive means the cost went down.
pub fn outcome_score(before: &WindowStats, after: &WindowStats) -> Result<f64, String> {
    let b = before.cost();
    let a = after.cost();
    if !b.is_finite() || !a.is_finite() {
        return Err(format!("non-finite cost (before {}, after {})", b, a));
    }
    if b <= 0.0 {
        return Err(format!("no baseline cost to compare against (before {})", b));
    }
    let score = (b - a) / b;
    if !score.is_finite() {
        return Err(format!("non-finite score {}", score));
    }
    Ok(score.clamp(-1.0, 1.0))
}

/// Delay before the next cycle.
///
/// Shrinks as the largest |score| grows and stretches as it nears zero,
/// within `[min_delay, max_delay]`. With nothing measured the previous
/// delay grows by half.
pub fn next_delay(scores: &[f64], last: Duration, settings: &TuningSettings) -> Duration {
    let min = settings.min_delay();
    let max = settings.max_delay();
    let peak = scores
        .iter()
        .filter(|s| s.is_finite())
        .fold(None::<f64>, |acc, s| Some(acc.map_or(s.abs(), |a| a.max(s.abs()))));

    let secs = match peak {
        None => last.as_secs_f64() * 1.5,
        Some(p) if p <= f64::EPSILON => max.as_secs_f64(),
        Some(p) => settings.base_delay().as_secs_f64() * settings.reference_score / p,
    };
    Duration::from_secs_f64(secs.clamp(min.as_secs_f64(), max.as_secs_f64()))
}

pub struct Learner {
    storage: Arc<Storage>,
    target: Arc<dyn TuningTarget>,
    learning_rate: f32,
    settings: TuningSettings,
}

impl Learner {
    pub fn new(storage: Arc<Storage>, target: Arc<dyn TuningTarget>, settings: TuningSettings) -> Self {
        Self {
            storage,
            target,
            learning_rate: settings.learning_rate,
            settings,
        }
    }

    pub fn learning_rate(&self) -> f32 {
        self.learning_rate
    }

    /// Apply one importance update and append its audit entry.
    pub fn apply_weight_update(
        &self,
        cycle_id: &str,
        hypothesis_id: &str,
        atom_id: &AtomId,
        direction: f32,
        score: f64,
    ) -> Result<WeightUpdate, TuningError> {
        if self.storage.is_weight_update_applied(hypothesis_id, atom_id)? {
            return Ok(WeightUpdate::AlreadyApplied);
        }

        // Read, persist, and install while the target excludes other writes
        let mut outcome = WeightUpdate::UnknownAtom;
        let mut apply = |current: Option<f32>| -> Result<Option<f32>, TuningError> {
            let Some(previous) = current.or(self.storage.get_importance(atom_id)?) else {
                return Ok(None);
            };

            let step = self.learning_rate as f64 * score * direction as f64;
            let raw = previous as f64 + step;
            if !raw.is_finite() || !previous.is_finite() {
                let divergence = LearningDivergence::new(
                    hypothesis_id,
                    format!("update {} + {} is not finite", previous, step),
                )
                .for_atom(*atom_id);
                warn!(hypothesis_id, atom_id = %atom_id.short(), reason = %divergence.reason, "Skipping divergent update");
                outcome = WeightUpdate::Diverged(divergence);
                return Ok(None);
            }
            let value = self.settings.clamp_importance(raw as f32);

            let entry = AuditEntry {
                seq: 0,
                timestamp: Utc::now(),
                cycle_id: cycle_id.to_string(),
                hypothesis_id: hypothesis_id.to_string(),
                atom_id: *atom_id,
                previous,
                delta: value - previous,
                value,
                outcome_score: score,
                learning_rate: self.learning_rate,
            };

            match self.storage.record_weight_update(entry)? {
                Some(recorded) => {
                    info!(
                        cycle_id,
                        hypothesis_id,
                        atom_id = %atom_id.short(),
                        previous,
                        value = recorded.value,
                        seq = recorded.seq,
                        "Importance updated"
                    );
                    let value = recorded.value;
                    outcome = WeightUpdate::Applied(recorded);
                    Ok(Some(value))
                }
                None => {
                    debug!(hypothesis_id, atom_id = %atom_id.short(), "Update raced with an identical one");
                    outcome = WeightUpdate::AlreadyApplied;
                    Ok(None)
                }
            }
        };
        self.target.update_importance(atom_id, &mut apply)?;
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockTarget;
    use landmark_types::Atom;
    use tempfile::TempDir;

    fn learner_with(importance: f32) -> (Learner, Arc<MockTarget>, Arc<Storage>, AtomId, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let storage = Arc::new(Storage::open(temp_dir.path()).unwrap());
        let mut atom = Atom::new(vec![1.0, 2.0], "blob://a");
        atom.importance = importance;
        storage.put_atom(&atom).unwrap();
        let target = Arc::new(MockTarget::default());
        target.importances.lock().insert(atom.id, importance);
        let learner = Learner::new(
            Arc::clone(&storage),
            target.clone(),
            TuningSettings::default(),
        );
        (learner, target, storage, atom.id, temp_dir)
    }

    #[test]
    fn test_half_score_moves_importance_by_five_hundredths() {
        let (learner, target, storage, id, _temp) = learner_with(1.0);
        let WeightUpdate::Applied(entry) = learner
            .apply_weight_update("cycle-1", "hyp-1", &id, 1.0, 0.5)
            .unwrap()
        else {
            panic!("expected applied");
        };
        assert!((entry.value - 1.05).abs() < 1e-6);
        assert!((entry.delta - 0.05).abs() < 1e-6);
        assert_eq!(storage.get_importance(&id).unwrap(), Some(entry.value));
        assert_eq!(target.importances.lock()[&id], entry.value);

        let tail = storage.audit_tail(10).unwrap();
        assert_eq!(tail.len(), 1);
        assert_eq!(tail[0].delta, entry.delta);
        assert_eq!(tail[0].cycle_id, "cycle-1");
    }

    #[test]
    fn test_update_is_idempotent() {
        let (learner, _target, storage, id, _temp) = learner_with(1.0);
        learner.apply_weight_update("c", "h", &id, 1.0, 0.5).unwrap();
        assert!(matches!(
            learner.apply_weight_update("c", "h", &id, 1.0, 0.5).unwrap(),
            WeightUpdate::AlreadyApplied
        ));
        assert_eq!(storage.audit_tail(10).unwrap().len(), 1);
    }

    #[test]
    fn test_update_is_clamped() {
        let (learner, _target, _storage, id, _temp) = learner_with(0.01);
        let WeightUpdate::Applied(entry) = learner
            .apply_weight_update("c", "h", &id, -1.0, 1.0)
            .unwrap()
        else {
            panic!("expected applied");
        };
        assert_eq!(entry.value, 0.0);
        assert!((entry.delta + 0.01).abs() < 1e-6);
    }

    #[test]
    fn test_divergent_update_skipped() {
        let (learner, _target, storage, id, _temp) = learner_with(1.0);
        assert!(matches!(
            learner.apply_weight_update("c", "h", &id, 1.0, f64::NAN).unwrap(),
            WeightUpdate::Diverged(_)
        ));
        assert!(storage.audit_tail(10).unwrap().is_empty());
        assert_eq!(storage.get_importance(&id).unwrap(), Some(1.0));
    }

    #[test]
    fn test_outcome_score() {
        let before = WindowStats {
            stage1_p50_ms: 8.0,
            stage2_p50_ms: 2.0,
            ..WindowStats::default()
        };
        let after = WindowStats {
            stage1_p50_ms: 4.0,
            stage2_p50_ms: 1.0,
            ..WindowStats::default()
        };
        assert!((outcome_score(&before, &after).unwrap() - 0.5).abs() < 1e-12);
        assert!((outcome_score(&after, &before).unwrap() + 1.0).abs() < 1e-12);
        assert!(outcome_score(&WindowStats::default(), &after).is_err());
    }

    #[test]
    fn test_next_delay_inverse_to_score() {
        let settings = TuningSettings::default();
        let last = settings.base_delay();
        let big = next_delay(&[0.8], last, &settings);
        let small = next_delay(&[0.02], last, &settings);
        assert!(big < settings.base_delay());
        assert!(small > settings.base_delay());
        assert_eq!(next_delay(&[-0.8], last, &settings), big);
        assert_eq!(next_delay(&[0.0], last, &settings), settings.max_delay());
        assert!(next_delay(&[100.0], last, &settings) >= settings.min_delay());

        let idle = next_delay(&[], Duration::from_secs(100), &settings);
        assert_eq!(idle, Duration::from_secs(150));
        assert_eq!(
            next_delay(&[], settings.max_delay(), &settings),
            settings.max_delay()
        );
    }
}
