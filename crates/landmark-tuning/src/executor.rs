//! Act-phase execution with bounded retries.

use std::sync::Arc;
use std::time::Duration;

use backoff::{backoff::Backoff, ExponentialBackoff};
use chrono::Utc;
use landmark_types::{ActionPayload, WeightTarget};
use tracing::{debug, error, warn};

use crate::approvals::Executable;
use crate::error::{ActionExecutionFailure, TuningError};
use crate::target::TuningTarget;

/// What a successful execution changed.
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionEffect {
    /// The engine was changed directly
    Applied,
    /// Weight targets validated; Learn applies them once the outcome is measured
    WeightsArmed(Vec<WeightTarget>),
}

pub struct ActionExecutor {
    target: Arc<dyn TuningTarget>,
    max_attempts: u32,
    initial_interval: Duration,
}

impl ActionExecutor {
    pub fn new(target: Arc<dyn TuningTarget>, max_attempts: u32, initial_interval: Duration) -> Self {
        Self {
            target,
            max_attempts: max_attempts.max(1),
            initial_interval,
        }
    }

    /// Run an action, retrying failures with exponential backoff.
    pub async fn execute(
        &self,
        action: &Executable,
    ) -> Result<ExecutionEffect, ActionExecutionFailure> {
        let hypothesis = action.hypothesis();
        let mut backoff = ExponentialBackoff {
            initial_interval: self.initial_interval,
            max_elapsed_time: None,
            ..Default::default()
        };

        let mut attempts = 0;

        loop {
            attempts += 1;
            debug!(
                hypothesis_id = %hypothesis.id,
                kind = %hypothesis.kind,
                attempt = attempts,
                "Executing action"
            );

            match self.apply(&hypothesis.payload).await {
                Ok(effect) => return Ok(effect),
                Err(e) => {
                    if attempts >= self.max_attempts {
                        error!(
                            alert = true,
                            hypothesis_id = %hypothesis.id,
                            kind = %hypothesis.kind,
                            attempts,
                            error = %e,
                            "Action failed after max retries"
                        );
                        return Err(ActionExecutionFailure {
                            hypothesis_id: hypothesis.id.clone(),
                            kind: hypothesis.kind,
                            attempts,
                            message: e.to_string(),
                            at: Utc::now(),
                        });
                    }

                    match backoff.next_backoff() {
                        Some(duration) => {
                            warn!(
                                hypothesis_id = %hypothesis.id,
                                error = %e,
                                retry_in_ms = duration.as_millis() as u64,
                                "Action failed, retrying"
                            );
                            tokio::time::sleep(duration).await;
                        }
                        None => {
                            error!(alert = true, hypothesis_id = %hypothesis.id, error = %e, "Backoff exhausted");
                            return Err(ActionExecutionFailure {
                                hypothesis_id: hypothesis.id.clone(),
                                kind: hypothesis.kind,
                                attempts,
                                message: e.to_string(),
                                at: Utc::now(),
                            });
                        }
                    }
                }
            }
        }
    }

    async fn apply(&self, payload: &ActionPayload) -> Result<ExecutionEffect, TuningError> {
        match payload {
            ActionPayload::RebuildIndex {
                bounds,
                resolution_bits,
            } => {
                self.target.rebuild_index(*bounds, *resolution_bits).await?;
            }
            ActionPayload::RetuneRetrieval {
                candidate_multiplier,
                initial_radius,
                max_widenings,
            } => {
                self.target
                    .retune_retrieval(*candidate_multiplier, *initial_radius, *max_widenings)
                    .await?;
            }
            ActionPayload::AdjustWeights { targets } => {
                let live: Vec<WeightTarget> = targets
                    .iter()
                    .filter(|t| self.target.importance(&t.atom_id).is_some())
                    .copied()
                    .collect();
                if live.is_empty() {
                    return Err(TuningError::Target(
                        "no weight target atoms remain".to_string(),
                    ));
                }
                if let Some(bad) = live.iter().find(|t| !t.direction.is_finite()) {
                    return Err(TuningError::Target(format!(
                        "non-finite direction for {}",
                        bad.atom_id
                    )));
                }
                return Ok(ExecutionEffect::WeightsArmed(live));
            }
            ActionPayload::Prune { atom_ids } => {
                self.target.prune(atom_ids).await?;
            }
            ActionPayload::Merge { groups } => {
                self.target.merge(groups).await?;
            }
            ActionPayload::WarmCache { limit } => {
                self.target.warm_cache(*limit).await?;
            }
        }
        Ok(ExecutionEffect::Applied)
    }
}
