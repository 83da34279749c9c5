//! Status registry for the tuning loop.

use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

/// Result of the last cycle.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum CycleResult {
    /// Completed; carries a short summary
    Success(String),
    Failed(String),
}

/// Snapshot of loop execution state.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoopStatus {
    /// Total cycles started
    pub run_count: u64,
    /// Cycles that ended in an error
    pub error_count: u64,
    pub last_run: Option<DateTime<Utc>>,
    pub last_duration_ms: Option<u64>,
    pub last_result: Option<CycleResult>,
    pub last_cycle_id: Option<String>,
    pub next_delay_ms: Option<u64>,
    pub is_running: bool,
    pub is_paused: bool,
}

/// Thread-safe holder of [`LoopStatus`].
#[derive(Debug, Default)]
pub struct StatusRegistry {
    status: RwLock<LoopStatus>,
}

impl StatusRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_start(&self, cycle_id: &str) {
        let mut status = self.status.write();
        status.run_count += 1;
        status.last_run = Some(Utc::now());
        status.last_cycle_id = Some(cycle_id.to_string());
        status.is_running = true;
    }

    pub fn record_complete(&self, result: CycleResult, duration: Duration, next_delay: Duration) {
        let mut status = self.status.write();
        if matches!(result, CycleResult::Failed(_)) {
            status.error_count += 1;
        }
        status.last_result = Some(result);
        status.last_duration_ms = Some(duration.as_millis() as u64);
        status.next_delay_ms = Some(next_delay.as_millis() as u64);
        status.is_running = false;
    }

    pub fn set_paused(&self, paused: bool) {
        self.status.write().is_paused = paused;
    }

    pub fn snapshot(&self) -> LoopStatus {
        self.status.read().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_cycle() {
        let registry = StatusRegistry::new();
        registry.record_start("c1");
        assert!(registry.snapshot().is_running);

        registry.record_complete(
            CycleResult::Success("ok".to_string()),
            Duration::from_millis(12),
            Duration::from_secs(60),
        );
        let status = registry.snapshot();
        assert_eq!(status.run_count, 1);
        assert_eq!(status.error_count, 0);
        assert_eq!(status.last_duration_ms, Some(12));
        assert_eq!(status.next_delay_ms, Some(60_000));
        assert!(!status.is_running);

        registry.record_start("c2");
        registry.record_complete(
            CycleResult::Failed("boom".to_string()),
            Duration::ZERO,
            Duration::from_secs(60),
        );
        assert_eq!(registry.snapshot().error_count, 1);
        assert_eq!(registry.snapshot().last_cycle_id.as_deref(), Some("c2"));
    }
}
