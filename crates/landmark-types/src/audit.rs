//! Learn-phase records: weight-update audit entries and measured outcomes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::action::HypothesisKind;
use crate::atom::AtomId;

/// Append-only record of one importance update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    /// Position in the audit log, assigned by storage
    pub seq: u64,
    pub timestamp: DateTime<Utc>,
    pub cycle_id: String,
    pub hypothesis_id: String,
    pub atom_id: AtomId,
    pub previous: f32,
    /// Applied change after clamping
    pub delta: f32,
    /// Resulting importance
    pub value: f32,
    pub outcome_score: f64,
    pub learning_rate: f32,
}

impl AuditEntry {
    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }

    /// Key that makes re-applying the same update a no-op.
    pub fn dedup_key(hypothesis_id: &str, atom_id: &AtomId) -> String {
        format!("{}:{}", hypothesis_id, atom_id)
    }
}

/// Before/after measurement of an executed hypothesis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutcomeRecord {
    pub hypothesis_id: String,
    pub kind: HypothesisKind,
    /// Cycle in which the outcome was measured
    pub cycle_id: String,
    pub before_cost: f64,
    pub after_cost: f64,
    /// Relative cost reduction in [-1, 1]; positive is an improvement
    pub score: f64,
    pub measured_at: DateTime<Utc>,
}

impl OutcomeRecord {
    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}
