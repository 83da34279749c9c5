//! Tuning hypotheses and the approval lifecycle of risky actions.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::atom::AtomId;
use crate::params::Bounds;

/// Closed set of improvement proposals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum HypothesisKind {
    IndexRebuild,
    /// Larger candidate pool or wider search radius
    RetrievalRetune,
    WeightAdjust,
    PruneLowImportance,
    MergeDuplicates,
    CacheWarm,
}

impl fmt::Display for HypothesisKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            HypothesisKind::IndexRebuild => "index-rebuild",
            HypothesisKind::RetrievalRetune => "retrieval-retune",
            HypothesisKind::WeightAdjust => "weight-adjust",
            HypothesisKind::PruneLowImportance => "prune-low-importance",
            HypothesisKind::MergeDuplicates => "merge-duplicates",
            HypothesisKind::CacheWarm => "cache-warm",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Risk {
    /// Executed immediately during Act
    Safe,
    /// Queued for explicit approval; never auto-executed
    RequiresApproval,
}

/// One atom whose importance a weight adjustment moves.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WeightTarget {
    pub atom_id: AtomId,
    /// Sign and scale of the update: +1.0 reinforces, -1.0 decays
    pub direction: f32,
}

/// Atoms that should collapse onto `canonical`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeGroup {
    pub canonical: AtomId,
    pub duplicates: Vec<AtomId>,
}

/// What executing a hypothesis does.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ActionPayload {
    /// Rebuild the spatial index into a shadow tree, optionally resized
    RebuildIndex {
        bounds: Option<Bounds>,
        resolution_bits: Option<u8>,
    },
    /// Change stage-1 search parameters
    RetuneRetrieval {
        candidate_multiplier: usize,
        initial_radius: f32,
        max_widenings: u32,
    },
    AdjustWeights { targets: Vec<WeightTarget> },
    Prune { atom_ids: Vec<AtomId> },
    Merge { groups: Vec<MergeGroup> },
    /// Re-run up to `limit` of the hottest stale cached queries
    WarmCache { limit: usize },
}

/// A ranked improvement proposal produced by one detector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hypothesis {
    pub id: String,
    pub kind: HypothesisKind,
    /// 0-100, higher runs first
    pub priority: u8,
    pub risk: Risk,
    pub rationale: String,
    pub payload: ActionPayload,
    /// Detector that produced it
    pub source: String,
    pub cycle_id: String,
    pub created_at: DateTime<Utc>,
}

impl Hypothesis {
    pub fn new(
        kind: HypothesisKind,
        priority: u8,
        risk: Risk,
        rationale: impl Into<String>,
        payload: ActionPayload,
    ) -> Self {
        Self {
            id: ulid::Ulid::new().to_string(),
            kind,
            priority: priority.min(100),
            risk,
            rationale: rationale.into(),
            payload,
            source: String::new(),
            cycle_id: String::new(),
            created_at: Utc::now(),
        }
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }

    pub fn with_cycle(mut self, cycle_id: impl Into<String>) -> Self {
        self.cycle_id = cycle_id.into();
        self
    }

    pub fn requires_approval(&self) -> bool {
        self.risk == Risk::RequiresApproval
    }

    /// Stable digest of kind and payload.
    ///
    /// Two proposals with the same fingerprint would do the same thing; the
    /// approval queue keeps at most one of them open.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.kind.to_string().as_bytes());
        hasher.update([0u8]);
        // Payload serialization is infallible for these types
        if let Ok(bytes) = serde_json::to_vec(&self.payload) {
            hasher.update(bytes);
        }
        hex::encode(hasher.finalize())
    }
}

/// State of a queued risky action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionState {
    Pending,
    Approved,
    Rejected,
    Expired,
    Executed,
    /// Approved, but execution failed after all retries
    Failed,
}

impl ActionState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ActionState::Rejected | ActionState::Expired | ActionState::Executed | ActionState::Failed
        )
    }

    /// Pending and approved actions block a new proposal with the same fingerprint.
    pub fn is_open(&self) -> bool {
        matches!(self, ActionState::Pending | ActionState::Approved)
    }

    pub fn can_transition_to(&self, next: ActionState) -> bool {
        matches!(
            (self, next),
            (ActionState::Pending, ActionState::Approved)
                | (ActionState::Pending, ActionState::Rejected)
                | (ActionState::Pending, ActionState::Expired)
                | (ActionState::Approved, ActionState::Executed)
                | (ActionState::Approved, ActionState::Failed)
        )
    }
}

impl fmt::Display for ActionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ActionState::Pending => "pending",
            ActionState::Approved => "approved",
            ActionState::Rejected => "rejected",
            ActionState::Expired => "expired",
            ActionState::Executed => "executed",
            ActionState::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// A hypothesis awaiting (or past) an approval decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingAction {
    /// Same as the hypothesis id
    pub id: String,
    pub hypothesis: Hypothesis,
    pub fingerprint: String,
    pub state: ActionState,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    /// Rejection reason or failure message
    #[serde(default)]
    pub note: Option<String>,
}

impl PendingAction {
    pub fn new(hypothesis: Hypothesis, ttl: chrono::Duration) -> Self {
        let now = Utc::now();
        Self {
            id: hypothesis.id.clone(),
            fingerprint: hypothesis.fingerprint(),
            hypothesis,
            state: ActionState::Pending,
            created_at: now,
            updated_at: now,
            expires_at: now + ttl,
            note: None,
        }
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.state == ActionState::Pending && now >= self.expires_at
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}
