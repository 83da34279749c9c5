//! Error types for the tuning loop.
//!
//! `TuningError` is returned by fallible operations. The two record types
//! below are collected into a cycle report instead of being propagated;
//! a failing action or a divergent update never aborts a cycle.

use chrono::{DateTime, Utc};
use landmark_storage::StorageError;
use landmark_types::{ActionState, AtomId, HypothesisKind};
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TuningError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Action not found: {0}")]
    ActionNotFound(String),

    #[error("Action {id} cannot move from {from} to {to}")]
    InvalidTransition {
        id: String,
        from: ActionState,
        to: ActionState,
    },

    /// A risky hypothesis was offered for direct execution
    #[error("Hypothesis {0} requires approval")]
    ApprovalRequired(String),

    #[error("Target operation failed: {0}")]
    Target(String),

    #[error("Detector {name} failed: {message}")]
    Detector { name: String, message: String },
}

/// An Act-phase step that failed after every retry.
#[derive(Debug, Clone, Serialize, Error)]
#[error("action {hypothesis_id} ({kind}) failed after {attempts} attempts: {message}")]
pub struct ActionExecutionFailure {
    pub hypothesis_id: String,
    pub kind: HypothesisKind,
    pub attempts: u32,
    pub message: String,
    pub at: DateTime<Utc>,
}

/// An outcome score or weight update that could not be applied.
#[derive(Debug, Clone, Serialize, Error)]
#[error("learning diverged for {hypothesis_id}: {reason}")]
pub struct LearningDivergence {
    pub hypothesis_id: String,
    pub atom_id: Option<AtomId>,
    pub reason: String,
    pub at: DateTime<Utc>,
}

impl LearningDivergence {
    pub fn new(hypothesis_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            hypothesis_id: hypothesis_id.into(),
            atom_id: None,
            reason: reason.into(),
            at: Utc::now(),
        }
    }

    pub fn for_atom(mut self, atom_id: AtomId) -> Self {
        self.atom_id = Some(atom_id);
        self
    }
}
