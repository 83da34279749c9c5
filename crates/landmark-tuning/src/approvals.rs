//! Approval queue for risky hypotheses.
//!
//! Every state change is written through to storage before it becomes
//! visible in memory. Approval is the only way to obtain an
//! [`ApprovedAction`], and only an `ApprovedAction` or a safe hypothesis can
//! be turned into an [`Executable`].

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use landmark_storage::Storage;
use landmark_types::{ActionState, Hypothesis, PendingAction};
use parking_lot::Mutex;
use tracing::{debug, info};

use crate::error::TuningError;

/// Result of offering a hypothesis to the queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    Queued(String),
    /// An open action with the same fingerprint already exists
    Duplicate(String),
}

/// An action that passed explicit approval and has not yet run.
#[derive(Debug, Clone)]
pub struct ApprovedAction(PendingAction);

impl ApprovedAction {
    pub fn id(&self) -> &str {
        &self.0.id
    }

    pub fn hypothesis(&self) -> &Hypothesis {
        &self.0.hypothesis
    }
}

#[derive(Debug, Clone)]
enum Gate {
    Safe(Hypothesis),
    Approved(ApprovedAction),
}

/// A hypothesis cleared to run.
#[derive(Debug, Clone)]
pub struct Executable(Gate);

impl Executable {
    /// Wrap a safe hypothesis. Risky ones are refused.
    pub fn safe(hypothesis: Hypothesis) -> Result<Self, TuningError> {
        if hypothesis.requires_approval() {
            return Err(TuningError::ApprovalRequired(hypothesis.id));
        }
        Ok(Self(Gate::Safe(hypothesis)))
    }

    pub fn hypothesis(&self) -> &Hypothesis {
        match &self.0 {
            Gate::Safe(h) => h,
            Gate::Approved(a) => a.hypothesis(),
        }
    }

    pub fn approved(&self) -> Option<&ApprovedAction> {
        match &self.0 {
            Gate::Approved(a) => Some(a),
            Gate::Safe(_) => None,
        }
    }
}

impl From<ApprovedAction> for Executable {
    fn from(action: ApprovedAction) -> Self {
        Self(Gate::Approved(action))
    }
}

pub struct ApprovalQueue {
    storage: Arc<Storage>,
    actions: Mutex<HashMap<String, PendingAction>>,
    ttl: chrono::Duration,
}

impl ApprovalQueue {
    /// Load persisted actions.
    pub fn open(storage: Arc<Storage>, ttl: chrono::Duration) -> Result<Self, TuningError> {
        let actions: HashMap<String, PendingAction> = storage
            .load_pending()?
            .into_iter()
            .map(|a| (a.id.clone(), a))
            .collect();
        debug!(count = actions.len(), "Loaded approval queue");
        Ok(Self {
            storage,
            actions: Mutex::new(actions),
            ttl,
        })
    }

    /// Queue a risky hypothesis unless an open duplicate exists.
    pub fn submit(&self, hypothesis: Hypothesis) -> Result<SubmitOutcome, TuningError> {
        let fingerprint = hypothesis.fingerprint();
        let mut actions = self.actions.lock();
        if let Some(existing) = actions
            .values()
            .find(|a| a.state.is_open() && a.fingerprint == fingerprint)
        {
            return Ok(SubmitOutcome::Duplicate(existing.id.clone()));
        }

        let action = PendingAction::new(hypothesis, self.ttl);
        self.storage.put_pending(&action)?;
        info!(
            action_id = %action.id,
            kind = %action.hypothesis.kind,
            priority = action.hypothesis.priority,
            "Queued action for approval"
        );
        let id = action.id.clone();
        actions.insert(id.clone(), action);
        Ok(SubmitOutcome::Queued(id))
    }

    /// Pending actions, highest priority first.
    pub fn list_pending(&self) -> Vec<PendingAction> {
        let mut pending: Vec<PendingAction> = self
            .actions
            .lock()
            .values()
            .filter(|a| a.state == ActionState::Pending)
            .cloned()
            .collect();
        pending.sort_by(|a, b| {
            b.hypothesis
                .priority
                .cmp(&a.hypothesis.priority)
                .then(a.created_at.cmp(&b.created_at))
        });
        pending
    }

    /// Every action in any state, oldest first.
    pub fn list_all(&self) -> Vec<PendingAction> {
        let mut all: Vec<PendingAction> = self.actions.lock().values().cloned().collect();
        all.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        all
    }

    pub fn get(&self, id: &str) -> Option<PendingAction> {
        self.actions.lock().get(id).cloned()
    }

    /// Approve a pending action.
    ///
    /// An action past its expiry is expired instead and the call fails.
    pub fn approve(&self, id: &str) -> Result<PendingAction, TuningError> {
        let now = Utc::now();
        let mut actions = self.actions.lock();
        let current = actions
            .get(id)
            .ok_or_else(|| TuningError::ActionNotFound(id.to_string()))?;

        if current.is_expired_at(now) {
            let expired = Self::transition_locked(
                &self.storage,
                &mut actions,
                id,
                ActionState::Expired,
                None,
            )?;
            return Err(TuningError::InvalidTransition {
                id: expired.id,
                from: ActionState::Expired,
                to: ActionState::Approved,
            });
        }

        let approved =
            Self::transition_locked(&self.storage, &mut actions, id, ActionState::Approved, None)?;
        info!(action_id = %id, kind = %approved.hypothesis.kind, "Action approved");
        Ok(approved)
    }

    pub fn reject(&self, id: &str, reason: Option<String>) -> Result<PendingAction, TuningError> {
        let mut actions = self.actions.lock();
        let rejected = Self::transition_locked(
            &self.storage,
            &mut actions,
            id,
            ActionState::Rejected,
            reason,
        )?;
        info!(action_id = %id, "Action rejected");
        Ok(rejected)
    }

    /// Expire pending actions past their TTL. Returns their ids.
    pub fn expire_stale(&self, now: DateTime<Utc>) -> Result<Vec<String>, TuningError> {
        let mut actions = self.actions.lock();
        let stale: Vec<String> = actions
            .values()
            .filter(|a| a.is_expired_at(now))
            .map(|a| a.id.clone())
            .collect();
        for id in &stale {
            Self::transition_locked(&self.storage, &mut actions, id, ActionState::Expired, None)?;
            info!(action_id = %id, "Pending action expired");
        }
        Ok(stale)
    }

    /// Approved actions awaiting execution, highest priority first.
    pub fn take_approved(&self) -> Vec<ApprovedAction> {
        let mut approved: Vec<PendingAction> = self
            .actions
            .lock()
            .values()
            .filter(|a| a.state == ActionState::Approved)
            .cloned()
            .collect();
        approved.sort_by(|a, b| {
            b.hypothesis
                .priority
                .cmp(&a.hypothesis.priority)
                .then(a.created_at.cmp(&b.created_at))
        });
        approved.into_iter().map(ApprovedAction).collect()
    }

    pub fn mark_executed(&self, action: &ApprovedAction) -> Result<(), TuningError> {
        let mut actions = self.actions.lock();
        Self::transition_locked(
            &self.storage,
            &mut actions,
            action.id(),
            ActionState::Executed,
            None,
        )?;
        Ok(())
    }

    pub fn mark_failed(&self, action: &ApprovedAction, message: String) -> Result<(), TuningError> {
        let mut actions = self.actions.lock();
        Self::transition_locked(
            &self.storage,
            &mut actions,
            action.id(),
            ActionState::Failed,
            Some(message),
        )?;
        Ok(())
    }

    fn transition_locked(
        storage: &Storage,
        actions: &mut HashMap<String, PendingAction>,
        id: &str,
        to: ActionState,
        note: Option<String>,
    ) -> Result<PendingAction, TuningError> {
        let current = actions
            .get(id)
            .ok_or_else(|| TuningError::ActionNotFound(id.to_string()))?;
        if !current.state.can_transition_to(to) {
            return Err(TuningError::InvalidTransition {
                id: id.to_string(),
                from: current.state,
                to,
            });
        }

        let mut next = current.clone();
        next.state = to;
        next.updated_at = Utc::now();
        if note.is_some() {
            next.note = note;
        }
        storage.put_pending(&next)?;
        actions.insert(id.to_string(), next.clone());
        Ok(next)
    }
}
