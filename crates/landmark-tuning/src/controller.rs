//! The observe-hypothesize-act-learn loop.
//!
//! One cycle runs at a time; concurrent callers of [`TuningLoop::run_cycle`]
//! queue on the cycle lock. Risky hypotheses never execute in the cycle that
//! proposed them: they go to the [`ApprovalQueue`] and only come back out as
//! [`ApprovedAction`]s.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use landmark_retrieval::{MetricsCollector, WindowStats};
use landmark_storage::Storage;
use landmark_types::{AtomId, AuditEntry, Hypothesis, OutcomeRecord, TuningSettings};
use serde::Serialize;
use tokio::sync::{Mutex, Notify};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use ulid::Ulid;

use crate::approvals::{ApprovalQueue, ApprovedAction, Executable, SubmitOutcome};
use crate::detectors::{default_detectors, Detector, Observation, LATENCY_REGRESSION};
use crate::error::{ActionExecutionFailure, LearningDivergence, TuningError};
use crate::executor::{ActionExecutor, ExecutionEffect};
use crate::learner::{next_delay, outcome_score, Learner, PendingMeasurement, WeightUpdate};
use crate::status::{CycleResult, LoopStatus, StatusRegistry};
use crate::target::TuningTarget;

/// What one cycle did.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CycleReport {
    pub cycle_id: String,
    /// False when the window held no samples and the cycle only ran Learn
    pub observed: bool,
    pub baseline_established: bool,
    /// Hypotheses in priority order
    pub hypotheses: Vec<Hypothesis>,
    /// Hypothesis ids executed this cycle
    pub executed: Vec<String>,
    /// Pending action ids queued this cycle
    pub queued: Vec<String>,
    /// Open pending action ids a new hypothesis collapsed into
    pub deduplicated: Vec<String>,
    pub expired: Vec<String>,
    pub failures: Vec<ActionExecutionFailure>,
    pub divergences: Vec<LearningDivergence>,
    /// "detector: message" per failing detector
    pub detector_errors: Vec<String>,
    /// Non-fatal errors from the approval queue and storage
    pub errors: Vec<String>,
    pub outcomes: Vec<OutcomeRecord>,
    pub weight_updates: Vec<AuditEntry>,
    /// Executed hypotheses dropped without enough samples to score them
    pub unmeasured: Vec<String>,
    #[serde(serialize_with = "serialize_duration_ms")]
    pub next_delay: Duration,
}

fn serialize_duration_ms<S: serde::Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u64(d.as_millis() as u64)
}

impl CycleReport {
    fn new(cycle_id: String) -> Self {
        Self {
            cycle_id,
            ..Default::default()
        }
    }

    fn summary(&self) -> String {
        format!(
            "{} hypotheses, {} executed, {} queued, {} failed, {} outcomes",
            self.hypotheses.len(),
            self.executed.len(),
            self.queued.len(),
            self.failures.len(),
            self.outcomes.len()
        )
    }
}

struct CycleState {
    measurements: Vec<PendingMeasurement>,
    last_delay: Duration,
}

pub struct TuningLoop {
    settings: TuningSettings,
    target: Arc<dyn TuningTarget>,
    metrics: Arc<MetricsCollector>,
    storage: Arc<Storage>,
    approvals: Arc<ApprovalQueue>,
    detectors: Vec<Box<dyn Detector>>,
    executor: ActionExecutor,
    learner: Learner,
    cycle: Mutex<CycleState>,
    paused: AtomicBool,
    resume: Notify,
    status: StatusRegistry,
}

impl TuningLoop {
    pub fn new(
        settings: TuningSettings,
        target: Arc<dyn TuningTarget>,
        metrics: Arc<MetricsCollector>,
        storage: Arc<Storage>,
    ) -> Result<Self, TuningError> {
        let approvals = Arc::new(ApprovalQueue::open(
            Arc::clone(&storage),
            settings.pending_ttl(),
        )?);
        let executor = ActionExecutor::new(
            Arc::clone(&target),
            settings.action_max_attempts,
            Duration::from_millis(settings.retry_initial_ms),
        );
        let learner = Learner::new(Arc::clone(&storage), Arc::clone(&target), settings.clone());
        Ok(Self {
            cycle: Mutex::new(CycleState {
                measurements: Vec::new(),
                last_delay: settings.base_delay(),
            }),
            settings,
            target,
            metrics,
            storage,
            approvals,
            detectors: default_detectors(),
            executor,
            learner,
            paused: AtomicBool::new(false),
            resume: Notify::new(),
            status: StatusRegistry::new(),
        })
    }

    /// Replace the detector set.
    pub fn with_detectors(mut self, detectors: Vec<Box<dyn Detector>>) -> Self {
        self.detectors = detectors;
        self
    }

    pub fn settings(&self) -> &TuningSettings {
        &self.settings
    }

    pub fn approvals(&self) -> &Arc<ApprovalQueue> {
        &self.approvals
    }

    pub fn learner(&self) -> &Learner {
        &self.learner
    }

    pub fn status(&self) -> LoopStatus {
        self.status.snapshot()
    }

    /// Stop the background loop after its current cycle.
    pub fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
        self.status.set_paused(true);
        info!("Tuning loop paused");
    }

    pub fn resume(&self) {
        self.paused.store(false, Ordering::SeqCst);
        self.status.set_paused(false);
        self.resume.notify_waiters();
        info!("Tuning loop resumed");
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    /// Collect the current window and index state.
    ///
    /// Returns `None` when no samples fall in the window. The first window
    /// with enough latency samples sets the baseline.
    pub async fn observe(&self, cycle_id: &str) -> Result<Option<Observation>, TuningError> {
        let at = Utc::now();
        let window = self.metrics.window(at);
        if window.sample_count == 0 {
            debug!(cycle_id, "No samples in window");
            return Ok(None);
        }

        let mut baseline = self.metrics.baseline();
        let mut baseline_established = false;
        if baseline.is_none() {
            baseline = self.metrics.update_baseline(&window);
            baseline_established = baseline.is_some();
            if let Some(b) = baseline {
                info!(cycle_id, stage1_p50_ms = b.stage1_p50_ms, "Latency baseline established");
            }
        }

        let index = self.target.observe_index(&self.settings).await?;
        Ok(Some(Observation {
            cycle_id: cycle_id.to_string(),
            at,
            window,
            baseline,
            baseline_established,
            index,
        }))
    }

    /// Run every detector; hypotheses come back highest priority first.
    pub fn hypothesize(&self, observation: &Observation) -> (Vec<Hypothesis>, Vec<String>) {
        let mut hypotheses = Vec::new();
        let mut errors = Vec::new();
        for detector in &self.detectors {
            match detector.detect(observation, &self.settings) {
                Ok(Some(h)) => {
                    debug!(
                        cycle_id = %observation.cycle_id,
                        detector = detector.name(),
                        kind = %h.kind,
                        priority = h.priority,
                        "Hypothesis proposed"
                    );
                    hypotheses.push(
                        h.with_source(detector.name())
                            .with_cycle(observation.cycle_id.as_str()),
                    );
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(
                        cycle_id = %observation.cycle_id,
                        detector = detector.name(),
                        error = %e,
                        "Detector failed"
                    );
                    errors.push(format!("{}: {}", detector.name(), e));
                }
            }
        }
        // Stable, so equal priorities keep detector order
        hypotheses.sort_by(|a, b| b.priority.cmp(&a.priority));
        (hypotheses, errors)
    }

    /// Run one full cycle.
    pub async fn run_cycle(&self) -> Result<CycleReport, TuningError> {
        let mut state = self.cycle.lock().await;
        let cycle_id = Ulid::new().to_string();
        let started = Instant::now();
        self.status.record_start(&cycle_id);

        let result = self.cycle_inner(cycle_id.clone(), &mut state).await;
        match &result {
            Ok(report) => {
                state.last_delay = report.next_delay;
                self.status.record_complete(
                    CycleResult::Success(report.summary()),
                    started.elapsed(),
                    report.next_delay,
                );
                info!(
                    cycle_id = %report.cycle_id,
                    hypotheses = report.hypotheses.len(),
                    executed = report.executed.len(),
                    queued = report.queued.len(),
                    failures = report.failures.len(),
                    outcomes = report.outcomes.len(),
                    next_delay_ms = report.next_delay.as_millis() as u64,
                    "Tuning cycle complete"
                );
            }
            Err(e) => {
                self.status.record_complete(
                    CycleResult::Failed(e.to_string()),
                    started.elapsed(),
                    state.last_delay,
                );
                error!(cycle_id = %cycle_id, error = %e, "Tuning cycle failed");
            }
        }
        result
    }

    async fn cycle_inner(
        &self,
        cycle_id: String,
        state: &mut CycleState,
    ) -> Result<CycleReport, TuningError> {
        let mut report = CycleReport::new(cycle_id);

        let observation = self.observe(&report.cycle_id).await?;
        let before = match &observation {
            Some(obs) => {
                report.observed = true;
                report.baseline_established = obs.baseline_established;
                let (hypotheses, errors) = self.hypothesize(obs);
                report.hypotheses = hypotheses;
                report.detector_errors = errors;
                obs.window.clone()
            }
            None => WindowStats::default(),
        };

        self.act(&mut report, &before, state).await;
        self.learn(&mut report, state, observation.as_ref());
        Ok(report)
    }

    async fn act(&self, report: &mut CycleReport, before: &WindowStats, state: &mut CycleState) {
        match self.approvals.expire_stale(Utc::now()) {
            Ok(expired) => report.expired = expired,
            Err(e) => {
                warn!(error = %e, "Failed to expire pending actions");
                report.errors.push(e.to_string());
            }
        }

        for hypothesis in report.hypotheses.clone() {
            if hypothesis.requires_approval() {
                match self.approvals.submit(hypothesis) {
                    Ok(SubmitOutcome::Queued(id)) => report.queued.push(id),
                    Ok(SubmitOutcome::Duplicate(id)) => report.deduplicated.push(id),
                    Err(e) => {
                        warn!(error = %e, "Failed to queue hypothesis");
                        report.errors.push(e.to_string());
                    }
                }
                continue;
            }
            match Executable::safe(hypothesis) {
                Ok(action) => self.execute(action, before, report, state).await,
                Err(e) => report.errors.push(e.to_string()),
            }
        }

        for approved in self.approvals.take_approved() {
            self.execute(Executable::from(approved), before, report, state)
                .await;
        }
    }

    async fn execute(
        &self,
        action: Executable,
        before: &WindowStats,
        report: &mut CycleReport,
        state: &mut CycleState,
    ) {
        let result = self.executor.execute(&action).await;
        let hypothesis = action.hypothesis();
        match result {
            Ok(effect) => {
                if let Some(approved) = action.approved() {
                    self.settle(approved, Ok(()), report);
                }
                info!(
                    cycle_id = %report.cycle_id,
                    hypothesis_id = %hypothesis.id,
                    kind = %hypothesis.kind,
                    "Action executed"
                );
                report.executed.push(hypothesis.id.clone());
                state.measurements.push(PendingMeasurement {
                    hypothesis: hypothesis.clone(),
                    executed_at: Utc::now(),
                    before: before.clone(),
                    weight_targets: match effect {
                        ExecutionEffect::WeightsArmed(targets) => targets,
                        ExecutionEffect::Applied => Vec::new(),
                    },
                    cycles_waited: 0,
                });
            }
            Err(failure) => {
                if let Some(approved) = action.approved() {
                    self.settle(approved, Err(failure.message.clone()), report);
                }
                report.failures.push(failure);
            }
        }
    }

    fn settle(&self, approved: &ApprovedAction, result: Result<(), String>, report: &mut CycleReport) {
        let recorded = match result {
            Ok(()) => self.approvals.mark_executed(approved),
            Err(message) => self.approvals.mark_failed(approved, message),
        };
        if let Err(e) = recorded {
            warn!(action_id = approved.id(), error = %e, "Failed to record action state");
            report.errors.push(e.to_string());
        }
    }

    fn learn(
        &self,
        report: &mut CycleReport,
        state: &mut CycleState,
        observation: Option<&Observation>,
    ) {
        let mut scores = Vec::new();
        let mut waiting = Vec::new();

        for mut measurement in state.measurements.drain(..) {
            let id = measurement.hypothesis.id.clone();
            let after = self.metrics.window_since(measurement.executed_at);
            if after.latency_samples < self.settings.outcome_min_samples {
                measurement.cycles_waited += 1;
                if measurement.cycles_waited > self.settings.outcome_max_wait_cycles {
                    warn!(
                        hypothesis_id = %id,
                        samples = after.latency_samples,
                        "Dropping outcome without enough samples"
                    );
                    report.unmeasured.push(id);
                } else {
                    waiting.push(measurement);
                }
                continue;
            }

            let score = match outcome_score(&measurement.before, &after) {
                Ok(score) => score,
                Err(reason) => {
                    warn!(hypothesis_id = %id, reason = %reason, "Outcome could not be scored");
                    report.divergences.push(LearningDivergence::new(id, reason));
                    continue;
                }
            };
            scores.push(score);

            let record = OutcomeRecord {
                hypothesis_id: id.clone(),
                kind: measurement.hypothesis.kind,
                cycle_id: report.cycle_id.clone(),
                before_cost: measurement.before.cost(),
                after_cost: after.cost(),
                score,
                measured_at: Utc::now(),
            };
            if let Err(e) = self.storage.put_outcome(&record) {
                warn!(hypothesis_id = %id, error = %e, "Failed to persist outcome");
                report.errors.push(e.to_string());
            }
            info!(hypothesis_id = %id, kind = %record.kind, score, "Outcome measured");
            report.outcomes.push(record);

            if measurement.weight_targets.is_empty() {
                continue;
            }
            let mut touched: Vec<AtomId> = Vec::with_capacity(measurement.weight_targets.len());
            for target in &measurement.weight_targets {
                match self.learner.apply_weight_update(
                    &report.cycle_id,
                    &id,
                    &target.atom_id,
                    target.direction,
                    score,
                ) {
                    Ok(WeightUpdate::Applied(entry)) => {
                        touched.push(target.atom_id);
                        report.weight_updates.push(entry);
                    }
                    Ok(WeightUpdate::Diverged(divergence)) => report.divergences.push(divergence),
                    Ok(WeightUpdate::AlreadyApplied) | Ok(WeightUpdate::UnknownAtom) => {}
                    Err(e) => {
                        warn!(hypothesis_id = %id, atom_id = %target.atom_id.short(), error = %e, "Weight update failed");
                        report.errors.push(e.to_string());
                    }
                }
            }
            self.target.reset_hits(&touched);
        }
        state.measurements = waiting;

        // A regressed window must not drag the baseline toward itself
        if let Some(obs) = observation {
            let regressed = report
                .hypotheses
                .iter()
                .any(|h| h.source == LATENCY_REGRESSION);
            if !regressed && !obs.baseline_established {
                self.metrics.update_baseline(&obs.window);
            }
        }

        report.next_delay = next_delay(&scores, state.last_delay, &self.settings);
    }

    async fn wait_while_paused(&self, shutdown: &CancellationToken) -> bool {
        while self.is_paused() {
            let resumed = self.resume.notified();
            if !self.is_paused() {
                break;
            }
            tokio::select! {
                _ = shutdown.cancelled() => return false,
                _ = resumed => {}
            }
        }
        !shutdown.is_cancelled()
    }

    /// Run cycles until `shutdown` fires.
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        info!("Tuning loop started");
        loop {
            if !self.wait_while_paused(&shutdown).await {
                break;
            }
            let delay = match self.run_cycle().await {
                Ok(report) => report.next_delay,
                Err(_) => self.settings.base_delay(),
            };
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }
        info!("Tuning loop stopped");
    }
}
