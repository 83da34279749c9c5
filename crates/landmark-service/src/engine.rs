//! The engine service and its lifecycle.
//!
//! `Engine::open` restores persisted state, `start` spawns the tuning loop
//! and the ingest-queue worker, and `shutdown` stops both, persists access
//! times, and flushes storage.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use landmark_projection::validate_vector;
use landmark_retrieval::{
    CacheStats, MetricsSnapshot, QueryStage, RetrievalEngine, RetrievalError, SearchOptions,
    SearchResponse,
};
use landmark_spatial::IndexStats;
use landmark_storage::{IngestQueue, Storage, StorageStats};
use landmark_tuning::{CycleReport, LoopStatus, TuningLoop};
use landmark_types::{
    Atom, AtomId, AuditEntry, IngestOutcome, IngestRequest, MetricEvent, OutcomeRecord,
    PendingAction, Settings,
};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::core::{DrainReport, EngineCore, OpenReport};
use crate::error::{IngestError, ServiceError};
use crate::target::CoreTarget;

/// Slack past the query deadline before the caller stops waiting
const HARD_TIMEOUT_GRACE: Duration = Duration::from_millis(50);

/// Point-in-time view of the whole engine.
#[derive(Debug, Clone, Serialize)]
pub struct EngineStats {
    pub atoms: usize,
    pub storage: StorageStats,
    pub index: IndexStats,
    pub cache: CacheStats,
    pub metrics: MetricsSnapshot,
    pub tuning: LoopStatus,
    pub pending_actions: usize,
}

pub struct Engine {
    core: Arc<EngineCore>,
    tuning: Arc<TuningLoop>,
    open_report: OpenReport,
    shutdown: CancellationToken,
    started: AtomicBool,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Engine {
    /// Open the engine at the configured database path.
    pub fn open(settings: Settings) -> Result<Self, ServiceError> {
        settings.validate()?;
        let path = settings.expanded_db_path();
        let storage = Arc::new(Storage::open(&path)?);
        Self::with_storage(settings, storage)
    }

    /// Open the engine over a database directory, ignoring `db_path`.
    pub fn open_at(settings: Settings, path: &Path) -> Result<Self, ServiceError> {
        settings.validate()?;
        let storage = Arc::new(Storage::open(path)?);
        Self::with_storage(settings, storage)
    }

    fn with_storage(settings: Settings, storage: Arc<Storage>) -> Result<Self, ServiceError> {
        let (core, open_report) = EngineCore::open(settings, Arc::clone(&storage))?;
        let core = Arc::new(core);
        let tuning = TuningLoop::new(
            core.settings.tuning.clone(),
            Arc::new(CoreTarget(Arc::clone(&core))),
            Arc::clone(core.retrieval.metrics()),
            storage,
        )?;
        Ok(Self {
            core,
            tuning: Arc::new(tuning),
            open_report,
            shutdown: CancellationToken::new(),
            started: AtomicBool::new(false),
            tasks: Mutex::new(Vec::new()),
        })
    }

    /// Spawn background tasks. Calling it again is a no-op.
    pub fn start(&self) {
        if self.started.swap(true, Ordering::SeqCst) {
            return;
        }
        let mut tasks = self.tasks.lock();

        if self.core.settings.tuning.enabled {
            tasks.push(tokio::spawn(
                Arc::clone(&self.tuning).run(self.shutdown.child_token()),
            ));
        } else {
            info!("Tuning loop disabled");
        }

        let core = Arc::clone(&self.core);
        let shutdown = self.shutdown.child_token();
        let interval = Duration::from_millis(core.settings.ingest.drain_interval_ms.max(1));
        tasks.push(tokio::spawn(async move {
            info!(interval_ms = interval.as_millis() as u64, "Ingest worker started");
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(interval) => {}
                }
                let core = Arc::clone(&core);
                let pass = tokio::task::spawn_blocking(move || {
                    let drained = core.drain_ingest_queue();
                    let persisted = core.persist_access();
                    (drained, persisted)
                })
                .await;
                match pass {
                    Ok((Err(e), _)) => warn!(error = %e, "Ingest queue drain failed"),
                    Ok((_, Err(e))) => warn!(error = %e, "Failed to persist atom access"),
                    Ok(_) => {}
                    Err(e) => error!(error = %e, "Ingest worker pass panicked"),
                }
            }
            info!("Ingest worker stopped");
        }));
    }

    /// Stop background tasks and flush state to disk.
    pub async fn shutdown(&self) -> Result<(), ServiceError> {
        info!("Shutting down engine");
        self.shutdown.cancel();
        let tasks: Vec<JoinHandle<()>> = std::mem::take(&mut *self.tasks.lock());
        for task in tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "Background task ended abnormally");
            }
        }
        self.core.persist_access()?;
        self.core.storage.flush()?;
        info!("Engine shut down");
        Ok(())
    }

    pub fn open_report(&self) -> &OpenReport {
        &self.open_report
    }

    pub fn settings(&self) -> &Settings {
        &self.core.settings
    }

    pub fn retrieval(&self) -> &Arc<RetrievalEngine> {
        &self.core.retrieval
    }

    pub fn storage(&self) -> &Arc<Storage> {
        &self.core.storage
    }

    pub fn tuning(&self) -> &Arc<TuningLoop> {
        &self.tuning
    }

    /// Insert content and return its id. Idempotent.
    pub fn insert(&self, raw_vector: Vec<f32>, payload_ref: &str) -> Result<AtomId, IngestError> {
        Ok(self
            .core
            .ingest(IngestRequest::new(raw_vector, payload_ref))?
            .atom_id)
    }

    pub fn ingest(&self, request: IngestRequest) -> Result<IngestOutcome, IngestError> {
        self.core.ingest(request)
    }

    /// Delete an atom. Returns false if it did not exist.
    pub fn remove(&self, id: &AtomId) -> Result<bool, IngestError> {
        self.core.remove(id)
    }

    /// Queue a request for the ingest worker. Malformed vectors are
    /// rejected here rather than queued.
    pub fn enqueue_ingest(&self, request: &IngestRequest) -> Result<u64, IngestError> {
        validate_vector(
            &request.raw_vector,
            self.core.retrieval.projector().dimension(),
        )?;
        Ok(self.core.storage.enqueue(request)?)
    }

    /// Apply everything queued so far.
    pub fn drain_ingest_queue(&self) -> Result<DrainReport, ServiceError> {
        self.core.drain_ingest_queue()
    }

    pub fn get_atom(&self, id: &AtomId) -> Option<Atom> {
        self.core.catalog().atom(id)
    }

    /// Two-stage search with a hard timeout.
    ///
    /// `timeout` defaults to the configured query timeout.
    pub async fn search(
        &self,
        query: Vec<f32>,
        final_k: usize,
        timeout: Option<Duration>,
    ) -> Result<SearchResponse, ServiceError> {
        let options = SearchOptions {
            timeout,
            ..SearchOptions::default()
        };
        self.search_with_options(query, final_k, options).await
    }

    pub async fn search_with_options(
        &self,
        query: Vec<f32>,
        final_k: usize,
        mut options: SearchOptions,
    ) -> Result<SearchResponse, ServiceError> {
        let timeout = options
            .timeout
            .unwrap_or_else(|| self.core.retrieval.settings().default_timeout());
        let cancel = options.cancel.take().unwrap_or_default();
        options.timeout = Some(timeout);
        options.cancel = Some(cancel.clone());

        let retrieval = Arc::clone(&self.core.retrieval);
        let handle =
            tokio::task::spawn_blocking(move || retrieval.search(&query, final_k, options));

        match tokio::time::timeout(timeout + HARD_TIMEOUT_GRACE, handle).await {
            Ok(Ok(result)) => Ok(result?),
            Ok(Err(e)) => Err(ServiceError::Task(e.to_string())),
            Err(_) => {
                cancel.cancel();
                Err(RetrievalError::Timeout {
                    stage: QueryStage::Done,
                    elapsed: timeout + HARD_TIMEOUT_GRACE,
                }
                .into())
            }
        }
    }

    /// Feed one external metric event. Returns false for a redelivery.
    pub fn record_metric(&self, event: &MetricEvent) -> bool {
        self.core.retrieval.metrics().record_event(event)
    }

    pub fn list_pending(&self) -> Vec<PendingAction> {
        self.tuning.approvals().list_pending()
    }

    pub fn list_actions(&self) -> Vec<PendingAction> {
        self.tuning.approvals().list_all()
    }

    /// Approve a pending action; it runs in the next tuning cycle.
    pub fn approve(&self, action_id: &str) -> Result<PendingAction, ServiceError> {
        Ok(self.tuning.approvals().approve(action_id)?)
    }

    pub fn reject(
        &self,
        action_id: &str,
        reason: Option<String>,
    ) -> Result<PendingAction, ServiceError> {
        Ok(self.tuning.approvals().reject(action_id, reason)?)
    }

    /// Most recent weight updates, oldest first.
    pub fn audit_log(&self, limit: usize) -> Result<Vec<AuditEntry>, ServiceError> {
        Ok(self.core.storage.audit_tail(limit)?)
    }

    pub fn recent_outcomes(&self, limit: usize) -> Result<Vec<OutcomeRecord>, ServiceError> {
        Ok(self.core.storage.recent_outcomes(limit)?)
    }

    /// Run one tuning cycle now, queued behind any cycle in progress.
    pub async fn run_tuning_cycle(&self) -> Result<CycleReport, ServiceError> {
        Ok(self.tuning.run_cycle().await?)
    }

    pub fn pause_tuning(&self) {
        self.tuning.pause();
    }

    pub fn resume_tuning(&self) {
        self.tuning.resume();
    }

    pub fn tuning_status(&self) -> LoopStatus {
        self.tuning.status()
    }

    pub fn stats(&self) -> Result<EngineStats, ServiceError> {
        let retrieval = &self.core.retrieval;
        Ok(EngineStats {
            atoms: retrieval.catalog().len(),
            storage: self.core.storage.get_stats()?,
            index: retrieval.index().stats(),
            cache: retrieval.cache().stats(),
            metrics: retrieval.metrics().snapshot(),
            tuning: self.tuning.status(),
            pending_actions: self.tuning.approvals().list_pending().len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use landmark_types::{ActionState, HypothesisKind, MetricOutcome, ProjectionSettings};
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use tempfile::TempDir;

    const DIM: usize = 16;

    fn test_settings() -> Settings {
        let mut settings = Settings::default();
        settings.projection = ProjectionSettings {
            dimension: DIM,
            ..ProjectionSettings::default()
        };
        settings.tuning.retry_initial_ms = 1;
        settings
    }

    fn create_test_engine() -> (Engine, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let engine = Engine::open_at(test_settings(), temp_dir.path()).unwrap();
        (engine, temp_dir)
    }

    fn random_vector(rng: &mut StdRng) -> Vec<f32> {
        (0..DIM).map(|_| rng.random_range(-1.0..1.0)).collect()
    }

    #[test]
    fn test_insert_is_idempotent() {
        let (engine, _temp) = create_test_engine();
        let v = vec![0.5; DIM];
        let a = engine.insert(v.clone(), "blob://1").unwrap();
        let b = engine.insert(v, "blob://1").unwrap();
        assert_eq!(a, b);
        assert_eq!(engine.retrieval().catalog().len(), 1);
        assert_eq!(engine.storage().atom_count().unwrap(), 1);
    }

    #[test]
    fn test_sources_raise_ref_count() {
        let (engine, _temp) = create_test_engine();
        let v = vec![0.25; DIM];
        let first = engine
            .ingest(IngestRequest::new(v.clone(), "blob://r").with_source("msg-1"))
            .unwrap();
        assert!(first.created);
        assert_eq!(first.ref_count, 1);

        let redelivered = engine
            .ingest(IngestRequest::new(v.clone(), "blob://r").with_source("msg-1"))
            .unwrap();
        assert!(!redelivered.created);
        assert_eq!(redelivered.ref_count, 1);

        let second = engine
            .ingest(IngestRequest::new(v, "blob://r").with_source("msg-2"))
            .unwrap();
        assert_eq!(second.ref_count, 2);
        let stored = engine.storage().get_atom(&second.atom_id).unwrap().unwrap();
        assert_eq!(stored.ref_count(), 2);
    }

    #[test]
    fn test_ingest_rejects_bad_input() {
        let (engine, _temp) = create_test_engine();
        assert!(matches!(
            engine.insert(vec![1.0; DIM + 1], "x"),
            Err(IngestError::Projection(_))
        ));
        let mut nan = vec![0.1; DIM];
        nan[3] = f32::NAN;
        assert!(matches!(
            engine.insert(nan, "x"),
            Err(IngestError::Projection(_))
        ));

        let wrong = AtomId::compute(&[1.0], "other");
        let err = engine
            .ingest(IngestRequest::new(vec![0.3; DIM], "x").with_expected_id(wrong))
            .unwrap_err();
        assert!(matches!(err, IngestError::IdMismatch { .. }));
        assert!(err.is_permanent());
        assert!(engine.retrieval().catalog().is_empty());
    }

    #[test]
    fn test_remove_is_idempotent() {
        let (engine, _temp) = create_test_engine();
        let id = engine.insert(vec![0.2; DIM], "blob://gone").unwrap();
        assert!(engine.remove(&id).unwrap());
        assert!(!engine.remove(&id).unwrap());
        assert!(engine.get_atom(&id).is_none());
        assert!(!engine.retrieval().index().contains(&id));
        assert!(!engine.storage().contains_atom(&id).unwrap());
    }

    #[test]
    fn test_remove_many_clears_storage_and_index() {
        let (engine, _temp) = create_test_engine();
        let a = engine.insert(vec![0.2; DIM], "blob://a").unwrap();
        let b = engine.insert(vec![0.4; DIM], "blob://b").unwrap();
        let keep = engine.insert(vec![0.6; DIM], "blob://keep").unwrap();
        let missing = AtomId::compute(&[0.8; DIM], "blob://never");

        assert_eq!(engine.core.remove_many(&[a, b, missing]).unwrap(), 2);
        for id in [a, b] {
            assert!(!engine.retrieval().index().contains(&id));
            assert!(!engine.storage().contains_atom(&id).unwrap());
        }
        assert!(engine.retrieval().index().contains(&keep));
        assert!(engine.storage().contains_atom(&keep).unwrap());
    }

    #[tokio::test]
    async fn test_access_flush_keeps_learned_importance() {
        let (engine, _temp) = create_test_engine();
        let v = vec![0.3; DIM];
        let id = engine.insert(v.clone(), "blob://learned").unwrap();
        engine.search(v.clone(), 1, None).await.unwrap();

        // Committed after the catalog copy the flush will write
        let entry = AuditEntry {
            seq: 0,
            timestamp: chrono::Utc::now(),
            cycle_id: "cycle-1".to_string(),
            hypothesis_id: "hyp-direct".to_string(),
            atom_id: id,
            previous: 1.0,
            delta: 0.05,
            value: 1.05,
            outcome_score: 0.5,
            learning_rate: 0.1,
        };
        engine.storage().record_weight_update(entry).unwrap().unwrap();
        assert_eq!(engine.core.persist_access().unwrap(), 1);
        let stored = engine.storage().get_atom(&id).unwrap().unwrap();
        assert!((stored.importance - 1.05).abs() < 1e-6);
        assert!(stored.last_access.is_some());

        // The learner's update lands in both places and survives the next flush
        engine.search(v, 1, None).await.unwrap();
        engine
            .tuning()
            .learner()
            .apply_weight_update("cycle-2", "hyp-learned", &id, 1.0, 0.5)
            .unwrap();
        engine.core.persist_access().unwrap();
        let expected = engine.retrieval().catalog().importance(&id).unwrap();
        assert!((expected - 1.0).abs() > 1e-6);
        let stored = engine.storage().get_atom(&id).unwrap().unwrap();
        assert_eq!(stored.importance, expected);
    }

    #[test]
    fn test_state_survives_reopen() {
        let temp_dir = TempDir::new().unwrap();
        let mut rng = StdRng::seed_from_u64(7);
        let ids: Vec<AtomId> = {
            let engine = Engine::open_at(test_settings(), temp_dir.path()).unwrap();
            (0..50)
                .map(|i| engine.insert(random_vector(&mut rng), &format!("blob://{}", i)).unwrap())
                .collect()
        };

        let engine = Engine::open_at(test_settings(), temp_dir.path()).unwrap();
        let report = engine.open_report();
        assert_eq!(report.atoms_loaded, 50);
        assert_eq!(report.landmark_version, 1);
        assert!(!report.reprojected);
        for id in &ids {
            assert!(engine.retrieval().index().contains(id));
        }
    }

    #[test]
    fn test_changed_seed_bumps_landmark_version() {
        let temp_dir = TempDir::new().unwrap();
        let before = {
            let engine = Engine::open_at(test_settings(), temp_dir.path()).unwrap();
            let id = engine.insert(vec![0.4; DIM], "blob://v").unwrap();
            engine.retrieval().index().entry(&id).unwrap().coord
        };

        let mut settings = test_settings();
        settings.projection.seed += 1;
        let engine = Engine::open_at(settings, temp_dir.path()).unwrap();
        assert_eq!(engine.open_report().landmark_version, 2);
        assert!(engine.open_report().reprojected);
        assert_eq!(engine.open_report().atoms_loaded, 1);

        let id = AtomId::compute(&[0.4; DIM], "blob://v");
        let after = engine.retrieval().index().entry(&id).unwrap().coord;
        assert_ne!(before, after);
        assert_eq!(engine.storage().get_landmarks().unwrap().unwrap().version, 2);
    }

    #[test]
    fn test_queue_drain_applies_once() {
        let (engine, _temp) = create_test_engine();
        let request = IngestRequest::new(vec![0.7; DIM], "blob://q").with_source("m1");
        engine.enqueue_ingest(&request).unwrap();
        engine.enqueue_ingest(&request).unwrap();
        assert!(engine.enqueue_ingest(&IngestRequest::new(vec![0.7; 3], "bad")).is_err());

        let report = engine.drain_ingest_queue().unwrap();
        assert_eq!(report.applied, 1);
        assert_eq!(report.duplicates, 1);
        assert_eq!(engine.storage().depth().unwrap(), 0);
        assert_eq!(engine.drain_ingest_queue().unwrap(), DrainReport::default());
    }

    #[tokio::test]
    async fn test_search_finds_inserted_vector() {
        let (engine, _temp) = create_test_engine();
        let mut rng = StdRng::seed_from_u64(11);
        let mut target = None;
        for i in 0..200 {
            let v = random_vector(&mut rng);
            let id = engine.insert(v.clone(), &format!("blob://{}", i)).unwrap();
            if i == 42 {
                target = Some((id, v));
            }
        }
        let (id, v) = target.unwrap();
        let response = engine.search(v, 5, None).await.unwrap();
        assert_eq!(response.results[0].atom_id, id);
        assert!(response.results.len() <= 5);
    }

    #[tokio::test]
    async fn test_search_rejects_bad_query() {
        let (engine, _temp) = create_test_engine();
        let err = engine.search(vec![1.0; 3], 5, None).await.unwrap_err();
        assert!(matches!(
            err,
            ServiceError::Retrieval(RetrievalError::InvalidQuery(_))
        ));
    }

    #[test]
    fn test_metric_feed_deduplicates() {
        let (engine, _temp) = create_test_engine();
        let event = MetricEvent::new("evt-1", "search", 4.0, MetricOutcome::Success);
        assert!(engine.record_metric(&event));
        assert!(!engine.record_metric(&event));
    }

    #[tokio::test]
    async fn test_prune_needs_approval() {
        let mut settings = test_settings();
        settings.tuning.prune_idle_secs = 0;
        settings.tuning.prune_importance_floor = 0.5;
        let temp_dir = TempDir::new().unwrap();
        let engine = Engine::open_at(settings, temp_dir.path()).unwrap();

        let mut rng = StdRng::seed_from_u64(3);
        let mut low = Vec::new();
        for i in 0..5 {
            let id = engine.insert(random_vector(&mut rng), &format!("blob://{}", i)).unwrap();
            engine.retrieval().catalog().set_importance(&id, 0.1);
            low.push(id);
        }
        for i in 0..20 {
            engine.record_metric(&MetricEvent::new(
                format!("e{}", i),
                "search",
                3.0,
                MetricOutcome::Success,
            ));
        }

        let report = engine.run_tuning_cycle().await.unwrap();
        assert_eq!(report.queued.len(), 1);
        let pending = engine.list_pending();
        assert_eq!(pending[0].hypothesis.kind, HypothesisKind::PruneLowImportance);
        for id in &low {
            assert!(engine.get_atom(id).is_some());
        }

        engine.approve(&pending[0].id).unwrap();
        let report = engine.run_tuning_cycle().await.unwrap();
        assert_eq!(report.executed.len(), 1);
        for id in &low {
            assert!(engine.get_atom(id).is_none());
            assert!(!engine.storage().contains_atom(id).unwrap());
        }
        let action = engine
            .list_actions()
            .into_iter()
            .find(|a| a.id == pending[0].id)
            .unwrap();
        assert_eq!(action.state, ActionState::Executed);
    }

    #[tokio::test]
    async fn test_start_and_shutdown() {
        let (engine, _temp) = create_test_engine();
        engine.start();
        engine.start();
        let request = IngestRequest::new(vec![0.9; DIM], "blob://bg");
        engine.enqueue_ingest(&request).unwrap();
        engine.shutdown().await.unwrap();
        assert!(engine.tasks.lock().is_empty());
    }
}
