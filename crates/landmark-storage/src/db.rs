//! RocksDB wrapper for Landmark storage.
//!
//! Provides:
//! - Database open/close with column family setup
//! - Atom records with a separately mutable importance weight
//! - Engine metadata (landmarks, index and retrieval parameters)
//! - Pending actions, outcomes, and the weight-update audit log
//! - Atomic write batches for importance + audit + dedup marker

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

use landmark_types::{
    Atom, AtomId, AuditEntry, IndexParams, LandmarkRecord, OutcomeRecord, PendingAction,
    RetrievalSettings,
};
use parking_lot::Mutex;
use rocksdb::{ColumnFamily, Direction, IteratorMode, Options, WriteBatch, DB};
use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, info, warn};

use crate::column_families::{
    build_cf_descriptors, ALL_CF_NAMES, CF_ATOMS, CF_AUDIT, CF_IMPORTANCE, CF_INGEST_QUEUE,
    CF_LEARN_APPLIED, CF_META, CF_OUTCOMES, CF_PENDING,
};
use crate::error::StorageError;
use crate::keys::{MetaKey, SeqKey};

/// Main storage interface for the Landmark engine
pub struct Storage {
    pub(crate) db: DB,
    /// Audit sequence counter for monotonic ordering
    audit_sequence: AtomicU64,
    outcome_sequence: AtomicU64,
    /// Ingest queue sequence counter
    pub(crate) queue_sequence: AtomicU64,
    /// Serializes the applied-check and the write of a weight update
    learn_lock: Mutex<()>,
}

impl Storage {
    /// Open storage at the given path, creating if necessary
    pub fn open(path: &Path) -> Result<Self, StorageError> {
        info!("Opening storage at {:?}", path);

        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);
        db_opts.set_max_background_jobs(4);

        let cf_descriptors = build_cf_descriptors();
        let db = DB::open_cf_descriptors(&db_opts, path, cf_descriptors)?;

        let audit_sequence = Self::load_sequence(&db, CF_AUDIT, SeqKey::AUDIT)?;
        let outcome_sequence = Self::load_sequence(&db, CF_OUTCOMES, SeqKey::OUTCOME)?;
        let queue_sequence = Self::load_sequence(&db, CF_INGEST_QUEUE, SeqKey::QUEUE)?;

        Ok(Self {
            db,
            audit_sequence: AtomicU64::new(audit_sequence),
            outcome_sequence: AtomicU64::new(outcome_sequence),
            queue_sequence: AtomicU64::new(queue_sequence),
            learn_lock: Mutex::new(()),
        })
    }

    /// Next free sequence number, from the highest existing key
    fn load_sequence(db: &DB, cf_name: &str, prefix: &'static str) -> Result<u64, StorageError> {
        let cf = db
            .cf_handle(cf_name)
            .ok_or_else(|| StorageError::ColumnFamilyNotFound(cf_name.to_string()))?;

        let mut iter = db.iterator_cf(cf, IteratorMode::End);
        if let Some(result) = iter.next() {
            let (key, _) = result?;
            let seq_key = SeqKey::from_bytes(prefix, &key)?;
            return Ok(seq_key.sequence + 1);
        }
        Ok(0)
    }

    pub(crate) fn cf(&self, name: &str) -> Result<&ColumnFamily, StorageError> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| StorageError::ColumnFamilyNotFound(name.to_string()))
    }

    // ==================== Atom Methods ====================

    /// Store an atom and its importance atomically
    pub fn put_atom(&self, atom: &Atom) -> Result<(), StorageError> {
        self.put_atoms(std::slice::from_ref(atom))
    }

    /// Store several atoms in one batch
    pub fn put_atoms(&self, atoms: &[Atom]) -> Result<(), StorageError> {
        let atoms_cf = self.cf(CF_ATOMS)?;
        let importance_cf = self.cf(CF_IMPORTANCE)?;

        let mut batch = WriteBatch::default();
        for atom in atoms {
            batch.put_cf(atoms_cf, atom.id.as_bytes(), atom.to_bytes()?);
            batch.put_cf(importance_cf, atom.id.as_bytes(), atom.importance.to_le_bytes());
        }
        self.db.write(batch)?;
        debug!(count = atoms.len(), "Stored atoms");
        Ok(())
    }

    /// Rewrite atom records without touching importance.
    ///
    /// Used for access-time flushes: importance has its own writers and a
    /// copy taken earlier may already be stale.
    pub fn put_atom_records(&self, atoms: &[Atom]) -> Result<(), StorageError> {
        let atoms_cf = self.cf(CF_ATOMS)?;
        let mut batch = WriteBatch::default();
        for atom in atoms {
            batch.put_cf(atoms_cf, atom.id.as_bytes(), atom.to_bytes()?);
        }
        self.db.write(batch)?;
        Ok(())
    }

    /// Get an atom with its current importance
    pub fn get_atom(&self, id: &AtomId) -> Result<Option<Atom>, StorageError> {
        let atoms_cf = self.cf(CF_ATOMS)?;
        match self.db.get_cf(atoms_cf, id.as_bytes())? {
            Some(bytes) => {
                let mut atom = Atom::from_bytes(&bytes)?;
                if let Some(importance) = self.get_importance(id)? {
                    atom.importance = importance;
                }
                Ok(Some(atom))
            }
            None => Ok(None),
        }
    }

    pub fn contains_atom(&self, id: &AtomId) -> Result<bool, StorageError> {
        let atoms_cf = self.cf(CF_ATOMS)?;
        Ok(self.db.get_pinned_cf(atoms_cf, id.as_bytes())?.is_some())
    }

    /// Delete an atom and its importance. Returns false if absent.
    pub fn delete_atom(&self, id: &AtomId) -> Result<bool, StorageError> {
        Ok(self.delete_atoms(std::slice::from_ref(id))? == 1)
    }

    /// Delete several atoms in one batch. Returns how many existed.
    pub fn delete_atoms(&self, ids: &[AtomId]) -> Result<usize, StorageError> {
        let atoms_cf = self.cf(CF_ATOMS)?;
        let importance_cf = self.cf(CF_IMPORTANCE)?;

        let mut batch = WriteBatch::default();
        let mut count = 0;
        for id in ids {
            if self.db.get_pinned_cf(atoms_cf, id.as_bytes())?.is_some() {
                count += 1;
            }
            batch.delete_cf(atoms_cf, id.as_bytes());
            batch.delete_cf(importance_cf, id.as_bytes());
        }
        self.db.write(batch)?;
        debug!(count, "Deleted atoms");
        Ok(count)
    }

    /// Rewrite the canonical atom and delete its duplicates atomically
    pub fn merge_atoms(&self, canonical: &Atom, duplicates: &[AtomId]) -> Result<(), StorageError> {
        let atoms_cf = self.cf(CF_ATOMS)?;
        let importance_cf = self.cf(CF_IMPORTANCE)?;

        let mut batch = WriteBatch::default();
        batch.put_cf(atoms_cf, canonical.id.as_bytes(), canonical.to_bytes()?);
        batch.put_cf(
            importance_cf,
            canonical.id.as_bytes(),
            canonical.importance.to_le_bytes(),
        );
        for id in duplicates {
            batch.delete_cf(atoms_cf, id.as_bytes());
            batch.delete_cf(importance_cf, id.as_bytes());
        }
        self.db.write(batch)?;
        debug!(canonical = %canonical.id.short(), removed = duplicates.len(), "Merged atoms");
        Ok(())
    }

    /// Page through atoms in id order, starting after `after`.
    ///
    /// Entries that fail to decode are logged and skipped.
    pub fn scan_atoms(
        &self,
        after: Option<&AtomId>,
        limit: usize,
    ) -> Result<Vec<Atom>, StorageError> {
        let atoms_cf = self.cf(CF_ATOMS)?;
        let mode = match after {
            Some(id) => IteratorMode::From(id.as_bytes(), Direction::Forward),
            None => IteratorMode::Start,
        };

        let mut results = Vec::with_capacity(limit.min(4096));
        for item in self.db.iterator_cf(atoms_cf, mode) {
            if results.len() >= limit {
                break;
            }
            let (key, value) = item?;
            if after.is_some_and(|id| key.as_ref() == id.as_bytes()) {
                continue;
            }
            match Atom::from_bytes(&value) {
                Ok(mut atom) => {
                    if let Some(importance) = self.get_importance(&atom.id)? {
                        atom.importance = importance;
                    }
                    results.push(atom);
                }
                Err(e) => warn!(error = %e, "Skipping undecodable atom record"),
            }
        }
        Ok(results)
    }

    pub fn atom_count(&self) -> Result<u64, StorageError> {
        self.count_cf_entries(self.cf(CF_ATOMS)?)
    }

    pub fn get_importance(&self, id: &AtomId) -> Result<Option<f32>, StorageError> {
        let cf = self.cf(CF_IMPORTANCE)?;
        match self.db.get_pinned_cf(cf, id.as_bytes())? {
            Some(bytes) => {
                let raw: [u8; 4] = bytes.as_ref().try_into().map_err(|_| {
                    StorageError::Serialization(format!(
                        "importance for {} has {} bytes",
                        id.short(),
                        bytes.len()
                    ))
                })?;
                Ok(Some(f32::from_le_bytes(raw)))
            }
            None => Ok(None),
        }
    }

    pub fn set_importance(&self, id: &AtomId, value: f32) -> Result<(), StorageError> {
        let cf = self.cf(CF_IMPORTANCE)?;
        self.db.put_cf(cf, id.as_bytes(), value.to_le_bytes())?;
        Ok(())
    }

    // ==================== Meta Methods ====================

    fn put_meta<T: Serialize>(&self, key: MetaKey, value: &T) -> Result<(), StorageError> {
        let cf = self.cf(CF_META)?;
        self.db.put_cf(cf, key.as_bytes(), serde_json::to_vec(value)?)?;
        Ok(())
    }

    fn get_meta<T: DeserializeOwned>(&self, key: MetaKey) -> Result<Option<T>, StorageError> {
        let cf = self.cf(CF_META)?;
        match self.db.get_pinned_cf(cf, key.as_bytes())? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn put_landmarks(&self, record: &LandmarkRecord) -> Result<(), StorageError> {
        self.put_meta(MetaKey::Landmarks, record)?;
        debug!(version = record.version, "Stored landmark record");
        Ok(())
    }

    pub fn get_landmarks(&self) -> Result<Option<LandmarkRecord>, StorageError> {
        self.get_meta(MetaKey::Landmarks)
    }

    pub fn put_index_params(&self, params: &IndexParams) -> Result<(), StorageError> {
        self.put_meta(MetaKey::IndexParams, params)
    }

    pub fn get_index_params(&self) -> Result<Option<IndexParams>, StorageError> {
        self.get_meta(MetaKey::IndexParams)
    }

    pub fn put_retrieval_settings(&self, settings: &RetrievalSettings) -> Result<(), StorageError> {
        self.put_meta(MetaKey::RetrievalSettings, settings)
    }

    pub fn get_retrieval_settings(&self) -> Result<Option<RetrievalSettings>, StorageError> {
        self.get_meta(MetaKey::RetrievalSettings)
    }

    // ==================== Pending Action Methods ====================

    pub fn put_pending(&self, action: &PendingAction) -> Result<(), StorageError> {
        let cf = self.cf(CF_PENDING)?;
        self.db.put_cf(cf, action.id.as_bytes(), action.to_bytes()?)?;
        debug!(id = %action.id, state = %action.state, "Stored pending action");
        Ok(())
    }

    pub fn get_pending(&self, id: &str) -> Result<Option<PendingAction>, StorageError> {
        let cf = self.cf(CF_PENDING)?;
        match self.db.get_pinned_cf(cf, id.as_bytes())? {
            Some(bytes) => Ok(Some(PendingAction::from_bytes(&bytes)?)),
            None => Ok(None),
        }
    }

    /// All stored actions in id (creation) order
    pub fn load_pending(&self) -> Result<Vec<PendingAction>, StorageError> {
        let cf = self.cf(CF_PENDING)?;
        let mut actions = Vec::new();
        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            let (_, value) = item?;
            actions.push(PendingAction::from_bytes(&value)?);
        }
        Ok(actions)
    }

    // ==================== Audit Methods ====================

    /// Apply a weight update exactly once per (hypothesis, atom).
    ///
    /// Writes the new importance, the audit entry, and the applied marker
    /// in one batch. Returns `None` when the pair was already applied.
    pub fn record_weight_update(
        &self,
        mut entry: AuditEntry,
    ) -> Result<Option<AuditEntry>, StorageError> {
        let importance_cf = self.cf(CF_IMPORTANCE)?;
        let audit_cf = self.cf(CF_AUDIT)?;
        let applied_cf = self.cf(CF_LEARN_APPLIED)?;

        let marker = AuditEntry::dedup_key(&entry.hypothesis_id, &entry.atom_id);

        let _guard = self.learn_lock.lock();
        if self.db.get_pinned_cf(applied_cf, marker.as_bytes())?.is_some() {
            debug!(marker = %marker, "Weight update already applied, skipping");
            return Ok(None);
        }

        entry.seq = self.audit_sequence.fetch_add(1, Ordering::SeqCst);
        let audit_key = SeqKey::new(SeqKey::AUDIT, entry.seq);

        let mut batch = WriteBatch::default();
        batch.put_cf(importance_cf, entry.atom_id.as_bytes(), entry.value.to_le_bytes());
        batch.put_cf(audit_cf, audit_key.to_bytes(), entry.to_bytes()?);
        batch.put_cf(applied_cf, marker.as_bytes(), entry.seq.to_be_bytes());
        self.db.write(batch)?;

        debug!(
            seq = entry.seq,
            atom = %entry.atom_id.short(),
            previous = entry.previous,
            value = entry.value,
            "Recorded weight update"
        );
        Ok(Some(entry))
    }

    pub fn is_weight_update_applied(
        &self,
        hypothesis_id: &str,
        atom_id: &AtomId,
    ) -> Result<bool, StorageError> {
        let cf = self.cf(CF_LEARN_APPLIED)?;
        let marker = AuditEntry::dedup_key(hypothesis_id, atom_id);
        Ok(self.db.get_pinned_cf(cf, marker.as_bytes())?.is_some())
    }

    /// Most recent `limit` audit entries, oldest first
    pub fn audit_tail(&self, limit: usize) -> Result<Vec<AuditEntry>, StorageError> {
        let cf = self.cf(CF_AUDIT)?;
        let mut entries = Vec::with_capacity(limit.min(1024));
        for item in self.db.iterator_cf(cf, IteratorMode::End).take(limit) {
            let (_, value) = item?;
            entries.push(AuditEntry::from_bytes(&value)?);
        }
        entries.reverse();
        Ok(entries)
    }

    // ==================== Outcome Methods ====================

    pub fn put_outcome(&self, outcome: &OutcomeRecord) -> Result<(), StorageError> {
        let cf = self.cf(CF_OUTCOMES)?;
        let key = SeqKey::new(
            SeqKey::OUTCOME,
            self.outcome_sequence.fetch_add(1, Ordering::SeqCst),
        );
        self.db.put_cf(cf, key.to_bytes(), outcome.to_bytes()?)?;
        Ok(())
    }

    /// Most recent `limit` outcomes, oldest first
    pub fn recent_outcomes(&self, limit: usize) -> Result<Vec<OutcomeRecord>, StorageError> {
        let cf = self.cf(CF_OUTCOMES)?;
        let mut outcomes = Vec::new();
        for item in self.db.iterator_cf(cf, IteratorMode::End).take(limit) {
            let (_, value) = item?;
            outcomes.push(OutcomeRecord::from_bytes(&value)?);
        }
        outcomes.reverse();
        Ok(outcomes)
    }

    // ==================== Admin Methods ====================

    /// Flush all column families to disk
    pub fn flush(&self) -> Result<(), StorageError> {
        for cf_name in ALL_CF_NAMES {
            if let Some(cf) = self.db.cf_handle(cf_name) {
                self.db.flush_cf(cf)?;
            }
        }
        Ok(())
    }

    /// Get database statistics.
    pub fn get_stats(&self) -> Result<StorageStats, StorageError> {
        let mut stats = StorageStats::default();

        if let Some(cf) = self.db.cf_handle(CF_ATOMS) {
            stats.atom_count = self.count_cf_entries(cf)?;
        }
        if let Some(cf) = self.db.cf_handle(CF_PENDING) {
            stats.action_count = self.count_cf_entries(cf)?;
        }
        if let Some(cf) = self.db.cf_handle(CF_AUDIT) {
            stats.audit_count = self.count_cf_entries(cf)?;
        }
        if let Some(cf) = self.db.cf_handle(CF_INGEST_QUEUE) {
            stats.queue_depth = self.count_cf_entries(cf)?;
        }

        stats.disk_usage_bytes = self.get_disk_usage();

        Ok(stats)
    }

    pub(crate) fn count_cf_entries(&self, cf: &ColumnFamily) -> Result<u64, StorageError> {
        let mut count = 0u64;
        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            item?;
            count += 1;
        }
        Ok(count)
    }

    fn get_disk_usage(&self) -> u64 {
        let mut total_size = 0u64;
        if let Ok(entries) = std::fs::read_dir(self.db.path()) {
            for entry in entries.flatten() {
                if let Ok(metadata) = entry.metadata() {
                    total_size += metadata.len();
                }
            }
        }
        total_size
    }
}

/// Statistics about the storage.
#[derive(Debug, Default, Clone, serde::Serialize)]
pub struct StorageStats {
    /// Number of atoms stored
    pub atom_count: u64,
    /// Number of actions in any state
    pub action_count: u64,
    /// Number of audit log entries
    pub audit_count: u64,
    /// Number of unacknowledged ingest requests
    pub queue_depth: u64,
    /// Total disk usage in bytes
    pub disk_usage_bytes: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use landmark_types::{ActionPayload, Hypothesis, HypothesisKind, Risk};
    use tempfile::TempDir;

    fn create_test_storage() -> (Storage, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let storage = Storage::open(temp_dir.path()).unwrap();
        (storage, temp_dir)
    }

    fn audit_entry(hypothesis: &str, atom_id: AtomId, previous: f32, value: f32) -> AuditEntry {
        AuditEntry {
            seq: 0,
            timestamp: chrono::Utc::now(),
            cycle_id: "cycle-1".to_string(),
            hypothesis_id: hypothesis.to_string(),
            atom_id,
            previous,
            delta: value - previous,
            value,
            outcome_score: 0.5,
            learning_rate: 0.1,
        }
    }

    #[test]
    fn test_open_creates_column_families() {
        let (storage, _temp) = create_test_storage();
        for cf_name in ALL_CF_NAMES {
            assert!(
                storage.db.cf_handle(cf_name).is_some(),
                "CF {} should exist",
                cf_name
            );
        }
    }

    #[test]
    fn test_atom_roundtrip_with_importance() {
        let (storage, _temp) = create_test_storage();
        let atom = Atom::new(vec![0.1, 0.2, 0.3], "blob://a");
        storage.put_atom(&atom).unwrap();

        storage.set_importance(&atom.id, 4.5).unwrap();
        let loaded = storage.get_atom(&atom.id).unwrap().unwrap();
        assert_eq!(loaded.raw_vector, atom.raw_vector);
        assert_eq!(loaded.importance, 4.5);
        assert!(storage.contains_atom(&atom.id).unwrap());

        assert!(storage.delete_atom(&atom.id).unwrap());
        assert!(storage.get_atom(&atom.id).unwrap().is_none());
        assert!(storage.get_importance(&atom.id).unwrap().is_none());
        assert!(!storage.delete_atom(&atom.id).unwrap());
    }

    #[test]
    fn test_record_rewrite_keeps_newer_importance() {
        let (storage, _temp) = create_test_storage();
        let mut atom = Atom::new(vec![0.1, 0.2, 0.3], "blob://a");
        storage.put_atom(&atom).unwrap();

        // Importance moves on after the copy was taken
        storage
            .record_weight_update(audit_entry("hyp-1", atom.id, 1.0, 1.05))
            .unwrap()
            .unwrap();
        atom.last_access = Some(chrono::Utc::now());
        storage.put_atom_records(std::slice::from_ref(&atom)).unwrap();

        let loaded = storage.get_atom(&atom.id).unwrap().unwrap();
        assert!((loaded.importance - 1.05).abs() < 1e-6);
        assert!(loaded.last_access.is_some());
    }

    #[test]
    fn test_scan_atoms_pages_in_order() {
        let (storage, _temp) = create_test_storage();
        for i in 0..25 {
            storage
                .put_atom(&Atom::new(vec![i as f32, 1.0], format!("blob://{}", i)))
                .unwrap();
        }

        let mut seen = Vec::new();
        let mut cursor: Option<AtomId> = None;
        loop {
            let page = storage.scan_atoms(cursor.as_ref(), 10).unwrap();
            if page.is_empty() {
                break;
            }
            cursor = page.last().map(|a| a.id);
            seen.extend(page.into_iter().map(|a| a.id));
        }
        assert_eq!(seen.len(), 25);
        let mut sorted = seen.clone();
        sorted.sort();
        assert_eq!(seen, sorted);
        assert_eq!(storage.atom_count().unwrap(), 25);
    }

    #[test]
    fn test_merge_atoms() {
        let (storage, _temp) = create_test_storage();
        let mut keep = Atom::new(vec![1.0, 0.0], "blob://keep");
        let dup = Atom::new(vec![1.0, 0.0001], "blob://dup");
        storage.put_atoms(&[keep.clone(), dup.clone()]).unwrap();

        keep.sources.insert("feed-b".to_string());
        storage.merge_atoms(&keep, &[dup.id]).unwrap();

        assert!(storage.get_atom(&dup.id).unwrap().is_none());
        let merged = storage.get_atom(&keep.id).unwrap().unwrap();
        assert!(merged.sources.contains("feed-b"));
    }

    #[test]
    fn test_meta_records() {
        let (storage, _temp) = create_test_storage();
        assert!(storage.get_index_params().unwrap().is_none());

        let params = IndexParams {
            resolution_bits: 12,
            ..IndexParams::default()
        };
        storage.put_index_params(&params).unwrap();
        assert_eq!(storage.get_index_params().unwrap().unwrap(), params);

        let retrieval = RetrievalSettings {
            max_widenings: 3,
            ..RetrievalSettings::default()
        };
        storage.put_retrieval_settings(&retrieval).unwrap();
        assert_eq!(storage.get_retrieval_settings().unwrap().unwrap(), retrieval);
    }

    #[test]
    fn test_pending_actions_persist() {
        let temp_dir = TempDir::new().unwrap();
        let hypothesis = Hypothesis::new(
            HypothesisKind::PruneLowImportance,
            40,
            Risk::RequiresApproval,
            "prune",
            ActionPayload::Prune { atom_ids: vec![] },
        );
        let action = PendingAction::new(hypothesis, chrono::Duration::days(1));
        {
            let storage = Storage::open(temp_dir.path()).unwrap();
            storage.put_pending(&action).unwrap();
        }
        let storage = Storage::open(temp_dir.path()).unwrap();
        let loaded = storage.load_pending().unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].id, action.id);
        assert_eq!(storage.get_pending(&action.id).unwrap().unwrap().id, action.id);
    }

    #[test]
    fn test_weight_update_applied_once() {
        let (storage, _temp) = create_test_storage();
        let atom = Atom::new(vec![0.5, 0.5], "blob://w");
        storage.put_atom(&atom).unwrap();

        let first = storage
            .record_weight_update(audit_entry("h1", atom.id, 1.0, 1.05))
            .unwrap()
            .unwrap();
        assert_eq!(first.seq, 0);
        assert!(storage.is_weight_update_applied("h1", &atom.id).unwrap());

        let again = storage
            .record_weight_update(audit_entry("h1", atom.id, 1.05, 1.10))
            .unwrap();
        assert!(again.is_none());
        assert_eq!(storage.get_importance(&atom.id).unwrap(), Some(1.05));

        let other = storage
            .record_weight_update(audit_entry("h2", atom.id, 1.05, 1.10))
            .unwrap()
            .unwrap();
        assert_eq!(other.seq, 1);

        let tail = storage.audit_tail(10).unwrap();
        assert_eq!(tail.len(), 2);
        assert_eq!(tail[0].hypothesis_id, "h1");
        assert_eq!(tail[1].hypothesis_id, "h2");
        assert_eq!(storage.audit_tail(1).unwrap()[0].hypothesis_id, "h2");
    }

    #[test]
    fn test_audit_sequence_survives_reopen() {
        let temp_dir = TempDir::new().unwrap();
        let atom_id = AtomId::compute(&[1.0], "x");
        {
            let storage = Storage::open(temp_dir.path()).unwrap();
            storage
                .record_weight_update(audit_entry("h1", atom_id, 1.0, 1.1))
                .unwrap();
        }
        let storage = Storage::open(temp_dir.path()).unwrap();
        let entry = storage
            .record_weight_update(audit_entry("h2", atom_id, 1.1, 1.2))
            .unwrap()
            .unwrap();
        assert_eq!(entry.seq, 1);
        assert!(storage
            .record_weight_update(audit_entry("h1", atom_id, 1.2, 1.3))
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_outcomes_and_stats() {
        let (storage, _temp) = create_test_storage();
        for i in 0..3 {
            storage
                .put_outcome(&OutcomeRecord {
                    hypothesis_id: format!("h{}", i),
                    kind: HypothesisKind::IndexRebuild,
                    cycle_id: "c".to_string(),
                    before_cost: 10.0,
                    after_cost: 5.0,
                    score: 0.5,
                    measured_at: chrono::Utc::now(),
                })
                .unwrap();
        }
        let recent = storage.recent_outcomes(2).unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[1].hypothesis_id, "h2");

        storage.put_atom(&Atom::new(vec![1.0], "a")).unwrap();
        storage.flush().unwrap();
        let stats = storage.get_stats().unwrap();
        assert_eq!(stats.atom_count, 1);
        assert_eq!(stats.audit_count, 0);
    }
}
