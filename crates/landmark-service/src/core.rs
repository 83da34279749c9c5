//! Shared engine state and the write path.
//!
//! Every write to the catalog, the index, and storage goes through
//! `EngineCore` under one write lock. Queries never take it.

use std::sync::Arc;

use landmark_projection::Projector;
use landmark_retrieval::{AtomCatalog, MetricsCollector, RetrievalEngine};
use landmark_spatial::{RTreeIndex, SpatialIndex};
use landmark_storage::{IngestQueue, Storage};
use landmark_tuning::TuningError;
use landmark_types::{Atom, AtomId, IngestOutcome, IngestRequest, Settings};
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::{IngestError, ServiceError};

/// Atoms read from storage per page at open
const LOAD_BATCH: usize = 1024;

/// Result of one pass over the durable ingest queue.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DrainReport {
    /// New atoms created
    pub applied: usize,
    /// Requests that matched existing content
    pub duplicates: usize,
    /// Requests dropped as permanently invalid
    pub rejected: usize,
    /// Highest sequence acknowledged, if any
    pub acked_through: Option<u64>,
}

/// What happened while loading persisted state.
#[derive(Debug, Clone, Default, Serialize)]
pub struct OpenReport {
    pub landmark_version: u32,
    /// Landmarks changed since the last open; every atom was re-projected
    pub reprojected: bool,
    pub atoms_loaded: usize,
    /// Stored atoms skipped because their id or vector no longer checks out
    pub atoms_skipped: usize,
}

pub(crate) struct EngineCore {
    pub(crate) settings: Settings,
    pub(crate) storage: Arc<Storage>,
    pub(crate) retrieval: Arc<RetrievalEngine>,
    write_lock: Mutex<()>,
}

impl EngineCore {
    /// Restore projector, index, and catalog from storage.
    pub(crate) fn open(
        settings: Settings,
        storage: Arc<Storage>,
    ) -> Result<(Self, OpenReport), ServiceError> {
        let mut report = OpenReport::default();
        let projector = load_projector(&settings, &storage, &mut report)?;

        let params = match storage.get_index_params()? {
            Some(params) => params,
            None => {
                let params = settings.index.to_params();
                storage.put_index_params(&params)?;
                params
            }
        };
        let retrieval_settings = match storage.get_retrieval_settings()? {
            Some(stored) => stored,
            None => settings.retrieval.clone(),
        };

        let catalog = Arc::new(AtomCatalog::new());
        let mut entries = Vec::new();
        let mut cursor: Option<AtomId> = None;
        loop {
            let page = storage.scan_atoms(cursor.as_ref(), LOAD_BATCH)?;
            let Some(last) = page.last() else {
                break;
            };
            cursor = Some(last.id);
            for atom in page {
                if !atom.verify_id() {
                    warn!(atom_id = %atom.id.short(), "Stored atom fails its content hash; skipping");
                    report.atoms_skipped += 1;
                    continue;
                }
                match projector.project(&atom.raw_vector) {
                    Ok(coord) => {
                        entries.push((atom.id, coord));
                        catalog.insert(atom, coord);
                    }
                    Err(e) => {
                        warn!(atom_id = %atom.id.short(), error = %e, "Stored atom cannot be projected; skipping");
                        report.atoms_skipped += 1;
                    }
                }
            }
        }
        report.atoms_loaded = entries.len();

        let index = RTreeIndex::new(params)?;
        if !entries.is_empty() {
            index.rebuild(entries, params)?;
        }

        let metrics = Arc::new(MetricsCollector::new(settings.metrics.clone()));
        let retrieval = Arc::new(RetrievalEngine::new(
            Arc::new(projector),
            Arc::new(index),
            catalog,
            metrics,
            retrieval_settings,
        ));

        info!(
            atoms = report.atoms_loaded,
            skipped = report.atoms_skipped,
            landmark_version = report.landmark_version,
            reprojected = report.reprojected,
            "Engine state loaded"
        );

        Ok((
            Self {
                settings,
                storage,
                retrieval,
                write_lock: Mutex::new(()),
            },
            report,
        ))
    }

    pub(crate) fn catalog(&self) -> &Arc<AtomCatalog> {
        self.retrieval.catalog()
    }

    /// Apply one ingest request. Idempotent.
    pub(crate) fn ingest(&self, request: IngestRequest) -> Result<IngestOutcome, IngestError> {
        let IngestRequest {
            raw_vector,
            payload_ref,
            source_id,
            expected_id,
        } = request;

        let coord = self.retrieval.project(&raw_vector)?;
        let mut atom = Atom::new(raw_vector, payload_ref);
        if let Some(expected) = expected_id {
            if expected != atom.id {
                return Err(IngestError::IdMismatch {
                    expected,
                    computed: atom.id,
                });
            }
        }

        let _guard = self.write_lock.lock();
        let catalog = self.catalog();

        if catalog.contains(&atom.id) {
            let ref_count = match source_id.as_deref() {
                Some(source) => match catalog.add_source(&atom.id, source) {
                    Some((true, ref_count)) => {
                        if let Some(updated) = catalog.atom(&atom.id) {
                            self.storage.put_atom(&updated)?;
                        }
                        ref_count
                    }
                    Some((false, ref_count)) => ref_count,
                    None => 1,
                },
                None => catalog.get(&atom.id).map(|e| e.ref_count()).unwrap_or(1),
            };
            debug!(atom_id = %atom.id.short(), ref_count, "Duplicate content");
            return Ok(IngestOutcome {
                atom_id: atom.id,
                created: false,
                ref_count,
            });
        }

        if let Some(source) = source_id {
            atom.sources.insert(source);
        }
        let id = atom.id;
        let ref_count = atom.ref_count();

        // Index first: a rejected coordinate must not reach storage
        self.retrieval.index_atom(atom.clone(), coord)?;
        if let Err(e) = self.storage.put_atom(&atom) {
            if let Err(undo) = self.retrieval.unindex_atom(&id) {
                warn!(atom_id = %id.short(), error = %undo, "Failed to roll back index entry");
            }
            return Err(e.into());
        }

        debug!(atom_id = %id.short(), "Atom ingested");
        Ok(IngestOutcome {
            atom_id: id,
            created: true,
            ref_count,
        })
    }

    /// Delete an atom everywhere. Returns false if it did not exist.
    pub(crate) fn remove(&self, id: &AtomId) -> Result<bool, IngestError> {
        let _guard = self.write_lock.lock();
        let indexed = self.retrieval.unindex_atom(id)?.is_some();
        let stored = self.storage.delete_atom(id)?;
        if indexed || stored {
            debug!(atom_id = %id.short(), "Atom removed");
        }
        Ok(indexed || stored)
    }

    /// Delete a set of atoms. Missing ids are ignored.
    pub(crate) fn remove_many(&self, ids: &[AtomId]) -> Result<usize, IngestError> {
        let _guard = self.write_lock.lock();
        // Storage first: a failed delete leaves every atom searchable
        self.storage.delete_atoms(ids)?;
        let mut removed = 0;
        for id in ids {
            if self.retrieval.unindex_atom(id)?.is_some() {
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// Fold duplicates into `canonical`: sources are united and the highest
    /// importance is kept. Returns how many duplicates were removed.
    pub(crate) fn merge(&self, canonical: &AtomId, duplicates: &[AtomId]) -> Result<usize, IngestError> {
        let _guard = self.write_lock.lock();
        let catalog = self.catalog();
        if !catalog.contains(canonical) {
            return Ok(0);
        }

        let present: Vec<AtomId> = duplicates
            .iter()
            .filter(|id| *id != canonical && catalog.contains(id))
            .copied()
            .collect();
        if present.is_empty() {
            return Ok(0);
        }

        let mut importance = catalog.importance(canonical).unwrap_or_default();
        for dup in &present {
            if let Some(entry) = catalog.get(dup) {
                importance = importance.max(entry.importance);
                for source in &entry.sources {
                    catalog.add_source(canonical, source);
                }
            }
        }
        catalog.set_importance(canonical, importance);
        let Some(merged) = catalog.atom(canonical) else {
            return Ok(0);
        };

        self.storage.merge_atoms(&merged, &present)?;
        for dup in &present {
            self.retrieval.unindex_atom(dup)?;
        }
        info!(canonical = %canonical.short(), removed = present.len(), "Merged duplicate atoms");
        Ok(present.len())
    }

    /// Persist access times recorded by queries since the last call.
    pub(crate) fn persist_access(&self) -> Result<usize, IngestError> {
        let _guard = self.write_lock.lock();
        let catalog = self.catalog();
        let atoms: Vec<Atom> = catalog
            .take_accessed()
            .into_iter()
            .filter(|a| catalog.contains(&a.id))
            .collect();
        if !atoms.is_empty() {
            self.storage.put_atom_records(&atoms)?;
            debug!(count = atoms.len(), "Persisted atom access");
        }
        Ok(atoms.len())
    }

    /// Run a read-modify-write of one atom's importance with every other
    /// engine write excluded. `update` sees the in-memory value, persists
    /// its change, and returns the value to install in the catalog.
    pub(crate) fn update_importance(
        &self,
        id: &AtomId,
        update: &mut dyn FnMut(Option<f32>) -> Result<Option<f32>, TuningError>,
    ) -> Result<(), TuningError> {
        let _guard = self.write_lock.lock();
        let catalog = self.catalog();
        if let Some(value) = update(catalog.importance(id))? {
            catalog.set_importance(id, value);
        }
        Ok(())
    }

    /// Apply queued ingest requests and acknowledge them.
    ///
    /// Permanently invalid requests are logged and acknowledged; a storage
    /// failure stops the pass and leaves the rest queued.
    pub(crate) fn drain_ingest_queue(&self) -> Result<DrainReport, ServiceError> {
        let batch_size = self.settings.ingest.queue_batch_size.max(1);
        let mut report = DrainReport::default();

        loop {
            let batch = self.storage.dequeue(batch_size)?;
            if batch.is_empty() {
                break;
            }
            let mut last_applied = None;
            let mut failure = None;
            for (seq, request) in batch {
                match self.ingest(request) {
                    Ok(outcome) if outcome.created => report.applied += 1,
                    Ok(_) => report.duplicates += 1,
                    Err(e) if e.is_permanent() => {
                        warn!(seq, error = %e, "Dropping invalid queued ingest request");
                        report.rejected += 1;
                    }
                    Err(e) => {
                        failure = Some(e);
                        break;
                    }
                }
                last_applied = Some(seq);
            }

            if let Some(seq) = last_applied {
                self.storage.ack(seq)?;
                report.acked_through = Some(seq);
            }
            if let Some(e) = failure {
                return Err(e.into());
            }
        }

        if report.applied + report.duplicates + report.rejected > 0 {
            info!(
                applied = report.applied,
                duplicates = report.duplicates,
                rejected = report.rejected,
                "Drained ingest queue"
            );
        }
        Ok(report)
    }
}

/// Load the persisted landmark basis, or create it on first boot.
///
/// A configured seed or dimension that no longer matches the stored
/// fingerprint bumps the version; coordinates are always recomputed at open.
fn load_projector(
    settings: &Settings,
    storage: &Storage,
    report: &mut OpenReport,
) -> Result<Projector, ServiceError> {
    let configured = Projector::from_settings(&settings.projection)?;
    match storage.get_landmarks()? {
        Some(record) if record.fingerprint == configured.fingerprint() => {
            report.landmark_version = record.version;
            Ok(Projector::from_record(&record)?)
        }
        Some(record) => {
            let version = record.version + 1;
            warn!(
                previous_version = record.version,
                version,
                previous_dimension = record.dimension,
                dimension = configured.dimension(),
                "Landmark configuration changed; re-projecting all atoms"
            );
            storage.put_landmarks(&configured.to_record(version))?;
            report.landmark_version = version;
            report.reprojected = true;
            Ok(configured)
        }
        None => {
            storage.put_landmarks(&configured.to_record(1))?;
            info!(dimension = configured.dimension(), "Landmarks created");
            report.landmark_version = 1;
            Ok(configured)
        }
    }
}
