//! In-memory atom catalog.
//!
//! Holds the original vectors used by stage-2 reranking plus the mutable
//! per-atom state the tuning loop reads: importance, access time, and hit
//! counts. Persistence is owned by the service; the catalog is rebuilt from
//! storage at open.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use landmark_types::{Atom, AtomId, Coord};

/// Catalog record for one atom.
#[derive(Debug, Clone)]
pub struct CatalogEntry {
    pub raw_vector: Arc<[f32]>,
    pub payload_ref: String,
    pub coord: Coord,
    pub importance: f32,
    pub sources: BTreeSet<String>,
    pub created_at: DateTime<Utc>,
    pub last_access: Option<DateTime<Utc>>,
    /// Times this atom appeared in a result since the last reset
    pub hits: u64,
    /// Access changed since the last persist
    access_dirty: bool,
}

impl CatalogEntry {
    pub fn ref_count(&self) -> usize {
        self.sources.len().max(1)
    }

    fn to_atom(&self, id: AtomId) -> Atom {
        Atom {
            id,
            raw_vector: self.raw_vector.to_vec(),
            payload_ref: self.payload_ref.clone(),
            importance: self.importance,
            created_at: self.created_at,
            sources: self.sources.clone(),
            last_access: self.last_access,
        }
    }
}

/// Concurrent map of atoms with a change generation.
#[derive(Debug, Default)]
pub struct AtomCatalog {
    entries: DashMap<AtomId, CatalogEntry>,
    /// Bumped on every change that can alter query results
    generation: AtomicU64,
}

impl AtomCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an atom at its projected coordinate. Returns false if present.
    pub fn insert(&self, atom: Atom, coord: Coord) -> bool {
        use dashmap::mapref::entry::Entry;
        match self.entries.entry(atom.id) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(CatalogEntry {
                    raw_vector: Arc::from(atom.raw_vector),
                    payload_ref: atom.payload_ref,
                    coord,
                    importance: atom.importance,
                    sources: atom.sources,
                    created_at: atom.created_at,
                    last_access: atom.last_access,
                    hits: 0,
                    access_dirty: false,
                });
                self.bump_generation();
                true
            }
        }
    }

    pub fn remove(&self, id: &AtomId) -> Option<CatalogEntry> {
        let removed = self.entries.remove(id).map(|(_, e)| e);
        if removed.is_some() {
            self.bump_generation();
        }
        removed
    }

    pub fn get(&self, id: &AtomId) -> Option<CatalogEntry> {
        self.entries.get(id).map(|e| e.clone())
    }

    /// Full atom record, as it would be persisted.
    pub fn atom(&self, id: &AtomId) -> Option<Atom> {
        self.entries.get(id).map(|e| e.to_atom(*id))
    }

    pub fn raw_vector(&self, id: &AtomId) -> Option<Arc<[f32]>> {
        self.entries.get(id).map(|e| Arc::clone(&e.raw_vector))
    }

    pub fn contains(&self, id: &AtomId) -> bool {
        self.entries.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Add a delivering source. Returns `(added, ref_count)`, or `None`
    /// if the atom is unknown.
    pub fn add_source(&self, id: &AtomId, source: &str) -> Option<(bool, usize)> {
        self.entries.get_mut(id).map(|mut e| {
            let added = e.sources.insert(source.to_string());
            (added, e.ref_count())
        })
    }

    pub fn importance(&self, id: &AtomId) -> Option<f32> {
        self.entries.get(id).map(|e| e.importance)
    }

    pub fn set_importance(&self, id: &AtomId, value: f32) -> bool {
        match self.entries.get_mut(id) {
            Some(mut e) => {
                e.importance = value;
                true
            }
            None => false,
        }
    }

    pub fn set_coord(&self, id: &AtomId, coord: Coord) -> bool {
        match self.entries.get_mut(id) {
            Some(mut e) => {
                e.coord = coord;
                true
            }
            None => false,
        }
    }

    /// Count a result appearance for each atom.
    pub fn record_hits(&self, ids: impl IntoIterator<Item = AtomId>, now: DateTime<Utc>) {
        for id in ids {
            if let Some(mut e) = self.entries.get_mut(&id) {
                e.hits += 1;
                e.last_access = Some(now);
                e.access_dirty = true;
            }
        }
    }

    pub fn reset_hits(&self, ids: &[AtomId]) {
        for id in ids {
            if let Some(mut e) = self.entries.get_mut(id) {
                e.hits = 0;
            }
        }
    }

    /// Atoms with at least `min_hits`, most hit first, ties by id.
    pub fn hot_atoms(&self, min_hits: u64, limit: usize) -> Vec<(AtomId, u64)> {
        let mut hot: Vec<(AtomId, u64)> = self
            .entries
            .iter()
            .filter(|e| e.hits >= min_hits)
            .map(|e| (*e.key(), e.hits))
            .collect();
        hot.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
        hot.truncate(limit);
        hot
    }

    /// Atoms below `floor` importance with no access since `idle_before`,
    /// least important first.
    pub fn prune_candidates(
        &self,
        floor: f32,
        idle_before: DateTime<Utc>,
        limit: usize,
    ) -> Vec<AtomId> {
        let mut candidates: Vec<(AtomId, f32)> = self
            .entries
            .iter()
            .filter(|e| {
                e.importance < floor && e.last_access.unwrap_or(e.created_at) < idle_before
            })
            .map(|e| (*e.key(), e.importance))
            .collect();
        candidates.sort_by(|a, b| a.1.total_cmp(&b.1).then(a.0.cmp(&b.0)));
        candidates.truncate(limit);
        candidates.into_iter().map(|(id, _)| id).collect()
    }

    /// Ids and coordinates of every atom, sorted by id.
    pub fn coords(&self) -> Vec<(AtomId, Coord)> {
        let mut out: Vec<(AtomId, Coord)> =
            self.entries.iter().map(|e| (*e.key(), e.coord)).collect();
        out.sort_by(|a, b| a.0.cmp(&b.0));
        out
    }

    /// Atoms whose access time changed since the last call.
    pub fn take_accessed(&self) -> Vec<Atom> {
        let mut out = Vec::new();
        for mut e in self.entries.iter_mut() {
            if e.access_dirty {
                e.access_dirty = false;
                out.push(e.to_atom(*e.key()));
            }
        }
        out
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    pub fn bump_generation(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::AcqRel) + 1
    }
}
