//! Query-result cache.
//!
//! Entries are keyed by a digest of the query vector and `final_k` and are
//! only served while the catalog generation they were computed at is
//! current. Stale entries stay in the LRU so the tuning loop can see which
//! hot queries lost their cached answer and re-run them.

use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use lru::LruCache;
use parking_lot::Mutex;
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::engine::ScoredAtom;

pub type CacheKey = [u8; 32];

#[derive(Debug, Clone)]
struct CachedResult {
    generation: u64,
    results: Vec<ScoredAtom>,
    hits: u64,
    query: Arc<[f32]>,
    final_k: usize,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub capacity: usize,
    pub hits: u64,
    pub misses: u64,
}

/// Bounded LRU of search results. Capacity 0 disables caching.
pub struct QueryCache {
    inner: Option<Mutex<LruCache<CacheKey, CachedResult>>>,
    capacity: usize,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl QueryCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: NonZeroUsize::new(capacity).map(|c| Mutex::new(LruCache::new(c))),
            capacity,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn key(query: &[f32], final_k: usize) -> CacheKey {
        let mut hasher = Sha256::new();
        hasher.update((final_k as u64).to_le_bytes());
        for x in query {
            hasher.update(x.to_le_bytes());
        }
        hasher.finalize().into()
    }

    /// Cached results if computed at `generation`.
    pub fn get(&self, key: &CacheKey, generation: u64) -> Option<Vec<ScoredAtom>> {
        let inner = self.inner.as_ref()?;
        let mut lru = inner.lock();
        match lru.get_mut(key) {
            Some(entry) if entry.generation == generation => {
                entry.hits += 1;
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(entry.results.clone())
            }
            Some(entry) => {
                // Keep demand so warming can prioritize this query
                entry.hits += 1;
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    pub fn put(
        &self,
        key: CacheKey,
        generation: u64,
        query: &[f32],
        final_k: usize,
        results: Vec<ScoredAtom>,
    ) {
        let Some(inner) = self.inner.as_ref() else {
            return;
        };
        let mut lru = inner.lock();
        let hits = lru.peek(&key).map(|e| e.hits).unwrap_or(0);
        let query = match lru.peek(&key) {
            Some(e) => Arc::clone(&e.query),
            None => Arc::from(query),
        };
        lru.put(
            key,
            CachedResult {
                generation,
                results,
                hits,
                query,
                final_k,
            },
        );
    }

    /// Stale entries requested at least `min_hits` times.
    pub fn stale_hot(&self, generation: u64, min_hits: u64) -> usize {
        match self.inner.as_ref() {
            Some(inner) => inner
                .lock()
                .iter()
                .filter(|(_, e)| e.generation != generation && e.hits >= min_hits)
                .count(),
            None => 0,
        }
    }

    /// Queries of the hottest stale entries, most requested first.
    pub fn stale_queries(&self, generation: u64, limit: usize) -> Vec<(Arc<[f32]>, usize)> {
        let Some(inner) = self.inner.as_ref() else {
            return Vec::new();
        };
        let lru = inner.lock();
        let mut stale: Vec<(u64, Arc<[f32]>, usize)> = lru
            .iter()
            .filter(|(_, e)| e.generation != generation)
            .map(|(_, e)| (e.hits, Arc::clone(&e.query), e.final_k))
            .collect();
        drop(lru);
        stale.sort_by(|a, b| b.0.cmp(&a.0));
        stale
            .into_iter()
            .take(limit)
            .map(|(_, q, k)| (q, k))
            .collect()
    }

    pub fn clear(&self) {
        if let Some(inner) = self.inner.as_ref() {
            inner.lock().clear();
        }
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.inner.as_ref().map(|i| i.lock().len()).unwrap_or(0),
            capacity: self.capacity,
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }
}
