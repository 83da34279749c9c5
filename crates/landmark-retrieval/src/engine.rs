//! Two-stage retrieval engine.
//!
//! `Idle → Stage1 → Stage2 → Done`. Stage 1 projects the query and pulls a
//! candidate pool of `K = candidate_multiplier × final_k` from the spatial
//! index, widening the radius geometrically while the pool is short. Stage 2
//! scores every candidate against its original vector and keeps the top
//! `final_k`. The projected coordinate only narrows the pool; it never
//! contributes to the final score.
//!
//! Deadlines and cancellation are checked between widenings and between the
//! two stages. Queries never mutate the index.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use landmark_projection::Projector;
use landmark_spatial::{IndexError, Neighbor, SpatialIndex};
use landmark_types::{
    Atom, AtomId, Coord, MergeGroup, QueryErrorKind, QuerySample, RetrievalSettings,
    SimilarityMetric,
};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::cache::QueryCache;
use crate::catalog::{AtomCatalog, CatalogEntry};
use crate::error::{QueryStage, RetrievalError};
use crate::metrics::MetricsCollector;

/// One ranked result.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoredAtom {
    pub atom_id: AtomId,
    /// Exact similarity, larger is better
    pub score: f32,
}

/// Why a result is shorter than requested. Not an error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Diagnostic {
    /// Stage 1 found nothing after every widening; stage 2 was skipped
    NoCandidates,
    /// Stage 1 returned fewer candidates than the pool size
    PoolExhausted { found: usize, wanted: usize },
}

impl std::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Diagnostic::NoCandidates => write!(f, "no candidates"),
            Diagnostic::PoolExhausted { found, wanted } => {
                write!(f, "candidate pool exhausted ({} of {})", found, wanted)
            }
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct QueryStats {
    pub stage1_latency: Duration,
    pub stage2_latency: Duration,
    pub candidates: usize,
    pub pool_size: usize,
    pub widenings: u32,
    pub final_radius: f32,
    pub nodes_visited: usize,
    pub cache_hit: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchResponse {
    pub results: Vec<ScoredAtom>,
    pub diagnostic: Option<Diagnostic>,
    pub stats: QueryStats,
}

/// Per-call query options.
#[derive(Debug, Clone, Default)]
pub struct SearchOptions {
    /// Overrides the configured default timeout
    pub timeout: Option<Duration>,
    pub cancel: Option<CancellationToken>,
    /// Skip the result cache for this call
    pub bypass_cache: bool,
}

impl SearchOptions {
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout: Some(timeout),
            ..Self::default()
        }
    }
}

struct Deadline {
    start: Instant,
    timeout: Duration,
    cancel: Option<CancellationToken>,
}

impl Deadline {
    fn check(&self, stage: QueryStage) -> Result<(), RetrievalError> {
        if self.cancel.as_ref().is_some_and(|c| c.is_cancelled()) {
            return Err(RetrievalError::Cancelled { stage });
        }
        let elapsed = self.start.elapsed();
        if elapsed >= self.timeout {
            return Err(RetrievalError::Timeout { stage, elapsed });
        }
        Ok(())
    }
}

/// Serves queries over a shared index and catalog.
pub struct RetrievalEngine {
    projector: Arc<Projector>,
    index: Arc<dyn SpatialIndex>,
    catalog: Arc<AtomCatalog>,
    metrics: Arc<MetricsCollector>,
    cache: QueryCache,
    settings: RwLock<RetrievalSettings>,
}

impl RetrievalEngine {
    pub fn new(
        projector: Arc<Projector>,
        index: Arc<dyn SpatialIndex>,
        catalog: Arc<AtomCatalog>,
        metrics: Arc<MetricsCollector>,
        settings: RetrievalSettings,
    ) -> Self {
        Self {
            projector,
            index,
            catalog,
            metrics,
            cache: QueryCache::new(settings.cache_capacity),
            settings: RwLock::new(settings),
        }
    }

    pub fn projector(&self) -> &Arc<Projector> {
        &self.projector
    }

    pub fn index(&self) -> &Arc<dyn SpatialIndex> {
        &self.index
    }

    pub fn catalog(&self) -> &Arc<AtomCatalog> {
        &self.catalog
    }

    pub fn metrics(&self) -> &Arc<MetricsCollector> {
        &self.metrics
    }

    pub fn cache(&self) -> &QueryCache {
        &self.cache
    }

    pub fn settings(&self) -> RetrievalSettings {
        self.settings.read().clone()
    }

    /// Replace live retrieval settings. Cached results are invalidated.
    pub fn set_settings(&self, settings: RetrievalSettings) -> Result<(), RetrievalError> {
        settings.validate().map_err(RetrievalError::InvalidSettings)?;
        info!(
            multiplier = settings.candidate_multiplier,
            radius = settings.initial_radius,
            max_widenings = settings.max_widenings,
            "Retrieval settings updated"
        );
        *self.settings.write() = settings;
        self.catalog.bump_generation();
        Ok(())
    }

    pub fn project(&self, vector: &[f32]) -> Result<Coord, RetrievalError> {
        Ok(self.projector.project(vector)?)
    }

    /// Add an atom to the index and catalog. Returns false if it was present.
    ///
    /// The index is written first so a failure leaves the catalog untouched.
    pub fn index_atom(&self, atom: Atom, coord: Coord) -> Result<bool, RetrievalError> {
        if self.catalog.contains(&atom.id) {
            return Ok(false);
        }
        self.index.insert(atom.id, coord)?;
        Ok(self.catalog.insert(atom, coord))
    }

    /// Remove an atom from the index and catalog.
    pub fn unindex_atom(&self, id: &AtomId) -> Result<Option<CatalogEntry>, RetrievalError> {
        self.index.remove(id)?;
        Ok(self.catalog.remove(id))
    }

    /// Run a two-stage query.
    pub fn search(
        &self,
        query: &[f32],
        final_k: usize,
        options: SearchOptions,
    ) -> Result<SearchResponse, RetrievalError> {
        let settings = self.settings();
        let deadline = Deadline {
            start: Instant::now(),
            timeout: options.timeout.unwrap_or_else(|| settings.default_timeout()),
            cancel: options.cancel.clone(),
        };

        match self.search_inner(query, final_k, &settings, &deadline, options.bypass_cache) {
            Ok(response) => Ok(response),
            Err(err) => {
                let kind = match &err {
                    RetrievalError::Timeout { .. } => QueryErrorKind::Timeout,
                    RetrievalError::Cancelled { .. } => QueryErrorKind::Cancelled,
                    RetrievalError::InvalidQuery(_) | RetrievalError::InvalidK(_) => {
                        QueryErrorKind::InvalidQuery
                    }
                    _ => QueryErrorKind::Internal,
                };
                self.metrics
                    .record(QuerySample::failed(kind, deadline.start.elapsed()));
                Err(err)
            }
        }
    }

    fn search_inner(
        &self,
        query: &[f32],
        final_k: usize,
        settings: &RetrievalSettings,
        deadline: &Deadline,
        bypass_cache: bool,
    ) -> Result<SearchResponse, RetrievalError> {
        if final_k == 0 {
            return Err(RetrievalError::InvalidK(final_k));
        }
        deadline.check(QueryStage::Stage1)?;

        // Stage 1
        let coord = self.projector.project(query)?;

        let generation = self.catalog.generation();
        let cache_key = QueryCache::key(query, final_k);
        if !bypass_cache {
            if let Some(results) = self.cache.get(&cache_key, generation) {
                let elapsed = deadline.start.elapsed();
                self.catalog
                    .record_hits(results.iter().map(|r| r.atom_id), Utc::now());
                self.metrics.record(
                    QuerySample::new(elapsed, Duration::ZERO, 0, results.len()).with_cache_hit(),
                );
                return Ok(SearchResponse {
                    results,
                    diagnostic: None,
                    stats: QueryStats {
                        stage1_latency: elapsed,
                        cache_hit: true,
                        ..QueryStats::default()
                    },
                });
            }
        }

        let pool_size = final_k.saturating_mul(settings.candidate_multiplier.max(1));
        let (candidates, widenings, radius, nodes_visited) =
            self.gather_candidates(&coord, pool_size, settings, deadline)?;
        let stage1_latency = deadline.start.elapsed();
        let indexed = self.index.len();
        let exhausted = candidates.len() < pool_size && candidates.len() < indexed;

        if candidates.is_empty() {
            debug!(widenings, radius, "No stage-1 candidates");
            self.metrics.record(
                QuerySample::new(stage1_latency, Duration::ZERO, 0, 0)
                    .with_widenings(widenings, indexed > 0),
            );
            return Ok(SearchResponse {
                results: Vec::new(),
                diagnostic: Some(Diagnostic::NoCandidates),
                stats: QueryStats {
                    stage1_latency,
                    pool_size,
                    widenings,
                    final_radius: radius,
                    nodes_visited,
                    ..QueryStats::default()
                },
            });
        }

        deadline.check(QueryStage::Stage2)?;

        // Stage 2
        let stage2_start = Instant::now();
        let mut results = self.rerank(query, &candidates, settings.metric);
        results.truncate(final_k);
        let stage2_latency = stage2_start.elapsed();

        self.catalog
            .record_hits(results.iter().map(|r| r.atom_id), Utc::now());
        if !bypass_cache {
            self.cache
                .put(cache_key, generation, query, final_k, results.clone());
        }
        self.metrics.record(
            QuerySample::new(stage1_latency, stage2_latency, candidates.len(), results.len())
                .with_widenings(widenings, exhausted),
        );

        let diagnostic = exhausted.then_some(Diagnostic::PoolExhausted {
            found: candidates.len(),
            wanted: pool_size,
        });

        Ok(SearchResponse {
            results,
            diagnostic,
            stats: QueryStats {
                stage1_latency,
                stage2_latency,
                candidates: candidates.len(),
                pool_size,
                widenings,
                final_radius: radius,
                nodes_visited,
                cache_hit: false,
            },
        })
    }

    /// Widen the radius until the pool is full, the index is exhausted, or
    /// the widening budget runs out.
    fn gather_candidates(
        &self,
        coord: &Coord,
        pool_size: usize,
        settings: &RetrievalSettings,
        deadline: &Deadline,
    ) -> Result<(Vec<Neighbor>, u32, f32, usize), RetrievalError> {
        let mut radius = settings.initial_radius;
        let mut widenings = 0u32;
        let mut nodes_visited = 0usize;
        loop {
            let found = self.index.range_query(coord, radius, pool_size);
            nodes_visited += found.nodes_visited;
            if found.len() >= pool_size
                || found.len() >= self.index.len()
                || widenings >= settings.max_widenings
            {
                return Ok((found.hits, widenings, radius, nodes_visited));
            }
            deadline.check(QueryStage::Stage1)?;
            radius *= settings.widen_factor;
            widenings += 1;
        }
    }

    /// Exact similarity on original vectors, best first, ties by id.
    fn rerank(&self, query: &[f32], candidates: &[Neighbor], metric: SimilarityMetric) -> Vec<ScoredAtom> {
        let query_norm = norm(query);
        let mut scored: Vec<ScoredAtom> = candidates
            .iter()
            .filter_map(|n| {
                // Removed since stage 1
                let raw = self.catalog.raw_vector(&n.atom_id)?;
                let score = match metric {
                    SimilarityMetric::Cosine => cosine(query, query_norm, &raw),
                    SimilarityMetric::Euclidean => 1.0 / (1.0 + euclidean(query, &raw)),
                };
                Some(ScoredAtom {
                    atom_id: n.atom_id,
                    score,
                })
            })
            .collect();
        scored.sort_by(|a, b| b.score.total_cmp(&a.score).then(a.atom_id.cmp(&b.atom_id)));
        scored
    }

    /// Re-run the hottest stale cached queries. Returns how many ran.
    pub fn warm_cache(&self, limit: usize) -> usize {
        let generation = self.catalog.generation();
        let queries = self.cache.stale_queries(generation, limit);
        let mut warmed = 0;
        for (query, final_k) in queries {
            let settings = self.settings();
            let deadline = Deadline {
                start: Instant::now(),
                timeout: settings.default_timeout(),
                cancel: None,
            };
            let pool_size = final_k.saturating_mul(settings.candidate_multiplier.max(1));
            let Ok(coord) = self.projector.project(&query) else {
                continue;
            };
            let Ok((candidates, ..)) =
                self.gather_candidates(&coord, pool_size, &settings, &deadline)
            else {
                continue;
            };
            let mut results = self.rerank(&query, &candidates, settings.metric);
            results.truncate(final_k);
            self.cache.put(
                QueryCache::key(&query, final_k),
                generation,
                &query,
                final_k,
                results,
            );
            warmed += 1;
        }
        debug!(warmed, "Cache warmed");
        warmed
    }

    /// Groups of atoms whose projected coordinates lie within `distance` of
    /// each other and whose original vectors have cosine similarity of at
    /// least `min_similarity`. The lowest id in each group is canonical.
    pub fn near_duplicate_groups(
        &self,
        distance: f32,
        min_similarity: f32,
        scan_limit: usize,
        max_groups: usize,
    ) -> Vec<MergeGroup> {
        let mut grouped = std::collections::HashSet::new();
        let mut groups = Vec::new();

        for (id, coord) in self.catalog.coords().into_iter().take(scan_limit) {
            if groups.len() >= max_groups {
                break;
            }
            if grouped.contains(&id) {
                continue;
            }
            let Some(raw) = self.catalog.raw_vector(&id) else {
                continue;
            };
            let raw_norm = norm(&raw);

            let neighbors = self.index.range_query(&coord, distance, 32);
            let duplicates: Vec<AtomId> = neighbors
                .hits
                .iter()
                .filter(|n| n.atom_id > id && !grouped.contains(&n.atom_id))
                .filter(|n| {
                    self.catalog
                        .raw_vector(&n.atom_id)
                        .is_some_and(|other| cosine(&raw, raw_norm, &other) >= min_similarity)
                })
                .map(|n| n.atom_id)
                .collect();

            if !duplicates.is_empty() {
                grouped.insert(id);
                grouped.extend(duplicates.iter().copied());
                groups.push(MergeGroup {
                    canonical: id,
                    duplicates,
                });
            }
        }
        groups
    }

    /// Rebuild the index from the catalog with new parameters.
    pub fn reindex(
        &self,
        params: landmark_types::IndexParams,
    ) -> Result<landmark_spatial::RebuildStats, IndexError> {
        let stats = self.index.reindex(params)?;
        self.catalog.bump_generation();
        Ok(stats)
    }
}

fn norm(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}

fn cosine(a: &[f32], a_norm: f32, b: &[f32]) -> f32 {
    let b_norm = norm(b);
    if a_norm == 0.0 || b_norm == 0.0 {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    dot / (a_norm * b_norm)
}

fn euclidean(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b)
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f32>()
        .sqrt()
}
