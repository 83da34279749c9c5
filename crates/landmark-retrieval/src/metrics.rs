//! Query metrics collector.
//!
//! Samples are appended to one of several independently locked ring
//! buffers chosen round-robin, so concurrent queries rarely contend.
//! Windows are aggregated on demand by the tuning loop.

use std::collections::VecDeque;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use chrono::{DateTime, Utc};
use landmark_types::{MetricEvent, MetricsSettings, QuerySample};
use lru::LruCache;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tracing::debug;

/// Aggregate statistics over a window of samples.
#[derive(Debug, Clone, Default, Serialize)]
pub struct WindowStats {
    pub sample_count: usize,
    /// Samples that measured both stages (no error, no cache hit)
    pub latency_samples: usize,
    pub stage1_p50_ms: f64,
    pub stage1_p95_ms: f64,
    pub stage1_p99_ms: f64,
    pub stage2_p50_ms: f64,
    pub stage2_p95_ms: f64,
    pub exhaustion_rate: f64,
    pub error_rate: f64,
    pub cache_hit_rate: f64,
    pub mean_candidates: f64,
    pub mean_widenings: f64,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

impl WindowStats {
    pub fn from_samples(samples: &[QuerySample]) -> Self {
        let n = samples.len();
        if n == 0 {
            return Self::default();
        }

        let mut s1: Vec<f64> = Vec::with_capacity(n);
        let mut s2: Vec<f64> = Vec::with_capacity(n);
        for s in samples.iter().filter(|s| s.measures_latency()) {
            s1.push(s.stage1_latency.as_secs_f64() * 1_000.0);
            s2.push(s.stage2_latency.as_secs_f64() * 1_000.0);
        }
        s1.sort_by(f64::total_cmp);
        s2.sort_by(f64::total_cmp);

        let rate = |pred: &dyn Fn(&QuerySample) -> bool| {
            samples.iter().filter(|s| pred(s)).count() as f64 / n as f64
        };

        Self {
            sample_count: n,
            latency_samples: s1.len(),
            stage1_p50_ms: percentile(&s1, 50.0),
            stage1_p95_ms: percentile(&s1, 95.0),
            stage1_p99_ms: percentile(&s1, 99.0),
            stage2_p50_ms: percentile(&s2, 50.0),
            stage2_p95_ms: percentile(&s2, 95.0),
            exhaustion_rate: rate(&|s| s.pool_exhausted),
            error_rate: rate(&|s| s.error_kind.is_some()),
            cache_hit_rate: rate(&|s| s.cache_hit),
            mean_candidates: samples.iter().map(|s| s.candidate_count as f64).sum::<f64>()
                / n as f64,
            mean_widenings: samples.iter().map(|s| s.widenings as f64).sum::<f64>() / n as f64,
            start: samples.iter().map(|s| s.timestamp).min(),
            end: samples.iter().map(|s| s.timestamp).max(),
        }
    }

    /// Scalar cost used to score outcomes; lower is better.
    pub fn cost(&self) -> f64 {
        (self.stage1_p50_ms + self.stage2_p50_ms) * (1.0 + self.exhaustion_rate + self.error_rate)
    }
}

/// Nearest-rank percentile of sorted values.
fn percentile(sorted: &[f64], p: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let rank = ((p / 100.0) * sorted.len() as f64).ceil() as usize;
    sorted[rank.clamp(1, sorted.len()) - 1]
}

/// EWMA of median stage latencies.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct Baseline {
    pub stage1_p50_ms: f64,
    pub stage2_p50_ms: f64,
    /// Latency samples folded in so far
    pub samples_seen: u64,
    pub updated_at: DateTime<Utc>,
}

/// Counter snapshot for status reporting.
#[derive(Debug, Clone, Default, Serialize)]
pub struct MetricsSnapshot {
    pub samples_recorded: u64,
    pub events_accepted: u64,
    pub events_duplicate: u64,
    pub errors: u64,
    pub retained: usize,
}

/// Sharded, bounded sample store.
pub struct MetricsCollector {
    settings: MetricsSettings,
    shards: Vec<Mutex<VecDeque<QuerySample>>>,
    next_shard: AtomicUsize,
    seen_events: Mutex<LruCache<String, ()>>,
    baseline: RwLock<Option<Baseline>>,
    samples_recorded: AtomicU64,
    events_accepted: AtomicU64,
    events_duplicate: AtomicU64,
    errors: AtomicU64,
}

impl MetricsCollector {
    pub fn new(settings: MetricsSettings) -> Self {
        let shards = (0..settings.shards.max(1))
            .map(|_| Mutex::new(VecDeque::with_capacity(settings.shard_capacity.min(4096))))
            .collect();
        let dedup = NonZeroUsize::new(settings.dedup_capacity.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            settings,
            shards,
            next_shard: AtomicUsize::new(0),
            seen_events: Mutex::new(LruCache::new(dedup)),
            baseline: RwLock::new(None),
            samples_recorded: AtomicU64::new(0),
            events_accepted: AtomicU64::new(0),
            events_duplicate: AtomicU64::new(0),
            errors: AtomicU64::new(0),
        }
    }

    pub fn settings(&self) -> &MetricsSettings {
        &self.settings
    }

    pub fn record(&self, sample: QuerySample) {
        if sample.error_kind.is_some() {
            self.errors.fetch_add(1, Ordering::Relaxed);
        }
        let idx = self.next_shard.fetch_add(1, Ordering::Relaxed) % self.shards.len();
        let mut shard = self.shards[idx].lock();
        if shard.len() >= self.settings.shard_capacity {
            shard.pop_front();
        }
        shard.push_back(sample);
        drop(shard);
        self.samples_recorded.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an external metric event. Returns false for a redelivery.
    pub fn record_event(&self, event: &MetricEvent) -> bool {
        {
            let mut seen = self.seen_events.lock();
            if seen.put(event.event_id.clone(), ()).is_some() {
                self.events_duplicate.fetch_add(1, Ordering::Relaxed);
                debug!(event_id = %event.event_id, "Duplicate metric event ignored");
                return false;
            }
        }
        self.events_accepted.fetch_add(1, Ordering::Relaxed);
        self.record(event.to_sample());
        true
    }

    /// Statistics over the trailing window ending at `now`.
    pub fn window(&self, now: DateTime<Utc>) -> WindowStats {
        let window = chrono::Duration::seconds(self.settings.window_secs as i64);
        self.window_between(now - window, now)
    }

    /// Statistics over samples taken at or after `since`.
    pub fn window_since(&self, since: DateTime<Utc>) -> WindowStats {
        self.window_between(since, Utc::now())
    }

    fn window_between(&self, since: DateTime<Utc>, until: DateTime<Utc>) -> WindowStats {
        let mut samples: Vec<QuerySample> = Vec::new();
        for shard in &self.shards {
            let shard = shard.lock();
            samples.extend(
                shard
                    .iter()
                    .filter(|s| s.timestamp >= since && s.timestamp <= until)
                    .cloned(),
            );
        }
        samples.sort_by_key(|s| s.timestamp);
        let keep = self.settings.max_window_samples;
        if samples.len() > keep {
            samples.drain(..samples.len() - keep);
        }
        WindowStats::from_samples(&samples)
    }

    pub fn baseline(&self) -> Option<Baseline> {
        *self.baseline.read()
    }

    pub fn set_baseline(&self, baseline: Baseline) {
        *self.baseline.write() = Some(baseline);
    }

    /// Fold a window into the baseline.
    ///
    /// Windows with too few latency samples are ignored. The first
    /// accepted window sets the baseline outright.
    pub fn update_baseline(&self, stats: &WindowStats) -> Option<Baseline> {
        if stats.latency_samples < self.settings.min_baseline_samples {
            return None;
        }
        let alpha = self.settings.baseline_alpha;
        let mut guard = self.baseline.write();
        let next = match *guard {
            None => Baseline {
                stage1_p50_ms: stats.stage1_p50_ms,
                stage2_p50_ms: stats.stage2_p50_ms,
                samples_seen: stats.latency_samples as u64,
                updated_at: Utc::now(),
            },
            Some(prev) => Baseline {
                stage1_p50_ms: alpha * stats.stage1_p50_ms + (1.0 - alpha) * prev.stage1_p50_ms,
                stage2_p50_ms: alpha * stats.stage2_p50_ms + (1.0 - alpha) * prev.stage2_p50_ms,
                samples_seen: prev.samples_seen + stats.latency_samples as u64,
                updated_at: Utc::now(),
            },
        };
        *guard = Some(next);
        Some(next)
    }

    /// Samples currently retained across shards
    pub fn len(&self) -> usize {
        self.shards.iter().map(|s| s.lock().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            samples_recorded: self.samples_recorded.load(Ordering::Relaxed),
            events_accepted: self.events_accepted.load(Ordering::Relaxed),
            events_duplicate: self.events_duplicate.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            retained: self.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use landmark_types::{MetricOutcome, QueryErrorKind};
    use std::time::Duration;

    fn collector() -> MetricsCollector {
        MetricsCollector::new(MetricsSettings {
            shards: 4,
            shard_capacity: 64,
            max_window_samples: 50,
            min_baseline_samples: 10,
            ..MetricsSettings::default()
        })
    }

    fn sample(s1_ms: u64) -> QuerySample {
        QuerySample::new(
            Duration::from_millis(s1_ms),
            Duration::from_millis(1),
            100,
            10,
        )
    }

    #[test]
    fn test_percentiles_nearest_rank() {
        let v: Vec<f64> = (1..=100).map(|x| x as f64).collect();
        assert_eq!(percentile(&v, 50.0), 50.0);
        assert_eq!(percentile(&v, 95.0), 95.0);
        assert_eq!(percentile(&v, 99.0), 99.0);
        assert_eq!(percentile(&[7.0], 50.0), 7.0);
        assert_eq!(percentile(&[], 50.0), 0.0);
    }

    #[test]
    fn test_window_keeps_most_recent_samples() {
        let metrics = collector();
        let now = Utc::now();
        for i in 0..80 {
            let ms = if i < 30 { 1 } else { 9 };
            metrics.record(sample(ms).with_timestamp(now - chrono::Duration::milliseconds(80 - i)));
        }
        let stats = metrics.window(now);
        assert_eq!(stats.sample_count, 50);
        assert_eq!(stats.stage1_p50_ms, 9.0);
    }

    #[test]
    fn test_window_excludes_old_samples() {
        let metrics = collector();
        let now = Utc::now();
        metrics.record(sample(5).with_timestamp(now - chrono::Duration::hours(2)));
        metrics.record(sample(5).with_timestamp(now));
        assert_eq!(metrics.window(now).sample_count, 1);
    }

    #[test]
    fn test_rates_and_latency_exclusions() {
        let metrics = collector();
        let now = Utc::now();
        metrics.record(sample(2).with_timestamp(now));
        metrics.record(sample(2).with_widenings(8, true).with_timestamp(now));
        metrics.record(sample(50).with_cache_hit().with_timestamp(now));
        metrics.record(
            QuerySample::failed(QueryErrorKind::Timeout, Duration::from_millis(900))
                .with_timestamp(now),
        );

        let stats = metrics.window(now);
        assert_eq!(stats.sample_count, 4);
        assert_eq!(stats.latency_samples, 2);
        assert_eq!(stats.stage1_p99_ms, 2.0);
        assert_eq!(stats.exhaustion_rate, 0.25);
        assert_eq!(stats.error_rate, 0.25);
        assert_eq!(stats.cache_hit_rate, 0.25);
        assert_eq!(metrics.snapshot().errors, 1);
    }

    #[test]
    fn test_event_dedup() {
        let metrics = collector();
        let event = MetricEvent::new("evt-1", "search.stage1", 4.0, MetricOutcome::Success);
        assert!(metrics.record_event(&event));
        assert!(!metrics.record_event(&event));
        assert_eq!(metrics.len(), 1);
        let snap = metrics.snapshot();
        assert_eq!(snap.events_accepted, 1);
        assert_eq!(snap.events_duplicate, 1);
    }

    #[test]
    fn test_baseline_requires_samples_then_ewma() {
        let metrics = collector();
        let now = Utc::now();
        for _ in 0..5 {
            metrics.record(sample(2).with_timestamp(now));
        }
        assert!(metrics.update_baseline(&metrics.window(now)).is_none());
        assert!(metrics.baseline().is_none());

        for _ in 0..5 {
            metrics.record(sample(2).with_timestamp(now));
        }
        let first = metrics.update_baseline(&metrics.window(now)).unwrap();
        assert_eq!(first.stage1_p50_ms, 2.0);

        let shifted = WindowStats {
            latency_samples: 10,
            stage1_p50_ms: 12.0,
            stage2_p50_ms: 1.0,
            ..WindowStats::default()
        };
        let next = metrics.update_baseline(&shifted).unwrap();
        assert!((next.stage1_p50_ms - 4.0).abs() < 1e-9);
        assert_eq!(next.samples_seen, 20);
    }

    #[test]
    fn test_shard_capacity_bounds_memory() {
        let metrics = collector();
        for _ in 0..1_000 {
            metrics.record(sample(1));
        }
        assert_eq!(metrics.len(), 4 * 64);
        assert_eq!(metrics.snapshot().samples_recorded, 1_000);
    }
}
