//! Query telemetry and the externally delivered metrics feed.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Why a query failed, if it did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryErrorKind {
    /// Deadline elapsed before the query completed
    Timeout,
    /// Caller cancelled the query
    Cancelled,
    /// The query vector was rejected by the projector
    InvalidQuery,
    /// Any other failure
    Internal,
}

/// Where a sample came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SampleSource {
    /// Emitted by the in-process retrieval engine
    #[default]
    Engine,
    /// Converted from an external `MetricEvent`
    Feed,
}

/// One query's telemetry row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuerySample {
    pub timestamp: DateTime<Utc>,
    pub stage1_latency: Duration,
    pub stage2_latency: Duration,
    /// Candidates returned by the spatial pre-filter
    pub candidate_count: usize,
    /// Results returned to the caller
    pub result_count: usize,
    /// Radius widenings performed in stage 1
    #[serde(default)]
    pub widenings: u32,
    /// Fewer than the requested pool size were found after all widenings
    #[serde(default)]
    pub pool_exhausted: bool,
    /// Answered from the result cache without touching the index
    #[serde(default)]
    pub cache_hit: bool,
    #[serde(default)]
    pub error_kind: Option<QueryErrorKind>,
    #[serde(default)]
    pub source: SampleSource,
}

impl QuerySample {
    /// Build a successful engine sample.
    pub fn new(stage1_latency: Duration, stage2_latency: Duration, candidate_count: usize, result_count: usize) -> Self {
        Self {
            timestamp: Utc::now(),
            stage1_latency,
            stage2_latency,
            candidate_count,
            result_count,
            widenings: 0,
            pool_exhausted: false,
            cache_hit: false,
            error_kind: None,
            source: SampleSource::Engine,
        }
    }

    /// Build a sample for a failed query.
    pub fn failed(kind: QueryErrorKind, stage1_latency: Duration) -> Self {
        Self {
            error_kind: Some(kind),
            ..Self::new(stage1_latency, Duration::ZERO, 0, 0)
        }
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn with_widenings(mut self, widenings: u32, pool_exhausted: bool) -> Self {
        self.widenings = widenings;
        self.pool_exhausted = pool_exhausted;
        self
    }

    pub fn with_cache_hit(mut self) -> Self {
        self.cache_hit = true;
        self
    }

    /// Whether this sample ran stage 1 against the index and completed.
    ///
    /// Only such samples contribute to latency percentiles.
    pub fn measures_latency(&self) -> bool {
        !self.cache_hit && self.error_kind.is_none()
    }
}

/// Outcome reported by the external metrics feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricOutcome {
    Success,
    /// Completed with no results
    Empty,
    /// Completed, but the candidate pool was exhausted
    Exhausted,
    Timeout,
    Error,
}

/// One `(operation, latency_ms, outcome)` event from the metrics feed.
///
/// Delivery is at-least-once; `event_id` is the de-duplication key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricEvent {
    pub event_id: String,
    pub operation: String,
    pub latency_ms: f64,
    pub outcome: MetricOutcome,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}

impl MetricEvent {
    pub fn new(event_id: impl Into<String>, operation: impl Into<String>, latency_ms: f64, outcome: MetricOutcome) -> Self {
        Self {
            event_id: event_id.into(),
            operation: operation.into(),
            latency_ms,
            outcome,
            timestamp: Utc::now(),
        }
    }

    /// Convert to a query sample.
    ///
    /// Operations whose name ends in `stage2` or `rerank` report stage-2
    /// latency; everything else is treated as stage-1 latency. Negative or
    /// non-finite latencies are recorded as zero.
    pub fn to_sample(&self) -> QuerySample {
        let latency = if self.latency_ms.is_finite() && self.latency_ms > 0.0 {
            Duration::from_secs_f64(self.latency_ms / 1000.0)
        } else {
            Duration::ZERO
        };
        let op = self.operation.to_ascii_lowercase();
        let (stage1, stage2) = if op.ends_with("stage2") || op.ends_with("rerank") {
            (Duration::ZERO, latency)
        } else {
            (latency, Duration::ZERO)
        };

        let mut sample = QuerySample::new(stage1, stage2, 0, 0).with_timestamp(self.timestamp);
        sample.source = SampleSource::Feed;
        match self.outcome {
            MetricOutcome::Success => sample.result_count = 1,
            MetricOutcome::Empty => {}
            MetricOutcome::Exhausted => sample.pool_exhausted = true,
            MetricOutcome::Timeout => sample.error_kind = Some(QueryErrorKind::Timeout),
            MetricOutcome::Error => sample.error_kind = Some(QueryErrorKind::Internal),
        }
        sample
    }
}
