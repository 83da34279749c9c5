//! Configuration loading for landmark.
//!
//! Layered config: defaults -> default config file -> CLI config file ->
//! environment variables -> CLI flags (applied by the caller).
//! The default file lives at `~/.config/landmark/config.toml`.

use std::path::PathBuf;
use std::time::Duration;

use config::{Config, Environment, File};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use crate::error::LandmarkError;
use crate::params::{Bounds, IndexParams, OutOfBoundsPolicy, MAX_RESOLUTION_BITS};

/// Landmark generation settings.
///
/// Changing `dimension` or `seed` invalidates every projected coordinate;
/// the service reprojects and rebuilds on the next open.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectionSettings {
    /// Dimensionality D of raw vectors
    #[serde(default = "default_dimension")]
    pub dimension: usize,

    /// Seed for the landmark generator. Fixed for the lifetime of a store.
    #[serde(default = "default_seed")]
    pub seed: u64,

    /// L2-normalize vectors before projecting
    #[serde(default = "default_true")]
    pub normalize: bool,
}

fn default_dimension() -> usize {
    128
}

fn default_seed() -> u64 {
    0x1A4D_3A2C
}

fn default_true() -> bool {
    true
}

impl Default for ProjectionSettings {
    fn default() -> Self {
        Self {
            dimension: default_dimension(),
            seed: default_seed(),
            normalize: true,
        }
    }
}

impl ProjectionSettings {
    pub fn validate(&self) -> Result<(), String> {
        if self.dimension < crate::atom::PROJECTED_DIMS {
            return Err(format!(
                "dimension must be >= {}, got {}",
                crate::atom::PROJECTED_DIMS,
                self.dimension
            ));
        }
        Ok(())
    }
}

/// Spatial index settings. Bounds and resolution are starting values; the
/// tuning loop persists its own changes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexSettings {
    #[serde(default = "default_bounds_min")]
    pub bounds_min: f32,

    #[serde(default = "default_bounds_max")]
    pub bounds_max: f32,

    /// Curve quantization bits per dimension (1-21)
    #[serde(default = "default_resolution_bits")]
    pub resolution_bits: u8,

    #[serde(default)]
    pub out_of_bounds: OutOfBoundsPolicy,

    #[serde(default = "default_max_node_entries")]
    pub max_node_entries: usize,
}

fn default_bounds_min() -> f32 {
    -1.0
}

fn default_bounds_max() -> f32 {
    1.0
}

fn default_resolution_bits() -> u8 {
    16
}

fn default_max_node_entries() -> usize {
    16
}

impl Default for IndexSettings {
    fn default() -> Self {
        Self {
            bounds_min: default_bounds_min(),
            bounds_max: default_bounds_max(),
            resolution_bits: default_resolution_bits(),
            out_of_bounds: OutOfBoundsPolicy::default(),
            max_node_entries: default_max_node_entries(),
        }
    }
}

impl IndexSettings {
    pub fn to_params(&self) -> IndexParams {
        IndexParams {
            bounds: Bounds::new(self.bounds_min, self.bounds_max),
            resolution_bits: self.resolution_bits,
            out_of_bounds: self.out_of_bounds,
            max_node_entries: self.max_node_entries,
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.resolution_bits > MAX_RESOLUTION_BITS {
            return Err(format!(
                "resolution_bits must be <= {}, got {}",
                MAX_RESOLUTION_BITS, self.resolution_bits
            ));
        }
        self.to_params().validate()
    }
}

/// Exact similarity used by stage 2.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SimilarityMetric {
    #[default]
    Cosine,
    /// Scored as `1 / (1 + distance)` so larger is better
    Euclidean,
}

/// Two-stage retrieval settings. The tuning loop may retune these at runtime.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievalSettings {
    /// Candidate pool size K = multiplier x final_k
    #[serde(default = "default_candidate_multiplier")]
    pub candidate_multiplier: usize,

    /// Starting stage-1 radius in projected space
    #[serde(default = "default_initial_radius")]
    pub initial_radius: f32,

    #[serde(default = "default_widen_factor")]
    pub widen_factor: f32,

    #[serde(default = "default_max_widenings")]
    pub max_widenings: u32,

    #[serde(default)]
    pub metric: SimilarityMetric,

    /// Timeout applied when the caller supplies none
    #[serde(default = "default_query_timeout_ms")]
    pub default_timeout_ms: u64,

    /// Result cache entries; 0 disables the cache
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: usize,
}

fn default_candidate_multiplier() -> usize {
    10
}

fn default_initial_radius() -> f32 {
    0.02
}

fn default_widen_factor() -> f32 {
    2.0
}

fn default_max_widenings() -> u32 {
    8
}

fn default_query_timeout_ms() -> u64 {
    1_000
}

fn default_cache_capacity() -> usize {
    256
}

impl Default for RetrievalSettings {
    fn default() -> Self {
        Self {
            candidate_multiplier: default_candidate_multiplier(),
            initial_radius: default_initial_radius(),
            widen_factor: default_widen_factor(),
            max_widenings: default_max_widenings(),
            metric: SimilarityMetric::default(),
            default_timeout_ms: default_query_timeout_ms(),
            cache_capacity: default_cache_capacity(),
        }
    }
}

impl RetrievalSettings {
    pub fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.default_timeout_ms)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.candidate_multiplier == 0 {
            return Err("candidate_multiplier must be > 0".to_string());
        }
        if !(self.initial_radius.is_finite() && self.initial_radius > 0.0) {
            return Err(format!("initial_radius must be > 0, got {}", self.initial_radius));
        }
        if !(self.widen_factor.is_finite() && self.widen_factor > 1.0) {
            return Err(format!("widen_factor must be > 1.0, got {}", self.widen_factor));
        }
        if self.default_timeout_ms == 0 {
            return Err("default_timeout_ms must be > 0".to_string());
        }
        Ok(())
    }
}

/// Metrics collector settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSettings {
    #[serde(default = "default_shards")]
    pub shards: usize,

    /// Samples retained per shard
    #[serde(default = "default_shard_capacity")]
    pub shard_capacity: usize,

    /// Trailing observation window
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,

    /// Most recent samples considered per window
    #[serde(default = "default_max_window_samples")]
    pub max_window_samples: usize,

    /// Remembered metric event ids for de-duplication
    #[serde(default = "default_dedup_capacity")]
    pub dedup_capacity: usize,

    /// EWMA weight of a new window in the latency baseline
    #[serde(default = "default_baseline_alpha")]
    pub baseline_alpha: f64,

    /// Latency samples a window needs before it can set the baseline
    #[serde(default = "default_min_baseline_samples")]
    pub min_baseline_samples: usize,
}

fn default_shards() -> usize {
    8
}

fn default_shard_capacity() -> usize {
    1_024
}

fn default_window_secs() -> u64 {
    300
}

fn default_max_window_samples() -> usize {
    50
}

fn default_dedup_capacity() -> usize {
    4_096
}

fn default_baseline_alpha() -> f64 {
    0.2
}

fn default_min_baseline_samples() -> usize {
    20
}

impl Default for MetricsSettings {
    fn default() -> Self {
        Self {
            shards: default_shards(),
            shard_capacity: default_shard_capacity(),
            window_secs: default_window_secs(),
            max_window_samples: default_max_window_samples(),
            dedup_capacity: default_dedup_capacity(),
            baseline_alpha: default_baseline_alpha(),
            min_baseline_samples: default_min_baseline_samples(),
        }
    }
}

impl MetricsSettings {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.shards == 0 || self.shard_capacity == 0 {
            return Err("shards and shard_capacity must be > 0".to_string());
        }
        if self.max_window_samples == 0 {
            return Err("max_window_samples must be > 0".to_string());
        }
        if !(self.baseline_alpha > 0.0 && self.baseline_alpha <= 1.0) {
            return Err(format!(
                "baseline_alpha must be in (0, 1], got {}",
                self.baseline_alpha
            ));
        }
        Ok(())
    }
}

/// Tuning loop settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TuningSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Delay after the first cycle and the reference for later delays
    #[serde(default = "default_base_delay_secs")]
    pub base_delay_secs: u64,

    #[serde(default = "default_min_delay_secs")]
    pub min_delay_secs: u64,

    #[serde(default = "default_max_delay_secs")]
    pub max_delay_secs: u64,

    /// |outcome| that maps to exactly `base_delay_secs`
    #[serde(default = "default_reference_score")]
    pub reference_score: f64,

    #[serde(default = "default_learning_rate")]
    pub learning_rate: f32,

    #[serde(default = "default_importance_min")]
    pub importance_min: f32,

    #[serde(default = "default_importance_max")]
    pub importance_max: f32,

    /// Attempts per action before it is marked failed
    #[serde(default = "default_action_max_attempts")]
    pub action_max_attempts: u32,

    #[serde(default = "default_retry_initial_ms")]
    pub retry_initial_ms: u64,

    /// Pending actions expire after this long without a decision
    #[serde(default = "default_pending_ttl_secs")]
    pub pending_ttl_secs: u64,

    /// Samples a window needs before detectors fire
    #[serde(default = "default_min_window_samples")]
    pub min_window_samples: usize,

    /// Stage-1 p50 over baseline ratio that counts as a regression
    #[serde(default = "default_latency_regression_factor")]
    pub latency_regression_factor: f64,

    #[serde(default = "default_exhaustion_rate_threshold")]
    pub exhaustion_rate_threshold: f64,

    /// Fraction of coordinates outside bounds that triggers a resize
    #[serde(default = "default_out_of_bounds_threshold")]
    pub out_of_bounds_threshold: f64,

    #[serde(default = "default_prune_importance_floor")]
    pub prune_importance_floor: f32,

    /// Atoms not accessed for this long are idle
    #[serde(default = "default_prune_idle_secs")]
    pub prune_idle_secs: u64,

    /// Smallest group of idle low-importance atoms worth proposing
    #[serde(default = "default_prune_min_cluster")]
    pub prune_min_cluster: usize,

    #[serde(default = "default_prune_max_batch")]
    pub prune_max_batch: usize,

    /// Projected distance under which two atoms are duplicate candidates
    #[serde(default = "default_duplicate_distance")]
    pub duplicate_distance: f32,

    /// Raw-vector cosine a candidate pair must also reach
    #[serde(default = "default_duplicate_min_similarity")]
    pub duplicate_min_similarity: f32,

    #[serde(default = "default_duplicate_scan_limit")]
    pub duplicate_scan_limit: usize,

    #[serde(default = "default_max_merge_groups")]
    pub max_merge_groups: usize,

    /// Result hits that make an atom hot
    #[serde(default = "default_hot_atom_min_hits")]
    pub hot_atom_min_hits: u64,

    #[serde(default = "default_hot_atom_max_targets")]
    pub hot_atom_max_targets: usize,

    /// Cache hits that make a stale query worth re-warming
    #[serde(default = "default_cache_warm_min_hits")]
    pub cache_warm_min_hits: u64,

    #[serde(default = "default_cache_warm_limit")]
    pub cache_warm_limit: usize,

    /// Post-action samples needed before an outcome is scored
    #[serde(default = "default_outcome_min_samples")]
    pub outcome_min_samples: usize,

    /// Cycles to wait for those samples before giving up
    #[serde(default = "default_outcome_max_wait_cycles")]
    pub outcome_max_wait_cycles: u32,
}

fn default_base_delay_secs() -> u64 {
    60
}

fn default_min_delay_secs() -> u64 {
    5
}

fn default_max_delay_secs() -> u64 {
    600
}

fn default_reference_score() -> f64 {
    0.1
}

fn default_learning_rate() -> f32 {
    0.1
}

fn default_importance_min() -> f32 {
    0.0
}

fn default_importance_max() -> f32 {
    10.0
}

fn default_action_max_attempts() -> u32 {
    3
}

fn default_retry_initial_ms() -> u64 {
    100
}

fn default_pending_ttl_secs() -> u64 {
    7 * 24 * 3600
}

fn default_min_window_samples() -> usize {
    20
}

fn default_latency_regression_factor() -> f64 {
    2.0
}

fn default_exhaustion_rate_threshold() -> f64 {
    0.5
}

fn default_out_of_bounds_threshold() -> f64 {
    0.05
}

fn default_prune_importance_floor() -> f32 {
    0.2
}

fn default_prune_idle_secs() -> u64 {
    30 * 24 * 3600
}

fn default_prune_min_cluster() -> usize {
    3
}

fn default_prune_max_batch() -> usize {
    100
}

fn default_duplicate_distance() -> f32 {
    0.002
}

fn default_duplicate_min_similarity() -> f32 {
    0.995
}

fn default_duplicate_scan_limit() -> usize {
    10_000
}

fn default_max_merge_groups() -> usize {
    50
}

fn default_hot_atom_min_hits() -> u64 {
    50
}

fn default_hot_atom_max_targets() -> usize {
    10
}

fn default_cache_warm_min_hits() -> u64 {
    3
}

fn default_cache_warm_limit() -> usize {
    32
}

fn default_outcome_min_samples() -> usize {
    10
}

fn default_outcome_max_wait_cycles() -> u32 {
    5
}

impl Default for TuningSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            base_delay_secs: default_base_delay_secs(),
            min_delay_secs: default_min_delay_secs(),
            max_delay_secs: default_max_delay_secs(),
            reference_score: default_reference_score(),
            learning_rate: default_learning_rate(),
            importance_min: default_importance_min(),
            importance_max: default_importance_max(),
            action_max_attempts: default_action_max_attempts(),
            retry_initial_ms: default_retry_initial_ms(),
            pending_ttl_secs: default_pending_ttl_secs(),
            min_window_samples: default_min_window_samples(),
            latency_regression_factor: default_latency_regression_factor(),
            exhaustion_rate_threshold: default_exhaustion_rate_threshold(),
            out_of_bounds_threshold: default_out_of_bounds_threshold(),
            prune_importance_floor: default_prune_importance_floor(),
            prune_idle_secs: default_prune_idle_secs(),
            prune_min_cluster: default_prune_min_cluster(),
            prune_max_batch: default_prune_max_batch(),
            duplicate_distance: default_duplicate_distance(),
            duplicate_min_similarity: default_duplicate_min_similarity(),
            duplicate_scan_limit: default_duplicate_scan_limit(),
            max_merge_groups: default_max_merge_groups(),
            hot_atom_min_hits: default_hot_atom_min_hits(),
            hot_atom_max_targets: default_hot_atom_max_targets(),
            cache_warm_min_hits: default_cache_warm_min_hits(),
            cache_warm_limit: default_cache_warm_limit(),
            outcome_min_samples: default_outcome_min_samples(),
            outcome_max_wait_cycles: default_outcome_max_wait_cycles(),
        }
    }
}

impl TuningSettings {
    pub fn base_delay(&self) -> Duration {
        Duration::from_secs(self.base_delay_secs)
    }

    pub fn min_delay(&self) -> Duration {
        Duration::from_secs(self.min_delay_secs)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_secs(self.max_delay_secs)
    }

    pub fn pending_ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.pending_ttl_secs.min(i64::MAX as u64) as i64)
    }

    pub fn prune_idle(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.prune_idle_secs.min(i64::MAX as u64) as i64)
    }

    /// Clamp an importance value into the configured range.
    pub fn clamp_importance(&self, value: f32) -> f32 {
        value.clamp(self.importance_min, self.importance_max)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.min_delay_secs > self.max_delay_secs {
            return Err(format!(
                "min_delay_secs ({}) must be <= max_delay_secs ({})",
                self.min_delay_secs, self.max_delay_secs
            ));
        }
        if !(self.reference_score > 0.0 && self.reference_score <= 1.0) {
            return Err(format!(
                "reference_score must be in (0, 1], got {}",
                self.reference_score
            ));
        }
        if !(self.learning_rate.is_finite() && self.learning_rate >= 0.0) {
            return Err(format!("learning_rate must be >= 0, got {}", self.learning_rate));
        }
        if !(self.importance_min.is_finite()
            && self.importance_max.is_finite()
            && self.importance_min < self.importance_max)
        {
            return Err(format!(
                "importance range [{}, {}] is invalid",
                self.importance_min, self.importance_max
            ));
        }
        if self.action_max_attempts == 0 {
            return Err("action_max_attempts must be > 0".to_string());
        }
        if self.latency_regression_factor <= 1.0 {
            return Err(format!(
                "latency_regression_factor must be > 1.0, got {}",
                self.latency_regression_factor
            ));
        }
        if !(0.0..=1.0).contains(&self.exhaustion_rate_threshold)
            || !(0.0..=1.0).contains(&self.out_of_bounds_threshold)
        {
            return Err("rate thresholds must be in [0, 1]".to_string());
        }
        if !(-1.0..=1.0).contains(&self.duplicate_min_similarity) {
            return Err(format!(
                "duplicate_min_similarity must be in [-1, 1], got {}",
                self.duplicate_min_similarity
            ));
        }
        if self.prune_min_cluster == 0 {
            return Err("prune_min_cluster must be > 0".to_string());
        }
        Ok(())
    }
}

/// Durable ingest queue settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestSettings {
    #[serde(default = "default_queue_batch_size")]
    pub queue_batch_size: usize,

    #[serde(default = "default_drain_interval_ms")]
    pub drain_interval_ms: u64,
}

fn default_queue_batch_size() -> usize {
    256
}

fn default_drain_interval_ms() -> u64 {
    1_000
}

impl Default for IngestSettings {
    fn default() -> Self {
        Self {
            queue_batch_size: default_queue_batch_size(),
            drain_interval_ms: default_drain_interval_ms(),
        }
    }
}

/// Main application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Path to RocksDB storage directory
    #[serde(default = "default_db_path")]
    pub db_path: String,

    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default)]
    pub projection: ProjectionSettings,

    #[serde(default)]
    pub index: IndexSettings,

    #[serde(default)]
    pub retrieval: RetrievalSettings,

    #[serde(default)]
    pub metrics: MetricsSettings,

    #[serde(default)]
    pub tuning: TuningSettings,

    #[serde(default)]
    pub ingest: IngestSettings,
}

fn default_db_path() -> String {
    ProjectDirs::from("", "", "landmark")
        .map(|p| p.data_local_dir().join("db"))
        .unwrap_or_else(|| PathBuf::from("./data"))
        .to_string_lossy()
        .to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            log_level: default_log_level(),
            projection: ProjectionSettings::default(),
            index: IndexSettings::default(),
            retrieval: RetrievalSettings::default(),
            metrics: MetricsSettings::default(),
            tuning: TuningSettings::default(),
            ingest: IngestSettings::default(),
        }
    }
}

impl Settings {
    /// Load settings with layered precedence:
    /// 1. Built-in defaults
    /// 2. Config file (~/.config/landmark/config.toml)
    /// 3. CLI-specified config file (optional)
    /// 4. Environment variables (`LANDMARK_DB_PATH`, `LANDMARK_TUNING__LEARNING_RATE`, ...)
    ///
    /// CLI flags should be applied by the caller after this returns.
    pub fn load(cli_config_path: Option<&str>) -> Result<Self, LandmarkError> {
        let config_dir = ProjectDirs::from("", "", "landmark")
            .map(|p| p.config_dir().to_path_buf())
            .unwrap_or_else(|| PathBuf::from("."));

        let default_config_path = config_dir.join("config");

        let mut builder = Config::builder()
            .set_default("db_path", default_db_path())
            .map_err(|e| LandmarkError::Config(e.to_string()))?
            .set_default("log_level", default_log_level())
            .map_err(|e| LandmarkError::Config(e.to_string()))?
            .add_source(File::with_name(&default_config_path.to_string_lossy()).required(false));

        if let Some(path) = cli_config_path {
            builder = builder.add_source(File::with_name(path).required(true));
        }

        // Nested keys use a double underscore: LANDMARK_RETRIEVAL__MAX_WIDENINGS
        builder = builder.add_source(
            Environment::with_prefix("LANDMARK")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder
            .build()
            .map_err(|e| LandmarkError::Config(e.to_string()))?;

        let settings: Settings = config
            .try_deserialize()
            .map_err(|e| LandmarkError::Config(e.to_string()))?;
        settings.validate()?;
        Ok(settings)
    }

    /// Validate every section.
    pub fn validate(&self) -> Result<(), LandmarkError> {
        let checks = [
            ("projection", self.projection.validate()),
            ("index", self.index.validate()),
            ("retrieval", self.retrieval.validate()),
            ("metrics", self.metrics.validate()),
            ("tuning", self.tuning.validate()),
        ];
        for (section, result) in checks {
            if let Err(msg) = result {
                return Err(LandmarkError::Config(format!("[{}] {}", section, msg)));
            }
        }
        Ok(())
    }

    /// Expand ~ in db_path to the home directory
    pub fn expanded_db_path(&self) -> PathBuf {
        if let Some(rest) = self.db_path.strip_prefix("~/") {
            if let Some(home) = std::env::var_os("HOME") {
                return PathBuf::from(home).join(rest);
            }
        }
        PathBuf::from(&self.db_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_settings() {
        let settings = Settings::default();
        assert_eq!(settings.projection.dimension, 128);
        assert_eq!(settings.retrieval.candidate_multiplier, 10);
        assert_eq!(settings.retrieval.max_widenings, 8);
        assert_eq!(settings.metrics.max_window_samples, 50);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_load_with_cli_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "db_path = \"/tmp/landmark-test\"\n[projection]\ndimension = 64\n[tuning]\nlearning_rate = 0.25"
        )
        .unwrap();

        let settings = Settings::load(Some(&file.path().to_string_lossy())).unwrap();
        assert_eq!(settings.db_path, "/tmp/landmark-test");
        assert_eq!(settings.projection.dimension, 64);
        assert!((settings.tuning.learning_rate - 0.25).abs() < f32::EPSILON);
        // Untouched sections keep their defaults
        assert_eq!(settings.retrieval.candidate_multiplier, 10);
    }

    #[test]
    fn test_load_rejects_invalid_section() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "[index]\nresolution_bits = 30").unwrap();

        let err = Settings::load(Some(&file.path().to_string_lossy())).unwrap_err();
        assert!(err.to_string().contains("[index]"));
    }

    #[test]
    fn test_tuning_validation() {
        let mut tuning = TuningSettings::default();
        assert!(tuning.validate().is_ok());

        tuning.min_delay_secs = 700;
        assert!(tuning.validate().is_err());

        tuning.min_delay_secs = 5;
        tuning.importance_max = -1.0;
        assert!(tuning.validate().is_err());
    }

    #[test]
    fn test_clamp_importance() {
        let tuning = TuningSettings::default();
        assert_eq!(tuning.clamp_importance(11.0), 10.0);
        assert_eq!(tuning.clamp_importance(-0.5), 0.0);
        assert_eq!(tuning.clamp_importance(1.5), 1.5);
    }

    #[test]
    fn test_retrieval_settings_serialization() {
        let settings = RetrievalSettings::default();
        let json = serde_json::to_string(&settings).unwrap();
        let decoded: RetrievalSettings = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded, settings);
    }
}
