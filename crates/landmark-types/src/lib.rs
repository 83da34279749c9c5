//! # landmark-types
//!
//! Shared domain types for the Landmark retrieval engine.
//!
//! This crate defines the data structures used throughout the system:
//! - Atoms: content-addressed vectors and their projected coordinates
//! - Samples: per-query telemetry and the external metrics feed
//! - Actions: tuning hypotheses and the approval lifecycle
//! - Audit: weight-update log entries and measured outcomes
//! - Settings: layered configuration
//!
//! ## Usage
//!
//! ```rust
//! use landmark_types::{Atom, AtomId};
//!
//! let atom = Atom::new(vec![0.1, 0.2, 0.3], "blob://1");
//! assert_eq!(atom.id, AtomId::compute(&[0.1, 0.2, 0.3], "blob://1"));
//! ```

pub mod action;
pub mod atom;
pub mod audit;
pub mod config;
pub mod error;
pub mod ingest;
pub mod params;
pub mod sample;

pub use action::{
    ActionPayload, ActionState, Hypothesis, HypothesisKind, MergeGroup, PendingAction, Risk,
    WeightTarget,
};
pub use atom::{Atom, AtomId, Coord, ProjectedCoordinate, DEFAULT_IMPORTANCE, PROJECTED_DIMS};
pub use audit::{AuditEntry, OutcomeRecord};
pub use config::{
    IndexSettings, IngestSettings, MetricsSettings, ProjectionSettings, RetrievalSettings,
    Settings, SimilarityMetric, TuningSettings,
};
pub use error::LandmarkError;
pub use ingest::{IngestOutcome, IngestRequest};
pub use params::{Bounds, IndexParams, LandmarkRecord, OutOfBoundsPolicy, MAX_RESOLUTION_BITS};
pub use sample::{MetricEvent, MetricOutcome, QueryErrorKind, QuerySample, SampleSource};
