//! # landmark-retrieval
//!
//! Two-stage nearest-neighbour retrieval over projected atoms.
//!
//! Stage 1 asks the spatial index for a candidate pool around the projected
//! query, widening the radius geometrically until the pool is full. Stage 2
//! reranks the pool by exact similarity on the original vectors. Every query
//! emits a [`QuerySample`](landmark_types::QuerySample) to the
//! [`MetricsCollector`], which the tuning loop observes.

pub mod cache;
pub mod catalog;
pub mod engine;
pub mod error;
pub mod metrics;

pub use cache::{CacheStats, QueryCache};
pub use catalog::{AtomCatalog, CatalogEntry};
pub use engine::{
    Diagnostic, QueryStats, RetrievalEngine, ScoredAtom, SearchOptions, SearchResponse,
};
pub use error::{QueryStage, RetrievalError};
pub use metrics::{Baseline, MetricsCollector, MetricsSnapshot, WindowStats};
