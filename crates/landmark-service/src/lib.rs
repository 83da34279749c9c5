//! Landmark engine service.
//!
//! Wires projection, the spatial index, storage, retrieval, and the tuning
//! loop into one [`Engine`] with an explicit lifecycle:
//!
//! ```ignore
//! let engine = Engine::open(settings)?;
//! engine.start();
//!
//! let id = engine.insert(vector, "blob://doc-1")?;
//! let response = engine.search(query, 10, None).await?;
//!
//! for action in engine.list_pending() {
//!     engine.approve(&action.id)?;
//! }
//!
//! engine.shutdown().await?;
//! ```

mod core;
mod engine;
mod error;
mod target;

pub use core::{DrainReport, OpenReport};
pub use engine::{Engine, EngineStats};
pub use error::{IngestError, ServiceError};
