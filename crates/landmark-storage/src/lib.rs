//! Storage layer for the Landmark engine.
//!
//! Provides RocksDB-backed storage with:
//! - Column family isolation per record type
//! - Atoms keyed by content hash, importance kept in its own family
//! - Append-only audit log with idempotent weight updates via WriteBatch
//! - Pending-action and outcome persistence for the tuning loop
//! - A durable ingest queue with enqueue/dequeue/ack semantics

pub mod column_families;
pub mod db;
pub mod error;
pub mod keys;
pub mod queue;

pub use db::{Storage, StorageStats};
pub use error::StorageError;
pub use keys::{MetaKey, SeqKey};
pub use queue::IngestQueue;
