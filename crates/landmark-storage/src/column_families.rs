//! Column family definitions for RocksDB.
//!
//! Each column family isolates data with different access patterns:
//! - atoms: content-addressed atom records (compressed)
//! - importance: mutable per-atom importance weights
//! - meta: landmark record and tuned parameters
//! - pending_actions: approval queue
//! - audit: append-only weight-update log
//! - learn_applied: dedup markers for applied weight updates
//! - outcomes: measured hypothesis outcomes
//! - ingest_queue: durable ingest feed

use rocksdb::{ColumnFamilyDescriptor, Options};

/// Column family name for atom records
pub const CF_ATOMS: &str = "atoms";

/// Column family name for importance weights
pub const CF_IMPORTANCE: &str = "importance";

/// Column family name for engine metadata
pub const CF_META: &str = "meta";

/// Column family name for pending actions
pub const CF_PENDING: &str = "pending_actions";

/// Column family name for the weight-update audit log
pub const CF_AUDIT: &str = "audit";

/// Column family name for applied-update markers
pub const CF_LEARN_APPLIED: &str = "learn_applied";

/// Column family name for outcome records
pub const CF_OUTCOMES: &str = "outcomes";

/// Column family name for the ingest queue
pub const CF_INGEST_QUEUE: &str = "ingest_queue";

/// All column family names
pub const ALL_CF_NAMES: &[&str] = &[
    CF_ATOMS,
    CF_IMPORTANCE,
    CF_META,
    CF_PENDING,
    CF_AUDIT,
    CF_LEARN_APPLIED,
    CF_OUTCOMES,
    CF_INGEST_QUEUE,
];

/// Atom records carry full vectors; compress them
fn atoms_options() -> Options {
    let mut opts = Options::default();
    opts.set_compression_type(rocksdb::DBCompressionType::Zstd);
    opts
}

/// Build all column family descriptors
pub fn build_cf_descriptors() -> Vec<ColumnFamilyDescriptor> {
    ALL_CF_NAMES
        .iter()
        .map(|name| {
            let opts = if *name == CF_ATOMS {
                atoms_options()
            } else {
                Options::default()
            };
            ColumnFamilyDescriptor::new(*name, opts)
        })
        .collect()
}
