//! Landmark daemon library.
//!
//! Exposes the CLI definition and command handlers so they can be tested
//! without spawning the binary.

pub mod cli;
pub mod commands;

pub use cli::{Cli, Commands, PendingCommands};
pub use commands::{
    handle_pending, ingest_file, init_logging, load_settings, run_engine, show_audit,
    show_status, IngestSummary,
};
