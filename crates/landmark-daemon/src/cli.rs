//! CLI argument parsing for the landmark daemon.
//!
//! CLI flags override every other configuration source.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Landmark retrieval engine
///
/// Semantic retrieval over projected vectors with a self-tuning loop.
#[derive(Parser, Debug)]
#[command(name = "landmark")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to config file (overrides default ~/.config/landmark/config.toml)
    #[arg(short, long, global = true)]
    pub config: Option<String>,

    /// Set log level (trace, debug, info, warn, error)
    #[arg(short, long, global = true)]
    pub log_level: Option<String>,

    /// Override database path
    #[arg(long, global = true)]
    pub db_path: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the engine with its tuning loop and ingest worker until interrupted
    Run {
        /// Do not start the tuning loop
        #[arg(long)]
        no_tuning: bool,
    },

    /// Ingest a JSON-lines file of {"raw_vector": [...], "payload_ref": "..."} records
    Ingest {
        file: PathBuf,

        /// Append to the durable queue instead of applying directly
        #[arg(long)]
        enqueue: bool,
    },

    /// Show engine statistics
    Status,

    /// Manage actions awaiting approval
    Pending {
        #[command(subcommand)]
        command: PendingCommands,
    },

    /// Show the weight-update audit log
    Audit {
        /// Most recent entries to show
        #[arg(short = 'n', long, default_value_t = 20)]
        limit: usize,
    },
}

#[derive(Subcommand, Debug, Clone)]
pub enum PendingCommands {
    /// List pending actions, highest priority first
    List {
        /// Include decided and executed actions
        #[arg(long)]
        all: bool,
    },

    /// Approve an action; it runs in the next tuning cycle
    Approve { action_id: String },

    /// Reject an action
    Reject {
        action_id: String,

        #[arg(long)]
        reason: Option<String>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_run() {
        let cli = Cli::parse_from(["landmark", "run"]);
        assert!(matches!(cli.command, Commands::Run { no_tuning: false }));
    }

    #[test]
    fn test_cli_global_overrides() {
        let cli = Cli::parse_from([
            "landmark",
            "status",
            "--db-path",
            "/custom/db",
            "--log-level",
            "debug",
        ]);
        assert_eq!(cli.db_path, Some("/custom/db".to_string()));
        assert_eq!(cli.log_level, Some("debug".to_string()));
        assert!(matches!(cli.command, Commands::Status));
    }

    #[test]
    fn test_cli_ingest_enqueue() {
        let cli = Cli::parse_from(["landmark", "ingest", "atoms.jsonl", "--enqueue"]);
        match cli.command {
            Commands::Ingest { file, enqueue } => {
                assert_eq!(file, PathBuf::from("atoms.jsonl"));
                assert!(enqueue);
            }
            _ => panic!("Expected Ingest command"),
        }
    }

    #[test]
    fn test_cli_pending_reject() {
        let cli = Cli::parse_from(["landmark", "pending", "reject", "01HX", "--reason", "too risky"]);
        match cli.command {
            Commands::Pending {
                command: PendingCommands::Reject { action_id, reason },
            } => {
                assert_eq!(action_id, "01HX");
                assert_eq!(reason.as_deref(), Some("too risky"));
            }
            _ => panic!("Expected Pending Reject command"),
        }
    }

    #[test]
    fn test_cli_audit_limit() {
        let cli = Cli::parse_from(["landmark", "audit", "-n", "5"]);
        assert!(matches!(cli.command, Commands::Audit { limit: 5 }));
    }
}
