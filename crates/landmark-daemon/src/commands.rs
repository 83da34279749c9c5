//! Command implementations.
//!
//! Every command opens the engine directly on the configured database.
//! RocksDB allows one process per database, so admin commands fail while
//! `landmark run` holds it.

use std::fs::{self, File};
use std::io::{BufRead, BufReader};
use std::path::Path;

use anyhow::{bail, Context, Result};
use landmark_service::Engine;
use landmark_types::{IngestRequest, Settings};
use tokio::signal;
use tracing::{info, warn};

use crate::cli::PendingCommands;

/// Load configuration and apply CLI overrides (highest precedence).
pub fn load_settings(
    config_path: Option<&str>,
    db_path_override: Option<&str>,
    log_level_override: Option<&str>,
) -> Result<Settings> {
    let mut settings = Settings::load(config_path).context("Failed to load configuration")?;
    if let Some(db_path) = db_path_override {
        settings.db_path = db_path.to_string();
    }
    if let Some(log_level) = log_level_override {
        settings.log_level = log_level.to_string();
    }
    Ok(settings)
}

/// Install the global tracing subscriber. `RUST_LOG` wins over the config.
pub fn init_logging(settings: &Settings) -> Result<()> {
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&settings.log_level)),
        )
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set tracing subscriber")?;
    Ok(())
}

fn open_engine(settings: Settings) -> Result<Engine> {
    let db_path = settings.expanded_db_path();
    if let Some(parent) = db_path.parent() {
        fs::create_dir_all(parent).context("Failed to create database directory")?;
    }
    Engine::open(settings).with_context(|| format!("Failed to open engine at {:?}", db_path))
}

/// Run the engine until Ctrl+C or SIGTERM.
pub async fn run_engine(mut settings: Settings, no_tuning: bool) -> Result<()> {
    if no_tuning {
        settings.tuning.enabled = false;
    }
    info!("Landmark starting...");
    info!("  Database path: {}", settings.db_path);
    info!("  Dimension: {}", settings.projection.dimension);
    info!("  Tuning: {}", settings.tuning.enabled);

    let engine = open_engine(settings)?;
    let report = engine.open_report();
    info!(
        atoms = report.atoms_loaded,
        landmark_version = report.landmark_version,
        reprojected = report.reprojected,
        "Engine ready"
    );
    engine.start();

    shutdown_signal().await?;
    engine.shutdown().await.context("Shutdown failed")?;
    Ok(())
}

async fn shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        let mut terminate = signal::unix::signal(signal::unix::SignalKind::terminate())
            .context("Failed to install SIGTERM handler")?;
        tokio::select! {
            result = signal::ctrl_c() => {
                result.context("Failed to listen for Ctrl+C")?;
                info!("Received Ctrl+C, shutting down...");
            }
            _ = terminate.recv() => {
                info!("Received SIGTERM, shutting down...");
            }
        }
    }
    #[cfg(not(unix))]
    {
        signal::ctrl_c()
            .await
            .context("Failed to listen for Ctrl+C")?;
        info!("Received Ctrl+C, shutting down...");
    }
    Ok(())
}

/// Counts from one ingest run.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct IngestSummary {
    pub created: usize,
    pub duplicates: usize,
    pub queued: usize,
    /// Lines that failed to parse or were rejected
    pub failed: usize,
}

/// Ingest a JSON-lines file, one `IngestRequest` per line.
///
/// Bad lines are reported and skipped; the rest are still applied.
pub fn ingest_file(settings: Settings, path: &Path, enqueue: bool) -> Result<IngestSummary> {
    let file = File::open(path).with_context(|| format!("Failed to open {:?}", path))?;
    let engine = open_engine(settings)?;
    let mut summary = IngestSummary::default();

    for (n, line) in BufReader::new(file).lines().enumerate() {
        let line = line.with_context(|| format!("Failed to read {:?}", path))?;
        if line.trim().is_empty() {
            continue;
        }
        let request: IngestRequest = match serde_json::from_str(&line) {
            Ok(request) => request,
            Err(e) => {
                warn!(line = n + 1, error = %e, "Skipping malformed line");
                summary.failed += 1;
                continue;
            }
        };

        if enqueue {
            match engine.enqueue_ingest(&request) {
                Ok(_) => summary.queued += 1,
                Err(e) => {
                    warn!(line = n + 1, error = %e, "Rejected");
                    summary.failed += 1;
                }
            }
            continue;
        }
        match engine.ingest(request) {
            Ok(outcome) if outcome.created => summary.created += 1,
            Ok(_) => summary.duplicates += 1,
            Err(e) if e.is_permanent() => {
                warn!(line = n + 1, error = %e, "Rejected");
                summary.failed += 1;
            }
            Err(e) => return Err(e).context("Ingest failed"),
        }
    }

    engine.storage().flush().context("Failed to flush storage")?;
    Ok(summary)
}

pub fn show_status(settings: Settings) -> Result<()> {
    let engine = open_engine(settings)?;
    let stats = engine.stats().context("Failed to collect stats")?;
    println!("{}", serde_json::to_string_pretty(&stats)?);
    Ok(())
}

pub fn handle_pending(settings: Settings, command: PendingCommands) -> Result<()> {
    let engine = open_engine(settings)?;
    match command {
        PendingCommands::List { all } => {
            let actions = if all {
                engine.list_actions()
            } else {
                engine.list_pending()
            };
            if actions.is_empty() {
                println!("No actions.");
                return Ok(());
            }
            for action in actions {
                println!(
                    "{}  {:<9} {:<21} p{:<3} expires {}  {}",
                    action.id,
                    action.state.to_string(),
                    action.hypothesis.kind.to_string(),
                    action.hypothesis.priority,
                    action.expires_at.format("%Y-%m-%d %H:%M"),
                    action.hypothesis.rationale
                );
            }
        }
        PendingCommands::Approve { action_id } => {
            let action = engine
                .approve(&action_id)
                .with_context(|| format!("Failed to approve {}", action_id))?;
            println!("Approved {} ({})", action.id, action.hypothesis.kind);
        }
        PendingCommands::Reject { action_id, reason } => {
            let action = engine
                .reject(&action_id, reason)
                .with_context(|| format!("Failed to reject {}", action_id))?;
            println!("Rejected {} ({})", action.id, action.hypothesis.kind);
        }
    }
    Ok(())
}

pub fn show_audit(settings: Settings, limit: usize) -> Result<()> {
    if limit == 0 {
        bail!("--limit must be > 0");
    }
    let engine = open_engine(settings)?;
    let entries = engine.audit_log(limit)?;
    if entries.is_empty() {
        println!("No weight updates recorded.");
        return Ok(());
    }
    for entry in entries {
        println!(
            "{:>6}  {}  cycle {}  atom {}  {:.4} -> {:.4} ({:+.4}, score {:+.3})",
            entry.seq,
            entry.timestamp.format("%Y-%m-%d %H:%M:%S"),
            entry.cycle_id,
            entry.atom_id.short(),
            entry.previous,
            entry.value,
            entry.delta,
            entry.outcome_score
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    fn test_settings(temp: &TempDir) -> Settings {
        let mut settings = Settings::default();
        settings.db_path = temp.path().join("db").to_string_lossy().to_string();
        settings.projection.dimension = 4;
        settings
    }

    fn write_jsonl(temp: &TempDir, lines: &[&str]) -> std::path::PathBuf {
        let path = temp.path().join("atoms.jsonl");
        let mut file = File::create(&path).unwrap();
        for line in lines {
            writeln!(file, "{}", line).unwrap();
        }
        path
    }

    #[test]
    fn test_ingest_file_counts() {
        let temp = TempDir::new().unwrap();
        let path = write_jsonl(
            &temp,
            &[
                r#"{"raw_vector": [0.1, 0.2, 0.3, 0.4], "payload_ref": "blob://a"}"#,
                r#"{"raw_vector": [0.1, 0.2, 0.3, 0.4], "payload_ref": "blob://a"}"#,
                r#"{"raw_vector": [0.4, 0.3, 0.2, 0.1], "payload_ref": "blob://b"}"#,
                "",
                r#"{"raw_vector": [0.1], "payload_ref": "blob://short"}"#,
                "not json",
            ],
        );

        let summary = ingest_file(test_settings(&temp), &path, false).unwrap();
        assert_eq!(
            summary,
            IngestSummary {
                created: 2,
                duplicates: 1,
                queued: 0,
                failed: 2,
            }
        );
    }

    #[test]
    fn test_ingest_file_enqueue() {
        let temp = TempDir::new().unwrap();
        let path = write_jsonl(
            &temp,
            &[r#"{"raw_vector": [1.0, 0.0, 0.0, 0.0], "payload_ref": "blob://q"}"#],
        );
        let summary = ingest_file(test_settings(&temp), &path, true).unwrap();
        assert_eq!(summary.queued, 1);

        let engine = open_engine(test_settings(&temp)).unwrap();
        assert_eq!(engine.drain_ingest_queue().unwrap().applied, 1);
    }

    #[test]
    fn test_audit_rejects_zero_limit() {
        let temp = TempDir::new().unwrap();
        assert!(show_audit(test_settings(&temp), 0).is_err());
    }

    #[test]
    fn test_approve_unknown_action_fails() {
        let temp = TempDir::new().unwrap();
        let result = handle_pending(
            test_settings(&temp),
            PendingCommands::Approve {
                action_id: "missing".to_string(),
            },
        );
        assert!(result.is_err());
    }
}
