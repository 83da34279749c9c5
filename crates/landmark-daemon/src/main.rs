//! Landmark daemon binary.
//!
//! Usage:
//!   landmark run [--no-tuning]
//!   landmark ingest atoms.jsonl [--enqueue]
//!   landmark status
//!   landmark pending list|approve|reject
//!   landmark audit [-n 20]

use anyhow::Result;
use clap::Parser;
use landmark_daemon::{
    handle_pending, ingest_file, init_logging, load_settings, run_engine, show_audit,
    show_status, Cli, Commands,
};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = load_settings(
        cli.config.as_deref(),
        cli.db_path.as_deref(),
        cli.log_level.as_deref(),
    )?;
    init_logging(&settings)?;

    match cli.command {
        Commands::Run { no_tuning } => run_engine(settings, no_tuning).await?,
        Commands::Ingest { file, enqueue } => {
            let summary = ingest_file(settings, &file, enqueue)?;
            println!(
                "created {}, duplicates {}, queued {}, failed {}",
                summary.created, summary.duplicates, summary.queued, summary.failed
            );
        }
        Commands::Status => show_status(settings)?,
        Commands::Pending { command } => handle_pending(settings, command)?,
        Commands::Audit { limit } => show_audit(settings, limit)?,
    }

    Ok(())
}
