//! harvester: resumable, rate-limit aware time-series harvest.
//!
//! Subcommands:
//! - `run`: fetch every job not yet done, checkpointing after each one
//! - `status`: progress from the checkpoint file
//! - `jobs`: the job catalog in processing order

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, warn};

use harvest_checkpoint::CheckpointStore;
use harvest_core::config::load_dotenv;
use harvest_core::{HarvestConfig, JobCatalog};
use harvest_fetch::HttpFetcher;
use harvest_runner::{checkpoint_status, init_tracing, Orchestrator, RunOptions};

// ── CLI ─────────────────────────────────────────────────────────────

/// Checkpointed harvester for (entity, query) time series.
#[derive(Parser, Debug)]
#[command(name = "harvester", version, about)]
struct Cli {
    /// Path to the TOML config file (default: ./harvest.toml when present).
    #[arg(long, env = "HARVEST_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Output directory override.
    #[arg(long, global = true)]
    output_dir: Option<PathBuf>,

    /// Log filter directives (falls back to RUST_LOG, then "info").
    #[arg(long, env = "HARVEST_LOG", global = true)]
    log_filter: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Harvest every pending job.
    Run {
        /// Stop after this many pending jobs have been attempted.
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Show checkpoint progress over the current catalog.
    Status {
        /// Also list the pending jobs.
        #[arg(long)]
        pending: bool,
    },
    /// Print the job catalog in processing order.
    Jobs,
}

// ── main ────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    load_dotenv();
    let cli = Cli::parse();

    let mut config =
        HarvestConfig::load(cli.config.as_deref()).context("failed to load configuration")?;
    if let Some(dir) = cli.output_dir {
        config.output_dir = dir;
    }

    match cli.command {
        Command::Run { limit } => run(config, cli.log_filter.as_deref(), limit).await,
        Command::Status { pending } => {
            init_tracing(cli.log_filter.as_deref(), None)?;
            config.log_rejected_env();
            status(&config, pending)
        }
        Command::Jobs => {
            init_tracing(cli.log_filter.as_deref(), None)?;
            config.log_rejected_env();
            jobs(&config)
        }
    }
}

async fn run(config: HarvestConfig, log_filter: Option<&str>, limit: Option<usize>) -> Result<()> {
    let log_path = config.log_path();
    init_tracing(log_filter, Some(&log_path)).context("failed to initialise logging")?;
    // also reports env overrides ignored while loading
    config.log_summary();
    info!(run_log = %log_path.display(), "harvester starting");

    let fetcher = HttpFetcher::from_config(&config).context("failed to create HTTP fetcher")?;
    let orchestrator =
        Orchestrator::new(&config, Arc::new(fetcher)).context("failed to prepare harvest")?;

    let summary = orchestrator
        .run(RunOptions { limit })
        .await
        .context("harvest aborted")?;

    if summary.is_complete() {
        info!(total = summary.total, "All jobs done");
    } else {
        for job in &summary.failed {
            warn!(entity = %job.entity_key, query = %job.query_key, "Left pending for the next run");
        }
        info!(
            done = summary.done_after,
            total = summary.total,
            "Harvest incomplete, re-run to resume"
        );
    }
    Ok(())
}

fn status(config: &HarvestConfig, show_pending: bool) -> Result<()> {
    let catalog = JobCatalog::from_config(config).context("invalid job catalog")?;
    let store = CheckpointStore::new(config.checkpoint_path());
    let report = checkpoint_status(&catalog, &store).context("failed to read checkpoint")?;

    println!("checkpoint: {}", store.path().display());
    println!(
        "done:       {}/{} ({:.1}%)",
        report.progress.done,
        report.progress.total,
        report.progress.fraction() * 100.0
    );
    println!("catalog:    {} entities x {} queries", catalog.entities().len(), catalog.queries().len());
    if report.orphaned > 0 {
        println!("orphaned:   {} records outside the current catalog", report.orphaned);
    }
    if show_pending {
        for job in &report.pending {
            println!("pending     {}\t{}", job.entity_key, job.query_key);
        }
    }
    Ok(())
}

fn jobs(config: &HarvestConfig) -> Result<()> {
    let catalog = JobCatalog::from_config(config).context("invalid job catalog")?;
    for (index, job) in catalog.enumerate().iter().enumerate() {
        println!("{:>5}  {}\t{}", index + 1, job.entity_key, job.query_key);
    }
    Ok(())
}
