//! Sequential harvest loop.
//!
//! One job at a time, in catalog order. For every job the outputs are written
//! and confirmed before its checkpoint record flips to done, and the
//! checkpoint is saved before the next job starts.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, error, info, warn};

use harvest_checkpoint::{Checkpoint, CheckpointStore, Progress};
use harvest_core::{aggregate, BackoffPolicy, HarvestConfig, Job, JobCatalog, RawSeries, Resolution};
use harvest_fetch::Fetcher;

use crate::error::HarvestError;
use crate::output::{write_job_outputs, OutputLayout};

// ── Job lifecycle ───────────────────────────────────────────────────

/// Lifecycle of a job within a run. Only `Done` is ever persisted; every other
/// state is `done=false` in the checkpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum JobState {
    Pending,
    InProgress,
    Done,
    PendingRetry,
    FailedThisRun,
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobState::Pending => "pending",
            JobState::InProgress => "in_progress",
            JobState::Done => "done",
            JobState::PendingRetry => "pending_retry",
            JobState::FailedThisRun => "failed_this_run",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum JobOutcome {
    Done { empty: bool },
    FailedThisRun,
}

// ── Run reporting ───────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default)]
pub struct RunOptions {
    /// Stop after this many pending jobs have been attempted.
    pub limit: Option<usize>,
}

/// What one invocation of [`Orchestrator::run`] did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    /// Jobs in the catalog.
    pub total: usize,
    /// Already done when the run started.
    pub skipped_done: usize,
    pub attempted: usize,
    pub completed: usize,
    /// Completed jobs whose series had no points.
    pub empty: usize,
    pub failed: Vec<Job>,
    /// Done over the catalog when the run ended.
    pub done_after: usize,
}

impl RunSummary {
    /// Every catalog job is done.
    pub fn is_complete(&self) -> bool {
        self.done_after == self.total
    }
}

/// Checkpoint view over the current catalog, without fetching anything.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusReport {
    pub progress: Progress,
    pub pending: Vec<Job>,
    /// Checkpoint records for jobs no longer in the catalog.
    pub orphaned: usize,
}

/// Load the checkpoint and report progress over `catalog` without writing.
pub fn checkpoint_status(
    catalog: &JobCatalog,
    store: &CheckpointStore,
) -> Result<StatusReport, HarvestError> {
    let jobs = catalog.enumerate();
    let mut checkpoint = store.load()?;
    let known = checkpoint.len();
    let appended = checkpoint.reconcile(&jobs);
    let in_catalog = jobs.len() - appended;

    Ok(StatusReport {
        progress: checkpoint.progress(&jobs),
        pending: jobs.iter().filter(|j| !checkpoint.is_done(j)).cloned().collect(),
        orphaned: known.saturating_sub(in_catalog),
    })
}

// ── Orchestrator ────────────────────────────────────────────────────

pub struct Orchestrator {
    catalog: JobCatalog,
    policy: BackoffPolicy,
    fetcher: Arc<dyn Fetcher>,
    store: CheckpointStore,
    layout: OutputLayout,
    resolution: Resolution,
    polite_delay: Duration,
}

impl Orchestrator {
    pub fn new(config: &HarvestConfig, fetcher: Arc<dyn Fetcher>) -> Result<Self, HarvestError> {
        let catalog = JobCatalog::from_config(config)?;
        let layout = OutputLayout::new(config.output_dir.clone(), config.resolution);

        if let Some((first, second, path)) = layout.find_collision(&catalog.enumerate()) {
            return Err(HarvestError::OutputCollision {
                first: first.clone(),
                second: second.clone(),
                path,
            });
        }

        Ok(Self {
            catalog,
            policy: config.backoff_policy(),
            fetcher,
            store: CheckpointStore::new(config.checkpoint_path()),
            layout,
            resolution: config.resolution,
            polite_delay: Duration::from_secs(config.polite_delay_secs),
        })
    }

    pub fn catalog(&self) -> &JobCatalog {
        &self.catalog
    }

    pub fn store(&self) -> &CheckpointStore {
        &self.store
    }

    pub fn layout(&self) -> &OutputLayout {
        &self.layout
    }

    /// Progress over the current catalog. Read-only: nothing is saved.
    pub fn status(&self) -> Result<StatusReport, HarvestError> {
        checkpoint_status(&self.catalog, &self.store)
    }

    /// Harvest every pending job once, in catalog order.
    ///
    /// Only checkpoint failures abort the run; a job that exhausts its
    /// attempts, fails fatally or cannot write its outputs is left pending.
    pub async fn run(&self, options: RunOptions) -> Result<RunSummary, HarvestError> {
        let jobs = self.catalog.enumerate();

        let mut checkpoint = self.store.load()?;
        let appended = checkpoint.reconcile(&jobs);
        self.store.save(&checkpoint)?;

        let progress = checkpoint.progress(&jobs);
        info!(
            total = progress.total,
            done = progress.done,
            new_jobs = appended,
            fetcher = self.fetcher.name(),
            checkpoint = %self.store.path().display(),
            "Starting harvest"
        );

        let pending: Vec<&Job> = jobs.iter().filter(|j| !checkpoint.is_done(j)).collect();
        let mut summary = RunSummary {
            total: progress.total,
            skipped_done: progress.done,
            ..RunSummary::default()
        };

        let batch = options.limit.unwrap_or(pending.len()).min(pending.len());
        if batch < pending.len() {
            info!(limit = batch, pending = pending.len(), "Run limited");
        }
        for job in &pending[..batch] {
            debug!(entity = %job.entity_key, query = %job.query_key, state = %JobState::Pending, "Queued");
        }

        for (index, job) in pending[..batch].iter().enumerate() {
            summary.attempted += 1;
            let outcome = self.run_job(job, &mut checkpoint).await?;

            match outcome {
                JobOutcome::Done { empty } => {
                    summary.completed += 1;
                    if empty {
                        summary.empty += 1;
                    }
                    let is_last = index + 1 == batch;
                    if !is_last && !self.polite_delay.is_zero() {
                        debug!(delay_secs = self.polite_delay.as_secs(), "Polite pause");
                        tokio::time::sleep(self.polite_delay).await;
                    }
                }
                JobOutcome::FailedThisRun => summary.failed.push((*job).clone()),
            }
        }

        summary.done_after = checkpoint.progress(&jobs).done;
        info!(
            attempted = summary.attempted,
            completed = summary.completed,
            empty = summary.empty,
            failed = summary.failed.len(),
            skipped_done = summary.skipped_done,
            done = summary.done_after,
            total = summary.total,
            "Harvest finished"
        );
        Ok(summary)
    }

    async fn run_job(&self, job: &Job, checkpoint: &mut Checkpoint) -> Result<JobOutcome, HarvestError> {
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            info!(
                entity = %job.entity_key,
                query = %job.query_key,
                attempt,
                state = %JobState::InProgress,
                "Fetching"
            );

            let err = match self.fetcher.fetch(job).await {
                Ok(series) => return self.complete(job, &series, checkpoint),
                Err(err) => err,
            };

            let kind = err.kind();
            let Some(retry_kind) = kind.retry_kind() else {
                error!(
                    entity = %job.entity_key,
                    query = %job.query_key,
                    attempt,
                    kind = %kind,
                    error = %err,
                    state = %JobState::FailedThisRun,
                    "Fetch failed, not retrying"
                );
                return Ok(JobOutcome::FailedThisRun);
            };

            if !self.policy.allows_retry(attempt) {
                warn!(
                    entity = %job.entity_key,
                    query = %job.query_key,
                    attempt,
                    kind = %kind,
                    error = %err,
                    state = %JobState::FailedThisRun,
                    "Attempts exhausted, leaving job pending"
                );
                return Ok(JobOutcome::FailedThisRun);
            }

            let hint = err.retry_after();
            if let Some(hint) = hint.filter(|h| *h > self.policy.retry_after_cap()) {
                warn!(
                    entity = %job.entity_key,
                    query = %job.query_key,
                    retry_after_secs = hint.as_secs_f64(),
                    cap_secs = self.policy.retry_after_cap().as_secs_f64(),
                    "Retry-After exceeds cap, clamping"
                );
            }
            let delay = self.policy.delay_with_hint(attempt, retry_kind, hint);
            warn!(
                entity = %job.entity_key,
                query = %job.query_key,
                attempt,
                kind = %kind,
                error = %err,
                delay_secs = delay.as_secs_f64(),
                state = %JobState::PendingRetry,
                "Fetch failed, backing off"
            );
            tokio::time::sleep(delay).await;
        }
    }

    /// Outputs first, then the checkpoint.
    fn complete(
        &self,
        job: &Job,
        series: &RawSeries,
        checkpoint: &mut Checkpoint,
    ) -> Result<JobOutcome, HarvestError> {
        let aggregated = aggregate(series, self.resolution);
        let paths = self.layout.paths_for(job);

        if let Err(e) = write_job_outputs(&paths, series, &aggregated) {
            error!(
                entity = %job.entity_key,
                query = %job.query_key,
                error = %e,
                state = %JobState::FailedThisRun,
                "Failed to write outputs"
            );
            return Ok(JobOutcome::FailedThisRun);
        }

        checkpoint.mark_done(job, &paths.raw, &paths.aggregated);
        self.store.save(checkpoint)?;

        if series.is_empty() {
            warn!(entity = %job.entity_key, query = %job.query_key, "Source returned no data points");
        }
        info!(
            entity = %job.entity_key,
            query = %job.query_key,
            points = series.len(),
            periods = aggregated.len(),
            raw = %paths.raw.display(),
            state = %JobState::Done,
            "Job done"
        );
        Ok(JobOutcome::Done { empty: series.is_empty() })
    }
}
