use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use serde::Serialize;

use harvest_core::Job;

/// Completion status and output locations of one job.
///
/// `done == true` implies both output paths are set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CheckpointRecord {
    pub entity_key: String,
    pub query_key: String,
    pub done: bool,
    pub raw_output_path: Option<PathBuf>,
    pub aggregated_output_path: Option<PathBuf>,
}

impl CheckpointRecord {
    pub fn pending(job: &Job) -> Self {
        Self {
            entity_key: job.entity_key.clone(),
            query_key: job.query_key.clone(),
            done: false,
            raw_output_path: None,
            aggregated_output_path: None,
        }
    }

    pub fn job(&self) -> Job {
        Job::new(&self.entity_key, &self.query_key)
    }
}

/// Done/total counts over a checkpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Progress {
    pub done: usize,
    pub total: usize,
}

impl Progress {
    pub fn fraction(&self) -> f64 {
        if self.total == 0 {
            1.0
        } else {
            self.done as f64 / self.total as f64
        }
    }
}

/// In-memory view of the checkpoint file: one record per job, in file order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Checkpoint {
    records: IndexMap<Job, CheckpointRecord>,
}

impl Checkpoint {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a record unless its job is already present. Returns whether it was inserted.
    pub fn insert(&mut self, record: CheckpointRecord) -> bool {
        let job = record.job();
        if self.records.contains_key(&job) {
            return false;
        }
        self.records.insert(job, record);
        true
    }

    /// Append pending records for catalog jobs the checkpoint has never seen.
    ///
    /// Existing records, including ones for jobs no longer in the catalog, are
    /// left exactly as they are. Returns the number of records appended.
    pub fn reconcile(&mut self, jobs: &[Job]) -> usize {
        let before = self.records.len();
        for job in jobs {
            if !self.records.contains_key(job) {
                self.records.insert(job.clone(), CheckpointRecord::pending(job));
            }
        }
        self.records.len() - before
    }

    /// Flip a job to done with its two output locations.
    pub fn mark_done(&mut self, job: &Job, raw_output: &Path, aggregated_output: &Path) {
        let record = self
            .records
            .entry(job.clone())
            .or_insert_with(|| CheckpointRecord::pending(job));
        record.done = true;
        record.raw_output_path = Some(raw_output.to_path_buf());
        record.aggregated_output_path = Some(aggregated_output.to_path_buf());
    }

    pub fn get(&self, job: &Job) -> Option<&CheckpointRecord> {
        self.records.get(job)
    }

    pub fn is_done(&self, job: &Job) -> bool {
        self.records.get(job).is_some_and(|r| r.done)
    }

    pub fn records(&self) -> impl Iterator<Item = &CheckpointRecord> {
        self.records.values()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Progress over the given catalog jobs (records outside the catalog are not counted).
    pub fn progress(&self, jobs: &[Job]) -> Progress {
        Progress {
            done: jobs.iter().filter(|job| self.is_done(job)).count(),
            total: jobs.len(),
        }
    }
}
