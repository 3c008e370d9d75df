//! Per-job output files.
//!
//! Every job owns two CSV files whose paths derive from the job key alone:
//!
//! ```text
//! <output_dir>/<query>/<entity>/<query>__<entity>__raw.csv
//! <output_dir>/<query>/<entity>/<query>__<entity>__<resolution>.csv
//! ```
//!
//! Both are written atomically and confirmed on disk before the job may be
//! marked done.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use thiserror::Error;

use harvest_checkpoint::write_atomic;
use harvest_core::{AggregatedSeries, Job, RawSeries, Resolution};

const RAW_SUFFIX: &str = "raw";

#[derive(Debug, Error)]
pub enum OutputError {
    #[error("failed to write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("{0} is missing after write")]
    Missing(PathBuf),
}

/// Lowercase, collapse runs outside `[a-z0-9]` to `_`, trim `_`.
pub fn slug(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut pending_sep = false;
    for c in value.chars().flat_map(char::to_lowercase) {
        if c.is_ascii_lowercase() || c.is_ascii_digit() {
            if pending_sep && !out.is_empty() {
                out.push('_');
            }
            pending_sep = false;
            out.push(c);
        } else {
            pending_sep = true;
        }
    }
    out
}

/// The two files one job produces.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputPaths {
    pub raw: PathBuf,
    pub aggregated: PathBuf,
}

/// Maps jobs to their output files under one directory.
#[derive(Debug, Clone)]
pub struct OutputLayout {
    root: PathBuf,
    resolution: Resolution,
}

impl OutputLayout {
    pub fn new(root: impl Into<PathBuf>, resolution: Resolution) -> Self {
        Self {
            root: root.into(),
            resolution,
        }
    }

    pub fn paths_for(&self, job: &Job) -> OutputPaths {
        let query = slug(&job.query_key);
        let entity = slug(&job.entity_key);
        let dir = self.root.join(&query).join(&entity);
        let stem = format!("{query}__{entity}");
        OutputPaths {
            raw: dir.join(format!("{stem}__{RAW_SUFFIX}.csv")),
            aggregated: dir.join(format!("{stem}__{}.csv", self.resolution.label())),
        }
    }

    /// First pair of jobs whose keys slug to the same files, if any.
    pub fn find_collision<'a>(&self, jobs: &'a [Job]) -> Option<(&'a Job, &'a Job, PathBuf)> {
        let mut seen: HashMap<PathBuf, &Job> = HashMap::with_capacity(jobs.len());
        for job in jobs {
            let raw = self.paths_for(job).raw;
            if let Some(first) = seen.get(&raw) {
                return Some((first, job, raw));
            }
            seen.insert(raw, job);
        }
        None
    }
}

/// Write both files for a job, then check they exist.
pub fn write_job_outputs(
    paths: &OutputPaths,
    raw: &RawSeries,
    aggregated: &AggregatedSeries,
) -> Result<(), OutputError> {
    write_csv(&paths.raw, render_raw(raw)?)?;
    write_csv(&paths.aggregated, render_aggregated(aggregated)?)?;

    for path in [&paths.raw, &paths.aggregated] {
        if !path.is_file() {
            return Err(OutputError::Missing(path.clone()));
        }
    }
    Ok(())
}

fn render_raw(series: &RawSeries) -> Result<Vec<u8>, OutputError> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(["date", "value"])?;
    for point in series.points() {
        writer.write_record([point.date.to_string(), value_field(point.value)])?;
    }
    finish(writer)
}

fn render_aggregated(series: &AggregatedSeries) -> Result<Vec<u8>, OutputError> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(["period_start", "value"])?;
    for point in series.points() {
        writer.write_record([point.period_start.to_string(), value_field(point.value)])?;
    }
    finish(writer)
}

fn finish(writer: csv::Writer<Vec<u8>>) -> Result<Vec<u8>, OutputError> {
    writer
        .into_inner()
        .map_err(|e| OutputError::Csv(csv::Error::from(e.into_error())))
}

fn write_csv(path: &Path, bytes: Vec<u8>) -> Result<(), OutputError> {
    write_atomic(path, &bytes).map_err(|source| OutputError::Io {
        path: path.to_path_buf(),
        source,
    })
}

fn value_field(value: Option<f64>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}
