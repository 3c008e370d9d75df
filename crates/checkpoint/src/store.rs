use std::collections::HashMap;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, warn};

use crate::record::{Checkpoint, CheckpointRecord};

const COL_ENTITY: &str = "entity_key";
const COL_QUERY: &str = "query_key";
const COL_DONE: &str = "done";
const COL_RAW: &str = "raw_output_path";
const COL_AGGREGATED: &str = "aggregated_output_path";

const COLUMNS: [&str; 5] = [COL_ENTITY, COL_QUERY, COL_DONE, COL_RAW, COL_AGGREGATED];

#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    /// The file exists but not even its header can be used.
    #[error("checkpoint {path} is corrupt: {reason}")]
    CorruptState { path: PathBuf, reason: String },
}

/// CSV-backed checkpoint persistence.
///
/// One row per job:
/// ```text
/// entity_key,query_key,done,raw_output_path,aggregated_output_path
/// CA,flu,1,gt_out/flu/ca/flu__ca__raw.csv,gt_out/flu/ca/flu__ca__month.csv
/// CA,cold,0,,
/// ```
///
/// Saves go to `<file>.tmp` first and are renamed over the previous file, so a
/// crash mid-write leaves the last complete checkpoint in place.
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    path: PathBuf,
}

impl CheckpointStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    // ── Load ────────────────────────────────────────────────────

    /// Load every well-formed record.
    ///
    /// A missing file is an empty checkpoint. A file whose header is unreadable
    /// or lacks a required column is [`CheckpointError::CorruptState`].
    /// Individual malformed rows are dropped with a warning, which leaves their
    /// job pending.
    pub fn load(&self) -> Result<Checkpoint, CheckpointError> {
        if !self.path.exists() {
            debug!(path = %self.path.display(), "no checkpoint yet, all jobs pending");
            return Ok(Checkpoint::new());
        }

        let bytes = fs::read(&self.path)?;
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_reader(bytes.as_slice());

        let headers = reader
            .headers()
            .map_err(|e| self.corrupt(format!("unreadable header: {e}")))?
            .clone();
        let columns = ColumnIndex::resolve(&headers).map_err(|reason| self.corrupt(reason))?;

        let mut checkpoint = Checkpoint::new();
        let mut dropped = 0usize;

        for (index, row) in reader.records().enumerate() {
            // header is line 1
            let line = index + 2;
            let parsed = row
                .map_err(|e| e.to_string())
                .and_then(|row| columns.parse(&row, headers.len()));

            match parsed {
                Ok(record) => {
                    let job = record.job();
                    if !checkpoint.insert(record) {
                        warn!(path = %self.path.display(), line, job = %job, "duplicate checkpoint row dropped");
                        dropped += 1;
                    }
                }
                Err(reason) => {
                    warn!(path = %self.path.display(), line, reason = %reason, "malformed checkpoint row dropped");
                    dropped += 1;
                }
            }
        }

        debug!(
            path = %self.path.display(),
            records = checkpoint.len(),
            dropped,
            "checkpoint loaded"
        );
        Ok(checkpoint)
    }

    // ── Save ────────────────────────────────────────────────────

    /// Rewrite the whole store, atomically replacing the previous file.
    pub fn save(&self, checkpoint: &Checkpoint) -> Result<(), CheckpointError> {
        let mut writer = csv::Writer::from_writer(Vec::new());
        writer.write_record(COLUMNS)?;
        for record in checkpoint.records() {
            let raw = path_field(record.raw_output_path.as_deref());
            let aggregated = path_field(record.aggregated_output_path.as_deref());
            writer.write_record([
                record.entity_key.as_str(),
                record.query_key.as_str(),
                if record.done { "1" } else { "0" },
                raw.as_str(),
                aggregated.as_str(),
            ])?;
        }
        let bytes = writer
            .into_inner()
            .map_err(|e| CheckpointError::Io(e.into_error()))?;

        write_atomic(&self.path, &bytes)?;
        debug!(path = %self.path.display(), records = checkpoint.len(), "checkpoint saved");
        Ok(())
    }

    fn corrupt(&self, reason: String) -> CheckpointError {
        CheckpointError::CorruptState {
            path: self.path.clone(),
            reason,
        }
    }
}

/// Write `bytes` to a sibling temp file, fsync it, then rename over `path`.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let parent = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent)?;
    let mut tmp_name = path.file_name().unwrap_or_default().to_os_string();
    tmp_name.push(".tmp");
    let tmp = path.with_file_name(tmp_name);

    let mut file = File::create(&tmp)?;
    file.write_all(bytes)?;
    file.sync_all()?;
    drop(file);

    fs::rename(&tmp, path)?;
    sync_dir(parent)
}

/// Persist the directory entry created by a rename.
#[cfg(unix)]
fn sync_dir(dir: &Path) -> std::io::Result<()> {
    File::open(dir)?.sync_all()
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) -> std::io::Result<()> {
    Ok(())
}

fn path_field(path: Option<&Path>) -> String {
    path.map(|p| p.to_string_lossy().into_owned()).unwrap_or_default()
}

/// Positions of the required columns within the header row.
struct ColumnIndex {
    entity: usize,
    query: usize,
    done: usize,
    raw: usize,
    aggregated: usize,
}

impl ColumnIndex {
    fn resolve(headers: &csv::StringRecord) -> Result<Self, String> {
        let positions: HashMap<&str, usize> = headers
            .iter()
            .enumerate()
            .map(|(i, name)| (name.trim(), i))
            .collect();
        let find = |name: &str| {
            positions
                .get(name)
                .copied()
                .ok_or_else(|| format!("missing column '{name}'"))
        };
        Ok(Self {
            entity: find(COL_ENTITY)?,
            query: find(COL_QUERY)?,
            done: find(COL_DONE)?,
            raw: find(COL_RAW)?,
            aggregated: find(COL_AGGREGATED)?,
        })
    }

    fn parse(&self, row: &csv::StringRecord, width: usize) -> Result<CheckpointRecord, String> {
        if row.len() != width {
            return Err(format!("expected {width} fields, found {}", row.len()));
        }
        let field = |i: usize| row.get(i).unwrap_or_default().trim();

        let entity_key = field(self.entity);
        let query_key = field(self.query);
        if entity_key.is_empty() || query_key.is_empty() {
            return Err("blank entity or query".into());
        }

        let done = match field(self.done).to_ascii_lowercase().as_str() {
            "1" | "true" => true,
            "0" | "false" | "" => false,
            other => return Err(format!("unreadable done flag '{other}'")),
        };

        let raw_output_path = non_empty_path(field(self.raw));
        let aggregated_output_path = non_empty_path(field(self.aggregated));
        if done && (raw_output_path.is_none() || aggregated_output_path.is_none()) {
            return Err("marked done without both output paths".into());
        }

        Ok(CheckpointRecord {
            entity_key: entity_key.to_string(),
            query_key: query_key.to_string(),
            done,
            raw_output_path,
            aggregated_output_path,
        })
    }
}

fn non_empty_path(field: &str) -> Option<PathBuf> {
    (!field.is_empty()).then(|| PathBuf::from(field))
}
