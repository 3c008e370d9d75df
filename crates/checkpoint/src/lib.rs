//! Persistent per-job progress for the harvester.
//!
//! The checkpoint file is the single source of truth for "what remains to
//! do". It is rewritten in full (temp file + rename) after every job
//! transition.

pub mod record;
pub mod store;

pub use record::{Checkpoint, CheckpointRecord, Progress};
pub use store::{write_atomic, CheckpointError, CheckpointStore};
