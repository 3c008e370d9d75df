use std::path::PathBuf;

use thiserror::Error;

use harvest_checkpoint::CheckpointError;
use harvest_core::{CatalogError, Job};

/// Failures that stop a whole run. Job-level failures never surface here.
#[derive(Debug, Error)]
pub enum HarvestError {
    #[error("invalid job catalog: {0}")]
    Catalog(#[from] CatalogError),

    #[error("checkpoint error: {0}")]
    Checkpoint(#[from] CheckpointError),

    #[error("jobs {first} and {second} would both write {path}")]
    OutputCollision {
        first: Job,
        second: Job,
        path: PathBuf,
    },
}
