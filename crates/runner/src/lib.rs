//! Drives the harvest: checkpointed, sequential, one job at a time.

pub mod error;
pub mod logging;
pub mod orchestrator;
pub mod output;

pub use error::HarvestError;
pub use logging::{init_tracing, LoggingError};
pub use orchestrator::{checkpoint_status, JobState, Orchestrator, RunOptions, RunSummary, StatusReport};
pub use output::{slug, write_job_outputs, OutputError, OutputLayout, OutputPaths};
