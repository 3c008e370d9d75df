pub mod aggregate;
pub mod backoff;
pub mod config;
pub mod error;
pub mod job;
pub mod series;

pub use aggregate::aggregate;
pub use backoff::{BackoffPolicy, RetryKind};
pub use config::{BackoffConfig, FetchConfig, HarvestConfig, PayloadFormat};
pub use error::*;
pub use job::{Job, JobCatalog};
pub use series::{AggregatedPoint, AggregatedSeries, RawPoint, RawSeries, Resolution};
