use async_trait::async_trait;

use harvest_core::{Job, RawSeries};

use crate::error::FetchError;

/// Performs one external call for one job.
///
/// Implementations hold no per-job state between calls. A well-formed
/// response with zero data points is `Ok` with an empty series, not an error.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, job: &Job) -> Result<RawSeries, FetchError>;

    /// Human-readable name for logs (e.g., "http").
    fn name(&self) -> &str {
        "fetcher"
    }
}
