//! Fetch failure taxonomy.

use std::fmt;
use std::time::Duration;

use harvest_core::RetryKind;
use serde::Serialize;
use thiserror::Error;

/// How a failed fetch should be treated by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum FailureKind {
    /// Retry with exponential backoff.
    Transient,
    /// Retry after the mandatory cooldown.
    RateLimited,
    /// Retrying cannot help; abandon the job for this run.
    Fatal,
}

impl FailureKind {
    /// The backoff branch for retryable kinds, `None` for fatal ones.
    pub fn retry_kind(self) -> Option<RetryKind> {
        match self {
            FailureKind::Transient => Some(RetryKind::Transient),
            FailureKind::RateLimited => Some(RetryKind::RateLimited),
            FailureKind::Fatal => None,
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureKind::Transient => write!(f, "transient"),
            FailureKind::RateLimited => write!(f, "rate_limited"),
            FailureKind::Fatal => write!(f, "fatal"),
        }
    }
}

/// Errors a [`Fetcher`](crate::Fetcher) may return.
#[derive(Debug, Clone, Error)]
pub enum FetchError {
    #[error("transient failure: {0}")]
    Transient(String),

    #[error("rate limited: {message}")]
    RateLimited {
        message: String,
        /// Upstream `Retry-After` hint, when one was sent.
        retry_after: Option<Duration>,
    },

    #[error("fatal failure: {0}")]
    Fatal(String),
}

impl FetchError {
    pub fn kind(&self) -> FailureKind {
        match self {
            FetchError::Transient(_) => FailureKind::Transient,
            FetchError::RateLimited { .. } => FailureKind::RateLimited,
            FetchError::Fatal(_) => FailureKind::Fatal,
        }
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            FetchError::RateLimited { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        // A request that cannot even be built will not build on retry either.
        if err.is_builder() {
            FetchError::Fatal(err.to_string())
        } else {
            FetchError::Transient(err.to_string())
        }
    }
}
