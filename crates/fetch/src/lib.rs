//! One external call per job, classified at the boundary.
//!
//! Callers only ever see a [`RawSeries`](harvest_core::RawSeries) or a
//! [`FetchError`] whose [`FailureKind`] drives retry decisions; raw error text
//! is never inspected past this crate.

pub mod error;
pub mod http;
pub mod payload;
pub mod traits;

pub use error::{FailureKind, FetchError};
pub use http::{HttpFetcher, HttpFetcherError};
pub use payload::{parse_payload, PayloadError};
pub use traits::Fetcher;
