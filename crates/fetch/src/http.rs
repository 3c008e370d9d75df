//! HTTP fetcher for templated per-job endpoints.
//!
//! Builds one GET request per job from a URL template, classifies the outcome
//! into a [`FailureKind`](crate::FailureKind) and parses successful bodies with
//! the configured [`PayloadFormat`].

use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::{Client, StatusCode};
use thiserror::Error;
use tracing::debug;

use harvest_core::{HarvestConfig, Job, PayloadFormat, RawSeries};

use crate::error::FetchError;
use crate::payload::parse_payload;
use crate::traits::Fetcher;

/// Status codes that signal a request retries cannot fix.
const FATAL_STATUSES: [StatusCode; 6] = [
    StatusCode::BAD_REQUEST,
    StatusCode::UNAUTHORIZED,
    StatusCode::FORBIDDEN,
    StatusCode::NOT_FOUND,
    StatusCode::METHOD_NOT_ALLOWED,
    StatusCode::UNPROCESSABLE_ENTITY,
];

/// Longest body excerpt carried into error messages.
const BODY_EXCERPT_CHARS: usize = 200;

#[derive(Debug, Error)]
pub enum HttpFetcherError {
    #[error("fetch.url_template is not configured")]
    MissingUrlTemplate,

    #[error("failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),
}

/// Fetches one series per job over HTTP.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
    url_template: String,
    format: PayloadFormat,
    start_date: NaiveDate,
    end_date: NaiveDate,
    throttle_markers: Vec<String>,
}

impl HttpFetcher {
    pub fn from_config(config: &HarvestConfig) -> Result<Self, HttpFetcherError> {
        if config.fetch.url_template.trim().is_empty() {
            return Err(HttpFetcherError::MissingUrlTemplate);
        }
        let client = Client::builder()
            .timeout(Duration::from_secs(config.fetch.timeout_secs))
            .user_agent(config.fetch.user_agent.clone())
            .build()?;

        Ok(Self {
            client,
            url_template: config.fetch.url_template.clone(),
            format: config.fetch.format,
            start_date: config.start_date,
            end_date: config.end_date,
            throttle_markers: config.fetch.throttle_markers.clone(),
        })
    }

    /// Expand `{entity}`, `{query}`, `{start}` and `{end}` (form-encoded).
    pub fn request_url(&self, job: &Job) -> Result<url::Url, FetchError> {
        let expanded = self
            .url_template
            .replace("{entity}", &encode(&job.entity_key))
            .replace("{query}", &encode(&job.query_key))
            .replace("{start}", &self.start_date.to_string())
            .replace("{end}", &self.end_date.to_string());
        url::Url::parse(&expanded)
            .map_err(|e| FetchError::Fatal(format!("invalid request URL '{expanded}': {e}")))
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, job: &Job) -> Result<RawSeries, FetchError> {
        let url = self.request_url(job)?;
        debug!(entity = %job.entity_key, query = %job.query_key, url = %url, "Sending fetch request");

        let response = self.client.get(url).send().await?;
        let status = response.status();
        let retry_after = parse_retry_after(response.headers());

        if !status.is_success() {
            // the status decides; a body that fails to arrive only loses markers
            let body = response.text().await.unwrap_or_default();
            return Err(classify_failure(status, retry_after, &body, &self.throttle_markers));
        }
        let body = response.text().await?;

        let series = parse_payload(self.format, &body)
            .map_err(|e| FetchError::Transient(format!("malformed payload: {e}")))?;
        debug!(entity = %job.entity_key, query = %job.query_key, points = series.len(), "Fetched series");
        Ok(series)
    }

    fn name(&self) -> &str {
        "http"
    }
}

/// Map a non-success response to a failure kind.
///
/// 429 or a body containing a throttle marker is rate limiting; request-shape
/// and auth errors are fatal; everything else is transient.
pub fn classify_failure(
    status: StatusCode,
    retry_after: Option<Duration>,
    body: &str,
    throttle_markers: &[String],
) -> FetchError {
    let message = format!("HTTP {status}: {}", excerpt(body));

    let throttled = status == StatusCode::TOO_MANY_REQUESTS
        || throttle_markers
            .iter()
            .any(|marker| !marker.is_empty() && body.contains(marker.as_str()));
    if throttled {
        return FetchError::RateLimited { message, retry_after };
    }

    if FATAL_STATUSES.contains(&status) {
        return FetchError::Fatal(message);
    }

    FetchError::Transient(message)
}

/// Seconds form of `Retry-After`; the HTTP-date form is ignored.
fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

fn encode(value: &str) -> String {
    url::form_urlencoded::byte_serialize(value.as_bytes()).collect()
}

fn excerpt(body: &str) -> String {
    let trimmed = body.trim();
    if trimmed.chars().count() <= BODY_EXCERPT_CHARS {
        trimmed.to_string()
    } else {
        let mut cut: String = trimmed.chars().take(BODY_EXCERPT_CHARS).collect();
        cut.push('…');
        cut
    }
}
