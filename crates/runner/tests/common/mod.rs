//! Shared fixtures for orchestrator integration tests.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::NaiveDate;
use tokio::time::Instant;

use harvest_core::{HarvestConfig, Job, RawPoint, RawSeries};
use harvest_fetch::{FetchError, Fetcher};

/// Fetcher that replays per-job scripts and records every call.
///
/// A job with no (remaining) script gets [`sample_series`].
#[derive(Default)]
pub struct ScriptedFetcher {
    scripts: Mutex<HashMap<Job, VecDeque<Result<RawSeries, FetchError>>>>,
    calls: Mutex<Vec<(Job, Instant)>>,
    panic_on: Option<Job>,
}

impl ScriptedFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate a process crash when `job` is fetched.
    pub fn panicking_on(job: Job) -> Self {
        Self {
            panic_on: Some(job),
            ..Self::default()
        }
    }

    pub fn script(self, job: Job, responses: Vec<Result<RawSeries, FetchError>>) -> Self {
        self.scripts.lock().unwrap().insert(job, responses.into());
        self
    }

    pub fn calls(&self) -> Vec<Job> {
        self.calls.lock().unwrap().iter().map(|(job, _)| job.clone()).collect()
    }

    pub fn calls_for(&self, job: &Job) -> usize {
        self.calls.lock().unwrap().iter().filter(|(j, _)| j == job).count()
    }

    /// Instants at which `job` was fetched.
    pub fn call_times(&self, job: &Job) -> Vec<Instant> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(j, _)| j == job)
            .map(|(_, at)| *at)
            .collect()
    }
}

#[async_trait]
impl Fetcher for ScriptedFetcher {
    async fn fetch(&self, job: &Job) -> Result<RawSeries, FetchError> {
        self.calls.lock().unwrap().push((job.clone(), Instant::now()));

        if self.panic_on.as_ref() == Some(job) {
            panic!("simulated crash while fetching {job}");
        }

        let scripted = self
            .scripts
            .lock()
            .unwrap()
            .get_mut(job)
            .and_then(VecDeque::pop_front);
        scripted.unwrap_or_else(|| Ok(sample_series()))
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

pub fn d(y: i32, m: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, day).unwrap()
}

pub fn sample_series() -> RawSeries {
    RawSeries::new(vec![
        RawPoint::new(d(2023, 1, 7), Some(10.0)),
        RawPoint::new(d(2023, 1, 14), Some(20.0)),
        RawPoint::new(d(2023, 1, 21), None),
        RawPoint::new(d(2023, 2, 4), Some(30.0)),
    ])
    .unwrap()
}

pub fn transient() -> Result<RawSeries, FetchError> {
    Err(FetchError::Transient("HTTP 503 Service Unavailable".into()))
}

pub fn rate_limited(retry_after_secs: Option<u64>) -> Result<RawSeries, FetchError> {
    Err(FetchError::RateLimited {
        message: "HTTP 429 Too Many Requests".into(),
        retry_after: retry_after_secs.map(std::time::Duration::from_secs),
    })
}

pub fn fatal() -> Result<RawSeries, FetchError> {
    Err(FetchError::Fatal("HTTP 401 Unauthorized".into()))
}

/// 2 entities x 2 queries, outputs and checkpoint under `dir`.
///
/// Catalog order: CA-flu, CA-cold, NY-flu, NY-cold.
pub fn config_in(dir: &Path) -> HarvestConfig {
    let mut config = HarvestConfig::default();
    config.entities = vec!["CA".into(), "NY".into()];
    config.queries = vec!["flu".into(), "cold".into()];
    config.output_dir = dir.join("out");
    config
}

pub fn job(entity: &str, query: &str) -> Job {
    Job::new(entity, query)
}

pub fn all_jobs() -> Vec<Job> {
    vec![job("CA", "flu"), job("CA", "cold"), job("NY", "flu"), job("NY", "cold")]
}
