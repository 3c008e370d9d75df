use std::env;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::backoff::BackoffPolicy;
use crate::error::ConfigError;
use crate::series::Resolution;

/// Config file picked up from the working directory when no path is given.
pub const DEFAULT_CONFIG_FILE: &str = "harvest.toml";

const DEFAULT_OUTPUT_DIR: &str = "gt_out";
const CHECKPOINT_FILE_NAME: &str = "checkpoint.csv";
const LOG_FILE_NAME: &str = "runner.log";

/// Upper bound for every backoff duration setting (one week).
pub const MAX_BACKOFF_SECS: u64 = 7 * 24 * 3600;

const DEFAULT_ENTITIES: &[&str] = &[
    "AL", "AK", "AZ", "AR", "CA", "CO", "CT", "DE", "FL", "GA", "HI", "ID", "IL", "IN", "IA",
    "KS", "KY", "LA", "ME", "MD", "MA", "MI", "MN", "MS", "MO", "MT", "NE", "NV", "NH", "NJ",
    "NM", "NY", "NC", "ND", "OH", "OK", "OR", "PA", "RI", "SC", "SD", "TN", "TX", "UT", "VT",
    "VA", "WA", "WV", "WI", "WY", "DC",
];

const DEFAULT_QUERIES: &[&str] = &[
    "syphilis",
    "gonorrhea",
    "chlamydia",
    "syphilis symptoms",
    "gonorrhea symptoms",
    "chlamydia symptoms",
    "STD test",
    "HIV testing",
    "STD clinic",
];

const DEFAULT_THROTTLE_MARKERS: &[&str] = &["Too Many Requests", "TooManyRequests", "rateLimitExceeded"];

/// Load .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

// ── Env helpers ───────────────────────────────────────────────

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.is_empty())
}

/// Read a profiled env var: tries {PROFILE}_{KEY} first, falls back to {KEY}.
fn profiled_env_opt(profile: &str, key: &str) -> Option<String> {
    if !profile.is_empty() {
        let prefixed = format!("{}_{}", profile, key);
        if let Some(v) = env_opt(&prefixed) {
            return Some(v);
        }
    }
    env_opt(key)
}

/// Parse a profiled env var, keeping `current` when unset or unparseable.
///
/// Unparseable values are recorded as `KEY=value` in `rejected`; config is
/// usually loaded before the subscriber exists, so they are logged later.
fn profiled_env_parse<T: FromStr>(
    profile: &str,
    key: &str,
    current: T,
    rejected: &mut Vec<String>,
) -> T {
    match profiled_env_opt(profile, key) {
        Some(raw) => match raw.trim().parse() {
            Ok(v) => v,
            Err(_) => {
                rejected.push(format!("{key}={raw}"));
                current
            }
        },
        None => current,
    }
}

fn profiled_env_list(profile: &str, key: &str) -> Option<Vec<String>> {
    profiled_env_opt(profile, key).map(|raw| {
        raw.split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect()
    })
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

// ── Top-level config ──────────────────────────────────────────

/// Everything the harvester needs, resolved once at startup.
///
/// Layers, lowest precedence first: built-in defaults, TOML file,
/// environment (`HARVEST_*`, optionally prefixed by `HARVEST_PROFILE`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HarvestConfig {
    /// Active profile name (empty = default).
    #[serde(skip)]
    pub profile: String,
    pub entities: Vec<String>,
    pub queries: Vec<String>,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub output_dir: PathBuf,
    /// Defaults to `<output_dir>/checkpoint.csv`.
    pub checkpoint_file: Option<PathBuf>,
    /// Defaults to `<output_dir>/runner.log`.
    pub log_file: Option<PathBuf>,
    /// Pause after every successful job.
    pub polite_delay_secs: u64,
    /// Target resolution of the aggregated output.
    pub resolution: Resolution,
    pub backoff: BackoffConfig,
    pub fetch: FetchConfig,
    /// Env overrides ignored by the last `apply_env`, as `KEY=value`.
    #[serde(skip)]
    rejected_env: Vec<String>,
}

impl Default for HarvestConfig {
    fn default() -> Self {
        Self {
            profile: String::new(),
            entities: strings(DEFAULT_ENTITIES),
            queries: strings(DEFAULT_QUERIES),
            start_date: NaiveDate::from_ymd_opt(2016, 1, 1).unwrap_or_default(),
            end_date: NaiveDate::from_ymd_opt(2025, 12, 31).unwrap_or_default(),
            output_dir: PathBuf::from(DEFAULT_OUTPUT_DIR),
            checkpoint_file: None,
            log_file: None,
            polite_delay_secs: 8,
            resolution: Resolution::Month,
            backoff: BackoffConfig::default(),
            fetch: FetchConfig::default(),
            rejected_env: Vec::new(),
        }
    }
}

impl HarvestConfig {
    /// Build config from the optional TOML file plus environment
    /// (call `load_dotenv()` first). Profile is read from `HARVEST_PROFILE`.
    ///
    /// With no explicit path, `harvest.toml` in the working directory is used
    /// when present.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let profile = env_opt("HARVEST_PROFILE").unwrap_or_default();
        Self::load_profiled(path, &profile)
    }

    pub fn load_profiled(path: Option<&Path>, profile: &str) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(p) => Self::from_toml_file(p)?,
            None if Path::new(DEFAULT_CONFIG_FILE).exists() => {
                Self::from_toml_file(Path::new(DEFAULT_CONFIG_FILE))?
            }
            None => Self::default(),
        };
        config.apply_env(profile);
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Overlay `HARVEST_*` environment variables onto this config.
    pub fn apply_env(&mut self, profile: &str) {
        let p = profile.to_uppercase();
        let p = p.as_str();
        self.profile = p.to_string();
        self.rejected_env.clear();
        let rejected = &mut self.rejected_env;

        if let Some(entities) = profiled_env_list(p, "HARVEST_ENTITIES") {
            self.entities = entities;
        }
        if let Some(queries) = profiled_env_list(p, "HARVEST_QUERIES") {
            self.queries = queries;
        }
        self.start_date = profiled_env_parse(p, "HARVEST_START_DATE", self.start_date, rejected);
        self.end_date = profiled_env_parse(p, "HARVEST_END_DATE", self.end_date, rejected);
        if let Some(dir) = profiled_env_opt(p, "HARVEST_OUTPUT_DIR") {
            self.output_dir = PathBuf::from(dir);
        }
        if let Some(file) = profiled_env_opt(p, "HARVEST_CHECKPOINT_FILE") {
            self.checkpoint_file = Some(PathBuf::from(file));
        }
        if let Some(file) = profiled_env_opt(p, "HARVEST_LOG_FILE") {
            self.log_file = Some(PathBuf::from(file));
        }
        self.polite_delay_secs =
            profiled_env_parse(p, "HARVEST_POLITE_DELAY_SECS", self.polite_delay_secs, rejected);
        self.resolution = profiled_env_parse(p, "HARVEST_RESOLUTION", self.resolution, rejected);

        self.backoff.apply_env(p, rejected);
        self.fetch.apply_env(p, rejected);
    }

    /// Env overrides that could not be parsed and were ignored.
    pub fn rejected_env_overrides(&self) -> &[String] {
        &self.rejected_env
    }

    /// Warn about ignored env overrides. Call once tracing is installed.
    pub fn log_rejected_env(&self) {
        for entry in &self.rejected_env {
            tracing::warn!(entry = %entry, "Ignoring unparseable env override");
        }
    }

    /// Reject values the harvester cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.start_date > self.end_date {
            return Err(ConfigError::Invalid(format!(
                "start_date {} is after end_date {}",
                self.start_date, self.end_date
            )));
        }
        self.backoff.validate()?;
        if self.fetch.timeout_secs == 0 {
            return Err(ConfigError::Invalid("fetch.timeout_secs must be positive".into()));
        }
        Ok(())
    }

    pub fn checkpoint_path(&self) -> PathBuf {
        self.checkpoint_file
            .clone()
            .unwrap_or_else(|| self.output_dir.join(CHECKPOINT_FILE_NAME))
    }

    pub fn log_path(&self) -> PathBuf {
        self.log_file
            .clone()
            .unwrap_or_else(|| self.output_dir.join(LOG_FILE_NAME))
    }

    pub fn backoff_policy(&self) -> BackoffPolicy {
        BackoffPolicy::from_config(&self.backoff)
    }

    pub fn profile_label(&self) -> &str {
        if self.profile.is_empty() { "default" } else { &self.profile }
    }

    /// Print a summary for startup logs.
    pub fn log_summary(&self) {
        self.log_rejected_env();
        tracing::info!("Config loaded (profile: {}):", self.profile_label());
        tracing::info!(
            "  catalog:     entities={}, queries={}, range={}..{}",
            self.entities.len(),
            self.queries.len(),
            self.start_date,
            self.end_date
        );
        tracing::info!(
            "  output:      dir={}, checkpoint={}, resolution={}",
            self.output_dir.display(),
            self.checkpoint_path().display(),
            self.resolution
        );
        tracing::info!(
            "  backoff:     base={}s, factor={}, cap={}s, cooldown={}s, attempts={}",
            self.backoff.base_delay_secs,
            self.backoff.growth_factor,
            self.backoff.max_delay_secs,
            self.backoff.rate_limit_cooldown_secs,
            self.backoff.max_attempts
        );
        tracing::info!(
            "  fetch:       format={:?}, timeout={}s, polite_delay={}s",
            self.fetch.format,
            self.fetch.timeout_secs,
            self.polite_delay_secs
        );
    }
}

// ── Backoff ───────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffConfig {
    pub base_delay_secs: u64,
    pub growth_factor: f64,
    /// Ceiling on the exponential component.
    pub max_delay_secs: u64,
    pub rate_limit_cooldown_secs: u64,
    pub max_attempts: u32,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base_delay_secs: 8,
            growth_factor: 2.0,
            max_delay_secs: 900,
            rate_limit_cooldown_secs: 60,
            max_attempts: 5,
        }
    }
}

impl BackoffConfig {
    fn apply_env(&mut self, p: &str, rejected: &mut Vec<String>) {
        self.base_delay_secs =
            profiled_env_parse(p, "HARVEST_BASE_DELAY_SECS", self.base_delay_secs, rejected);
        self.growth_factor =
            profiled_env_parse(p, "HARVEST_GROWTH_FACTOR", self.growth_factor, rejected);
        self.max_delay_secs =
            profiled_env_parse(p, "HARVEST_MAX_DELAY_SECS", self.max_delay_secs, rejected);
        self.rate_limit_cooldown_secs = profiled_env_parse(
            p,
            "HARVEST_RATE_LIMIT_COOLDOWN_SECS",
            self.rate_limit_cooldown_secs,
            rejected,
        );
        self.max_attempts =
            profiled_env_parse(p, "HARVEST_MAX_ATTEMPTS", self.max_attempts, rejected);
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.base_delay_secs == 0 {
            return Err(ConfigError::Invalid("backoff.base_delay_secs must be positive".into()));
        }
        if !self.growth_factor.is_finite() || self.growth_factor < 1.0 {
            return Err(ConfigError::Invalid(format!(
                "backoff.growth_factor must be a finite number >= 1, got {}",
                self.growth_factor
            )));
        }
        if self.max_attempts == 0 {
            return Err(ConfigError::Invalid("backoff.max_attempts must be at least 1".into()));
        }
        for (name, value) in [
            ("base_delay_secs", self.base_delay_secs),
            ("max_delay_secs", self.max_delay_secs),
            ("rate_limit_cooldown_secs", self.rate_limit_cooldown_secs),
        ] {
            if value > MAX_BACKOFF_SECS {
                return Err(ConfigError::Invalid(format!(
                    "backoff.{name} must be at most {MAX_BACKOFF_SECS}, got {value}"
                )));
            }
        }
        Ok(())
    }
}

// ── Fetch ─────────────────────────────────────────────────────

/// Wire shape of the upstream payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayloadFormat {
    /// Trends widget JSON (`default.timelineData[]`).
    TrendsTimeline,
    /// `date,value` table.
    Csv,
}

impl FromStr for PayloadFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "trends_timeline" | "trends" | "json" => Ok(Self::TrendsTimeline),
            "csv" => Ok(Self::Csv),
            other => Err(format!("unknown payload format '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    /// Request URL with `{entity}`, `{query}`, `{start}` and `{end}` placeholders.
    pub url_template: String,
    pub format: PayloadFormat,
    pub timeout_secs: u64,
    pub user_agent: String,
    /// Body substrings that mark a non-success response as throttling.
    pub throttle_markers: Vec<String>,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            url_template: String::new(),
            format: PayloadFormat::TrendsTimeline,
            timeout_secs: 30,
            user_agent: format!("harvester/{}", env!("CARGO_PKG_VERSION")),
            throttle_markers: strings(DEFAULT_THROTTLE_MARKERS),
        }
    }
}

impl FetchConfig {
    fn apply_env(&mut self, p: &str, rejected: &mut Vec<String>) {
        if let Some(template) = profiled_env_opt(p, "HARVEST_URL_TEMPLATE") {
            self.url_template = template;
        }
        self.format = profiled_env_parse(p, "HARVEST_PAYLOAD_FORMAT", self.format, rejected);
        self.timeout_secs =
            profiled_env_parse(p, "HARVEST_TIMEOUT_SECS", self.timeout_secs, rejected);
        if let Some(agent) = profiled_env_opt(p, "HARVEST_USER_AGENT") {
            self.user_agent = agent;
        }
        if let Some(markers) = profiled_env_list(p, "HARVEST_THROTTLE_MARKERS") {
            self.throttle_markers = markers;
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────
