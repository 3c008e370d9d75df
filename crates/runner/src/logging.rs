//! Tracing setup: console output plus an optional append-only run log.

use std::fs::{self, File};
use std::path::Path;
use std::sync::Mutex;

use thiserror::Error;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("failed to open run log {path}: {source}")]
    RunLog {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to install tracing subscriber: {0}")]
    Init(#[from] tracing_subscriber::util::TryInitError),
}

/// Filter from `directives`, else `RUST_LOG`, else `info`.
pub fn env_filter(directives: Option<&str>) -> EnvFilter {
    match directives {
        Some(d) => EnvFilter::new(d),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    }
}

/// Install the global subscriber.
///
/// With `run_log`, every event is also appended, without ANSI colours, to that
/// file. The file is only ever appended to and never read back.
pub fn init_tracing(directives: Option<&str>, run_log: Option<&Path>) -> Result<(), LoggingError> {
    let file_layer = match run_log {
        Some(path) => Some(
            fmt::layer()
                .with_ansi(false)
                .with_writer(Mutex::new(open_run_log(path)?)),
        ),
        None => None,
    };

    tracing_subscriber::registry()
        .with(env_filter(directives))
        .with(fmt::layer())
        .with(file_layer)
        .try_init()?;
    Ok(())
}

fn open_run_log(path: &Path) -> Result<File, LoggingError> {
    let err = |source| LoggingError::RunLog {
        path: path.display().to_string(),
        source,
    };
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(err)?;
    }
    File::options().create(true).append(true).open(path).map_err(err)
}
