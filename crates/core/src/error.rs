use std::path::PathBuf;

use chrono::NaiveDate;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("entity #{0} is blank")]
    BlankEntity(usize),

    #[error("query #{0} is blank")]
    BlankQuery(usize),

    #[error("entity '{0}' is listed more than once")]
    DuplicateEntity(String),

    #[error("query '{0}' is listed more than once")]
    DuplicateQuery(String),
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum SeriesError {
    #[error("timestamps must be strictly increasing: {next} follows {previous}")]
    NotIncreasing { previous: NaiveDate, next: NaiveDate },
}
