use std::io;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Why a collector could not produce a reading this cycle.
///
/// Every variant is non-fatal: the cache keeps the last good value for the
/// kind and the scheduler polls again on the normal cadence.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum CollectorError {
    #[error("source unavailable: {0}")]
    SourceUnavailable(String),

    #[error("timed out after {0}ms")]
    Timeout(u64),

    #[error("could not parse provider output: {0}")]
    ParseFailure(String),
}

impl CollectorError {
    pub fn unavailable<S: Into<String>>(msg: S) -> Self {
        CollectorError::SourceUnavailable(msg.into())
    }

    pub fn parse<S: Into<String>>(msg: S) -> Self {
        CollectorError::ParseFailure(msg.into())
    }

    pub fn timeout(budget: Duration) -> Self {
        CollectorError::Timeout(budget.as_millis().min(u64::MAX as u128) as u64)
    }
}

impl From<io::Error> for CollectorError {
    fn from(err: io::Error) -> Self {
        CollectorError::SourceUnavailable(err.to_string())
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("invalid config JSON: {0}")]
    Parse(#[from] serde_json::Error),
}
