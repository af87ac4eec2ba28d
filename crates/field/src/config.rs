//! Field client configuration from the environment.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use idsr_core::UserId;
use idsr_observability::LogFormat;

use crate::staging::sqlite::default_db_path;

pub const DEFAULT_REMOTE_URL: &str = "http://localhost:54321";
pub const DEFAULT_SYNC_INTERVAL_SECS: u64 = 30;
pub const DEFAULT_REMOTE_TIMEOUT_SECS: u64 = 15;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {var}: {reason}")]
    Invalid { var: &'static str, reason: String },

    #[error("{0} is required")]
    Missing(&'static str),

    #[error("could not resolve a default staging path: {0}")]
    NoDataDir(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldConfig {
    pub remote_url: String,
    pub remote_api_key: Option<String>,
    pub staging_db: PathBuf,
    /// Backstop interval between scheduled sync runs.
    pub sync_interval: Duration,
    /// Bound on each remote call.
    pub remote_timeout: Duration,
    pub reporter_id: Option<UserId>,
    pub log_format: LogFormat,
}

impl FieldConfig {
    /// Load from `IDSR_*` environment variables, falling back to defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Load through an arbitrary variable lookup (tests, embedding hosts).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |var: &str| lookup(var).filter(|v| !v.trim().is_empty());

        let staging_db = match get("IDSR_STAGING_DB") {
            Some(path) => PathBuf::from(path),
            None => default_db_path().map_err(|e| ConfigError::NoDataDir(format!("{e:#}")))?,
        };

        Ok(Self {
            remote_url: get("IDSR_REMOTE_URL").unwrap_or_else(|| DEFAULT_REMOTE_URL.to_string()),
            remote_api_key: get("IDSR_REMOTE_API_KEY"),
            staging_db,
            sync_interval: secs(
                "IDSR_SYNC_INTERVAL_SECS",
                get("IDSR_SYNC_INTERVAL_SECS"),
                DEFAULT_SYNC_INTERVAL_SECS,
            )?,
            remote_timeout: secs(
                "IDSR_REMOTE_TIMEOUT_SECS",
                get("IDSR_REMOTE_TIMEOUT_SECS"),
                DEFAULT_REMOTE_TIMEOUT_SECS,
            )?,
            reporter_id: parsed("IDSR_REPORTER_ID", get("IDSR_REPORTER_ID"))?,
            log_format: parsed("IDSR_LOG_FORMAT", get("IDSR_LOG_FORMAT"))?.unwrap_or_default(),
        })
    }

    pub fn require_reporter(&self) -> Result<UserId, ConfigError> {
        self.reporter_id.ok_or(ConfigError::Missing("IDSR_REPORTER_ID"))
    }
}

fn parsed<T>(var: &'static str, raw: Option<String>) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.map(|v| {
        v.trim().parse::<T>().map_err(|e| ConfigError::Invalid {
            var,
            reason: e.to_string(),
        })
    })
    .transpose()
}

fn secs(var: &'static str, raw: Option<String>, default: u64) -> Result<Duration, ConfigError> {
    let secs = parsed::<u64>(var, raw)?.unwrap_or(default);
    if secs == 0 {
        return Err(ConfigError::Invalid {
            var,
            reason: "must be at least 1 second".to_string(),
        });
    }
    Ok(Duration::from_secs(secs))
}
