//! Client configuration.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;
use url::Url;

/// Default per-request deadline.
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 15;

/// Default number of attempts for retryable reads.
pub const DEFAULT_LIST_RETRIES: u32 = 3;

const DEFAULT_AUTH_URL: &str = "https://identitytoolkit.googleapis.com/v1";
const DEFAULT_TOKEN_URL: &str = "https://securetoken.googleapis.com/v1";

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing configuration: {0}")]
    Missing(&'static str),

    #[error("Invalid URL for {key}: {reason}")]
    InvalidUrl { key: &'static str, reason: String },

    #[error("Invalid value for {key}: {value}")]
    InvalidValue { key: &'static str, value: String },
}

/// Configuration for talking to the hosted backend.
#[derive(Clone, Debug)]
pub struct ClientConfig {
    /// Web API key of the hosted project.
    pub api_key: Option<String>,
    /// Base URL of the realtime database, e.g. `https://<project>.firebaseio.com`.
    pub database_url: Option<String>,
    /// Base URL of the identity endpoints.
    pub auth_url: String,
    /// Base URL of the token exchange endpoint.
    pub token_url: String,
    /// Deadline applied to every backend request.
    pub request_timeout: Duration,
    /// Attempts for `list` before giving up.
    pub list_retries: u32,
    /// Directory holding the persisted session token.
    pub data_dir: PathBuf,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            database_url: None,
            auth_url: DEFAULT_AUTH_URL.to_string(),
            token_url: DEFAULT_TOKEN_URL.to_string(),
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            list_retries: DEFAULT_LIST_RETRIES,
            data_dir: default_data_dir(),
        }
    }
}

impl ClientConfig {
    /// Reads configuration from environment variables.
    ///
    /// | Variable                         | Default                                   |
    /// |----------------------------------|-------------------------------------------|
    /// | `CORKBOARD_API_KEY`              | none (required)                           |
    /// | `CORKBOARD_DATABASE_URL`         | none (required)                           |
    /// | `CORKBOARD_AUTH_URL`             | `https://identitytoolkit.googleapis.com/v1` |
    /// | `CORKBOARD_TOKEN_URL`            | `https://securetoken.googleapis.com/v1`   |
    /// | `CORKBOARD_REQUEST_TIMEOUT_SECS` | `15`                                      |
    /// | `CORKBOARD_LIST_RETRIES`         | `3`                                       |
    /// | `CORKBOARD_DATA_DIR`             | `<data dir>/corkboard`                    |
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        Ok(Self {
            api_key: non_empty_var("CORKBOARD_API_KEY"),
            database_url: non_empty_var("CORKBOARD_DATABASE_URL"),
            auth_url: non_empty_var("CORKBOARD_AUTH_URL").unwrap_or(defaults.auth_url),
            token_url: non_empty_var("CORKBOARD_TOKEN_URL").unwrap_or(defaults.token_url),
            request_timeout: match non_empty_var("CORKBOARD_REQUEST_TIMEOUT_SECS") {
                Some(v) => Duration::from_secs(parse_number("CORKBOARD_REQUEST_TIMEOUT_SECS", &v)?),
                None => defaults.request_timeout,
            },
            list_retries: match non_empty_var("CORKBOARD_LIST_RETRIES") {
                Some(v) => parse_number("CORKBOARD_LIST_RETRIES", &v)?,
                None => defaults.list_retries,
            },
            data_dir: non_empty_var("CORKBOARD_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
        })
    }

    /// Checks that the hosted backend is fully specified.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.api_key.is_none() {
            return Err(ConfigError::Missing("CORKBOARD_API_KEY"));
        }
        let database_url = self
            .database_url
            .as_deref()
            .ok_or(ConfigError::Missing("CORKBOARD_DATABASE_URL"))?;
        check_url("CORKBOARD_DATABASE_URL", database_url)?;
        check_url("CORKBOARD_AUTH_URL", &self.auth_url)?;
        check_url("CORKBOARD_TOKEN_URL", &self.token_url)?;
        if self.list_retries == 0 {
            return Err(ConfigError::InvalidValue {
                key: "CORKBOARD_LIST_RETRIES",
                value: "0".into(),
            });
        }
        Ok(())
    }

    /// Path of the file backing the local key-value store.
    pub fn store_path(&self) -> PathBuf {
        self.data_dir.join("session.json")
    }
}

fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("corkboard")
}

fn non_empty_var(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn parse_number<T: std::str::FromStr>(key: &'static str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key,
        value: value.to_string(),
    })
}

fn check_url(key: &'static str, value: &str) -> Result<(), ConfigError> {
    let url = Url::parse(value).map_err(|e| ConfigError::InvalidUrl {
        key,
        reason: e.to_string(),
    })?;
    match url.scheme() {
        "http" | "https" => Ok(()),
        other => Err(ConfigError::InvalidUrl {
            key,
            reason: format!("unsupported scheme {other}"),
        }),
    }
}
