//! Configuration for the Greensight sync layer
//!
//! Every value has a compile-time default and can be overridden at runtime
//! via a dedicated environment variable.
//!
//! Data directory precedence:
//! 1. GREENSIGHT_DATA_DIR environment variable
//! 2. The platform data directory joined with `greensight`
//! 3. ./data (fallback for development)

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Default backend URL: the local development stack.
const DEFAULT_GATEWAY_URL: &str = "http://localhost:54321";

const APP_DIR_NAME: &str = "greensight";
const DEV_DATA_DIR: &str = "./data";

/// Largest image accepted for upload (5 MiB).
const DEFAULT_MAX_UPLOAD_BYTES: u64 = 5 * 1024 * 1024;

/// Retries after the first failed attempt of an idempotent read.
const DEFAULT_READ_RETRIES: u32 = 2;

/// Delay before the first retry; doubled on each further attempt.
const DEFAULT_RETRY_BACKOFF_MS: u64 = 200;

pub const ENV_GATEWAY_URL: &str = "GREENSIGHT_GATEWAY_URL";
pub const ENV_ANON_KEY: &str = "GREENSIGHT_ANON_KEY";
pub const ENV_DATA_DIR: &str = "GREENSIGHT_DATA_DIR";
pub const ENV_MAX_UPLOAD_BYTES: &str = "GREENSIGHT_MAX_UPLOAD_BYTES";
pub const ENV_READ_RETRIES: &str = "GREENSIGHT_READ_RETRIES";
pub const ENV_RETRY_BACKOFF_MS: &str = "GREENSIGHT_RETRY_BACKOFF_MS";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{var} has an invalid value: {value:?}")]
    InvalidValue { var: &'static str, value: String },

    #[error("{0} must not be empty")]
    Empty(&'static str),
}

/// Runtime settings for the sync layer.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncConfig {
    pub gateway_url: String,
    pub anon_key: String,
    pub data_dir: PathBuf,
    pub max_upload_bytes: u64,
    pub read_retries: u32,
    pub retry_backoff: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            gateway_url: DEFAULT_GATEWAY_URL.to_string(),
            anon_key: String::new(),
            data_dir: default_data_dir(),
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            read_retries: DEFAULT_READ_RETRIES,
            retry_backoff: Duration::from_millis(DEFAULT_RETRY_BACKOFF_MS),
        }
    }
}

impl SyncConfig {
    /// Read settings from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Read settings through `lookup`, which returns a variable's value if set.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(url) = lookup(ENV_GATEWAY_URL) {
            let url = url.trim();
            if url.is_empty() {
                return Err(ConfigError::Empty(ENV_GATEWAY_URL));
            }
            config.gateway_url = url.to_string();
        }
        if let Some(key) = lookup(ENV_ANON_KEY) {
            config.anon_key = key.trim().to_string();
        }
        if let Some(dir) = lookup(ENV_DATA_DIR) {
            config.data_dir = PathBuf::from(dir);
        }
        if let Some(v) = lookup(ENV_MAX_UPLOAD_BYTES) {
            config.max_upload_bytes = parse(ENV_MAX_UPLOAD_BYTES, &v)?;
            if config.max_upload_bytes == 0 {
                return Err(ConfigError::InvalidValue {
                    var: ENV_MAX_UPLOAD_BYTES,
                    value: v,
                });
            }
        }
        if let Some(v) = lookup(ENV_READ_RETRIES) {
            config.read_retries = parse(ENV_READ_RETRIES, &v)?;
        }
        if let Some(v) = lookup(ENV_RETRY_BACKOFF_MS) {
            config.retry_backoff = Duration::from_millis(parse(ENV_RETRY_BACKOFF_MS, &v)?);
        }

        Ok(config)
    }

    /// Directory for rolling log files.
    pub fn log_dir(&self) -> PathBuf {
        self.data_dir.join("logs")
    }

    /// Directory for the JSON preference files.
    pub fn preferences_dir(&self) -> PathBuf {
        self.data_dir.join("preferences")
    }

    /// SQLite database holding preferences.
    pub fn preferences_db_path(&self) -> PathBuf {
        self.data_dir.join("greensight.db")
    }
}

fn parse<T: std::str::FromStr>(var: &'static str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        var,
        value: value.to_string(),
    })
}

/// Get the data directory for local persistence.
///
/// Priority:
/// 1. GREENSIGHT_DATA_DIR env variable if set
/// 2. the platform data directory (e.g. ~/.local/share/greensight)
/// 3. ./data as fallback
pub fn get_data_dir() -> PathBuf {
    if let Ok(dir) = std::env::var(ENV_DATA_DIR) {
        return PathBuf::from(dir);
    }
    default_data_dir()
}

fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .map(|d| d.join(APP_DIR_NAME))
        .unwrap_or_else(|| PathBuf::from(DEV_DATA_DIR))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |k| map.get(k).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = SyncConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.gateway_url, "http://localhost:54321");
        assert_eq!(config.max_upload_bytes, 5 * 1024 * 1024);
        assert_eq!(config.read_retries, 2);
        assert_eq!(config.retry_backoff, Duration::from_millis(200));
        assert!(!config.data_dir.as_os_str().is_empty());
    }

    #[test]
    fn test_overrides() {
        let config = SyncConfig::from_lookup(lookup(&[
            (ENV_GATEWAY_URL, "https://proj.example.com"),
            (ENV_ANON_KEY, " key "),
            (ENV_DATA_DIR, "/tmp/greensight"),
            (ENV_READ_RETRIES, "0"),
            (ENV_RETRY_BACKOFF_MS, "50"),
        ]))
        .unwrap();
        assert_eq!(config.gateway_url, "https://proj.example.com");
        assert_eq!(config.anon_key, "key");
        assert_eq!(config.data_dir, PathBuf::from("/tmp/greensight"));
        assert_eq!(config.read_retries, 0);
        assert_eq!(config.retry_backoff, Duration::from_millis(50));
        assert_eq!(
            config.preferences_db_path(),
            PathBuf::from("/tmp/greensight/greensight.db")
        );
    }

    #[test]
    fn test_invalid_values() {
        assert_eq!(
            SyncConfig::from_lookup(lookup(&[(ENV_READ_RETRIES, "many")])),
            Err(ConfigError::InvalidValue {
                var: ENV_READ_RETRIES,
                value: "many".into()
            })
        );
        assert!(SyncConfig::from_lookup(lookup(&[(ENV_MAX_UPLOAD_BYTES, "0")])).is_err());
        assert_eq!(
            SyncConfig::from_lookup(lookup(&[(ENV_GATEWAY_URL, "  ")])),
            Err(ConfigError::Empty(ENV_GATEWAY_URL))
        );
    }

    #[test]
    fn test_get_data_dir_fallback() {
        // Returns the env override when GREENSIGHT_DATA_DIR is set.
        let dir = get_data_dir();
        assert!(!dir.as_os_str().is_empty());
    }
}
