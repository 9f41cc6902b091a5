//! Logging setup for hosts embedding the sync layer.

use std::path::Path;

use thiserror::Error;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Prefix of the daily rolling log files.
pub const LOG_FILE_PREFIX: &str = "greensight";

#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("Failed to create log directory {path}: {source}")]
    LogDir {
        path: String,
        source: std::io::Error,
    },

    #[error("A global subscriber is already installed: {0}")]
    AlreadyInstalled(#[from] tracing_subscriber::util::TryInitError),
}

/// Install a global subscriber writing to a daily rolling file in `log_dir`.
///
/// The filter defaults to `info` and can be overridden with `RUST_LOG`. Keep
/// the returned guard alive for as long as logs should be flushed.
pub fn init_logging(log_dir: &Path) -> Result<WorkerGuard, TelemetryError> {
    std::fs::create_dir_all(log_dir).map_err(|source| TelemetryError::LogDir {
        path: log_dir.display().to_string(),
        source,
    })?;
    let file_appender = tracing_appender::rolling::daily(log_dir, LOG_FILE_PREFIX);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_target(true)
                .with_line_number(true),
        )
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .try_init()?;

    tracing::info!(log_dir = %log_dir.display(), "Greensight logging initialised");
    Ok(guard)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_logging_creates_dir_and_refuses_second_install() {
        let dir = tempfile::tempdir().unwrap();
        let log_dir = dir.path().join("logs");
        let first = init_logging(&log_dir);
        assert!(log_dir.is_dir());
        // Only one global subscriber can exist per process.
        if first.is_ok() {
            assert!(matches!(
                init_logging(&log_dir),
                Err(TelemetryError::AlreadyInstalled(_))
            ));
        }
    }
}
