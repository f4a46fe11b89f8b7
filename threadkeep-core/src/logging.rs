//! Logging for threadkeep
//!
//! Events go to a daily-rolling file under the XDG state directory
//! (`~/.local/state/threadkeep/threadkeep.log`). Stdout is never written,
//! since it carries command output (including `--json` results).

use crate::config::{Config, LoggingConfig};
use crate::error::{Error, Result};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const LOG_FILE_PREFIX: &str = "threadkeep.log";

/// Initialize file logging.
///
/// `RUST_LOG` wins over the configured level. An unparsable configured
/// level is a configuration error rather than a silent fallback.
pub fn init(config: &LoggingConfig) -> Result<LoggingGuard> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => configured_filter(&config.level)?,
    };

    let log_dir = Config::state_dir();
    std::fs::create_dir_all(&log_dir)?;

    let file_appender = RollingFileAppender::new(Rotation::DAILY, &log_dir, LOG_FILE_PREFIX);
    let (writer, guard) = tracing_appender::non_blocking(file_appender);

    let file_layer = fmt::layer()
        .with_writer(writer)
        .with_ansi(false)
        .with_target(true)
        .with_line_number(true);

    tracing_subscriber::registry()
        .with(filter)
        .with(file_layer)
        .try_init()
        .map_err(|e| Error::Config(format!("logging already initialized: {}", e)))?;

    tracing::debug!(log_dir = %log_dir.display(), level = %config.level, "Logging initialized");

    Ok(LoggingGuard { _guard: guard })
}

fn configured_filter(level: &str) -> Result<EnvFilter> {
    EnvFilter::try_new(level)
        .map_err(|e| Error::Config(format!("invalid log level '{}': {}", level, e)))
}

/// Route events to the test harness writer. Safe to call from every test.
pub fn init_test() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Flushes pending log lines when dropped; hold it for the process lifetime.
pub struct LoggingGuard {
    _guard: tracing_appender::non_blocking::WorkerGuard,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_configured_levels() {
        assert!(configured_filter("debug").is_ok());
        assert!(configured_filter("threadkeep_core=trace,warn").is_ok());
        assert!(matches!(
            configured_filter("threadkeep_core=loud"),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_log_path_matches_appender_prefix() {
        assert!(Config::log_path().ends_with(LOG_FILE_PREFIX));
    }
}
