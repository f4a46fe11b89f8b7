//! Configuration loading and management
//!
//! Configuration is loaded from `~/.config/threadkeep/config.toml`
//!
//! This module follows the XDG Base Directory Specification:
//! - Config: `$XDG_CONFIG_HOME/threadkeep/` (~/.config/threadkeep/)
//! - Data: `$XDG_DATA_HOME/threadkeep/` (~/.local/share/threadkeep/)
//! - State/Logs: `$XDG_STATE_HOME/threadkeep/` (~/.local/state/threadkeep/)

use crate::error::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Default interval between automatic bulk syncs.
pub const DEFAULT_SYNC_INTERVAL_SECS: u64 = 300;

/// Returns a best-effort home directory path.
fn home_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Returns XDG_CONFIG_HOME or ~/.config
fn xdg_config_home() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".config"))
}

/// Returns XDG_DATA_HOME or ~/.local/share
fn xdg_data_home() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local/share"))
}

/// Returns XDG_STATE_HOME or ~/.local/state
fn xdg_state_home() -> PathBuf {
    std::env::var("XDG_STATE_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local/state"))
}

/// Main configuration struct
#[derive(Debug, Deserialize, Default, Clone)]
pub struct Config {
    /// Source location overrides
    #[serde(default)]
    pub sources: SourcesConfig,

    /// Synchronization behavior
    #[serde(default)]
    pub sync: SyncConfig,

    /// Search defaults
    #[serde(default)]
    pub search: SearchConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Where each source keeps its history
#[derive(Debug, Deserialize, Default, Clone)]
pub struct SourcesConfig {
    /// Override path for Cursor's `state.vscdb`
    pub cursor_db_path: Option<PathBuf>,
    /// Override path for Claude Code's `projects` directory
    pub claude_projects_path: Option<PathBuf>,
}

impl SourcesConfig {
    /// Cursor global storage database.
    ///
    /// Defaults to `<platform config dir>/Cursor/User/globalStorage/state.vscdb`.
    pub fn cursor_db_path(&self) -> PathBuf {
        self.cursor_db_path.clone().unwrap_or_else(|| {
            dirs::config_dir()
                .unwrap_or_else(|| home_dir().join(".config"))
                .join("Cursor/User/globalStorage/state.vscdb")
        })
    }

    /// Claude Code projects root, `~/.claude/projects` by default.
    pub fn claude_projects_path(&self) -> PathBuf {
        self.claude_projects_path
            .clone()
            .unwrap_or_else(|| home_dir().join(".claude").join("projects"))
    }
}

/// Synchronization configuration
#[derive(Debug, Deserialize, Clone)]
pub struct SyncConfig {
    /// Run a bulk sync automatically before reads once the interval has passed
    #[serde(default = "default_auto_sync")]
    pub auto_sync: bool,

    /// Seconds between automatic bulk syncs
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,

    /// Cap on sessions examined per source during a bulk sync (0 = no cap)
    #[serde(default)]
    pub max_sessions: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            auto_sync: default_auto_sync(),
            interval_secs: default_interval_secs(),
            max_sessions: 0,
        }
    }
}

impl SyncConfig {
    /// Session cap as an optional limit.
    pub fn limit(&self) -> Option<usize> {
        (self.max_sessions > 0).then_some(self.max_sessions)
    }

    /// Auto-sync interval as a chrono duration.
    pub fn interval(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.interval_secs.min(i64::MAX as u64) as i64)
    }
}

fn default_auto_sync() -> bool {
    true
}

fn default_interval_secs() -> u64 {
    DEFAULT_SYNC_INTERVAL_SECS
}

/// Search configuration
#[derive(Debug, Deserialize, Default, Clone)]
pub struct SearchConfig {
    /// Match case exactly when searching
    #[serde(default)]
    pub case_sensitive: bool,
}

/// Logging configuration
#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// Load configuration from the default path
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path();

        if !config_path.exists() {
            tracing::info!("No config file found at {:?}, using defaults", config_path);
            return Ok(Config::default());
        }

        Self::load_from(&config_path)
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read config file {:?}: {}", path, e)))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("failed to parse config: {}", e)))?;

        Ok(config)
    }

    /// Returns the default config file path
    ///
    /// `$XDG_CONFIG_HOME/threadkeep/config.toml` (~/.config/threadkeep/config.toml)
    pub fn config_path() -> PathBuf {
        xdg_config_home().join("threadkeep").join("config.toml")
    }

    /// Returns the data directory path (for the metadata database)
    ///
    /// `$XDG_DATA_HOME/threadkeep/` (~/.local/share/threadkeep/)
    pub fn data_dir() -> PathBuf {
        xdg_data_home().join("threadkeep")
    }

    /// Returns the state directory path (for logs)
    ///
    /// `$XDG_STATE_HOME/threadkeep/` (~/.local/state/threadkeep/)
    pub fn state_dir() -> PathBuf {
        xdg_state_home().join("threadkeep")
    }

    /// Returns the metadata database file path
    ///
    /// `$XDG_DATA_HOME/threadkeep/metadata.db`
    pub fn database_path() -> PathBuf {
        Self::data_dir().join("metadata.db")
    }

    /// Returns the log file path
    ///
    /// `$XDG_STATE_HOME/threadkeep/threadkeep.log`
    pub fn log_path() -> PathBuf {
        Self::state_dir().join("threadkeep.log")
    }

    /// Ensure XDG base directory environment variables are set.
    ///
    /// CLI binaries call this before anything else reads the env vars.
    pub fn ensure_xdg_env() {
        let home = home_dir();

        if std::env::var("XDG_DATA_HOME").is_err() {
            std::env::set_var("XDG_DATA_HOME", home.join(".local/share"));
        }

        if std::env::var("XDG_STATE_HOME").is_err() {
            std::env::set_var("XDG_STATE_HOME", home.join(".local/state"));
        }

        if std::env::var("XDG_CONFIG_HOME").is_err() {
            std::env::set_var("XDG_CONFIG_HOME", home.join(".config"));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.sync.auto_sync);
        assert_eq!(config.sync.interval_secs, 300);
        assert_eq!(config.sync.limit(), None);
        assert!(!config.search.case_sensitive);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_parse_config() {
        let toml = r#"
[sources]
cursor_db_path = "/tmp/state.vscdb"
claude_projects_path = "/tmp/claude/projects"

[sync]
auto_sync = false
interval_secs = 60
max_sessions = 25

[search]
case_sensitive = true

[logging]
level = "debug"
"#;
        let config: Config = toml::from_str(toml).unwrap();

        assert_eq!(
            config.sources.cursor_db_path(),
            PathBuf::from("/tmp/state.vscdb")
        );
        assert_eq!(
            config.sources.claude_projects_path(),
            PathBuf::from("/tmp/claude/projects")
        );
        assert!(!config.sync.auto_sync);
        assert_eq!(config.sync.interval(), chrono::Duration::seconds(60));
        assert_eq!(config.sync.limit(), Some(25));
        assert!(config.search.case_sensitive);
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_partial_sections_use_defaults() {
        let config: Config = toml::from_str("[sync]\nmax_sessions = 5\n").unwrap();
        assert!(config.sync.auto_sync);
        assert_eq!(config.sync.interval_secs, DEFAULT_SYNC_INTERVAL_SECS);
        assert_eq!(config.sync.limit(), Some(5));
    }

    #[test]
    fn test_default_source_paths() {
        let sources = SourcesConfig::default();
        assert!(sources
            .cursor_db_path()
            .ends_with("Cursor/User/globalStorage/state.vscdb"));
        assert!(sources.claude_projects_path().ends_with(".claude/projects"));
    }

    #[test]
    fn test_invalid_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[sync\nauto_sync = ").unwrap();
        assert!(matches!(Config::load_from(&path), Err(Error::Config(_))));
    }
}
