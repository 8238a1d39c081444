//! Runtime configuration
//!
//! A [`Config`] is built once at startup (from flags, optionally layered over
//! a TOML file) and never changes afterwards.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Patterns ignored when no others are configured
pub const DEFAULT_IGNORE_PATTERNS: &[&str] = &["*.tmp", "*.swp", ".git", ".DS_Store"];

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("source directory does not exist: {}", .0.display())]
    MissingSource(PathBuf),

    #[error("source is not a directory: {}", .0.display())]
    SourceNotDirectory(PathBuf),

    #[error("{field} must be at least 1")]
    Zero { field: &'static str },

    #[error("failed to read config file {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config file {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// Watcher and backup settings
#[derive(Debug, Clone)]
pub struct Config {
    /// Directory to monitor
    pub source_root: PathBuf,
    /// Directory to store backups in
    pub backup_root: PathBuf,
    /// Maximum number of versions kept per file
    pub max_versions: usize,
    /// Minimum time between two backups of the same file
    pub min_interval: Duration,
    /// Glob-on-basename or substring-on-path patterns to skip
    pub ignore_patterns: Vec<String>,
    /// Number of backup workers
    pub workers: usize,
    /// Capacity of the pending job queue
    pub queue_capacity: usize,
    /// Copy attempts per backup before giving up
    pub copy_attempts: u32,
    /// Delay before the first copy retry; doubles on each further retry
    pub retry_base_delay: Duration,
    /// How often the CLI reports statistics
    pub stats_interval: Duration,
}

impl Config {
    /// Create a configuration with default tuning for the given roots
    pub fn new(source_root: impl Into<PathBuf>, backup_root: impl Into<PathBuf>) -> Self {
        Self {
            source_root: source_root.into(),
            backup_root: backup_root.into(),
            max_versions: 3,
            min_interval: Duration::from_secs(5),
            ignore_patterns: DEFAULT_IGNORE_PATTERNS.iter().map(|p| p.to_string()).collect(),
            workers: 3,
            queue_capacity: 100,
            copy_attempts: 3,
            retry_base_delay: Duration::from_millis(100),
            stats_interval: Duration::from_secs(30),
        }
    }

    /// Load a configuration file; fields it omits keep their defaults
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let file: ConfigFile = toml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(file.into_config())
    }

    /// Check the invariants the rest of the system relies on
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.source_root.exists() {
            return Err(ConfigError::MissingSource(self.source_root.clone()));
        }
        if !self.source_root.is_dir() {
            return Err(ConfigError::SourceNotDirectory(self.source_root.clone()));
        }
        for (field, value) in [
            ("max_versions", self.max_versions),
            ("workers", self.workers),
            ("queue_capacity", self.queue_capacity),
            ("copy_attempts", self.copy_attempts as usize),
        ] {
            if value == 0 {
                return Err(ConfigError::Zero { field });
            }
        }
        Ok(())
    }
}

/// On-disk shape of a configuration file
///
/// Durations are plain milliseconds.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigFile {
    source: Option<PathBuf>,
    backup: Option<PathBuf>,
    max_versions: Option<usize>,
    min_interval_ms: Option<u64>,
    ignore_patterns: Option<Vec<String>>,
    workers: Option<usize>,
    queue_capacity: Option<usize>,
    copy_attempts: Option<u32>,
    retry_base_delay_ms: Option<u64>,
    stats_interval_ms: Option<u64>,
}

impl ConfigFile {
    fn into_config(self) -> Config {
        let mut config = Config::new(
            self.source.unwrap_or_default(),
            self.backup.unwrap_or_default(),
        );
        if let Some(v) = self.max_versions {
            config.max_versions = v;
        }
        if let Some(ms) = self.min_interval_ms {
            config.min_interval = Duration::from_millis(ms);
        }
        if let Some(patterns) = self.ignore_patterns {
            config.ignore_patterns = patterns;
        }
        if let Some(v) = self.workers {
            config.workers = v;
        }
        if let Some(v) = self.queue_capacity {
            config.queue_capacity = v;
        }
        if let Some(v) = self.copy_attempts {
            config.copy_attempts = v;
        }
        if let Some(ms) = self.retry_base_delay_ms {
            config.retry_base_delay = Duration::from_millis(ms);
        }
        if let Some(ms) = self.stats_interval_ms {
            config.stats_interval = Duration::from_millis(ms);
        }
        config
    }
}
