//! Backup engine for backwatch
//!
//! This crate provides:
//! - Runtime configuration (`Config`)
//! - The backup error taxonomy with retry classification
//! - Resilient file copy with exponential backoff
//! - Timestamped version naming
//! - Per-file version directories with oldest-first eviction

pub mod config;
pub mod copier;
pub mod error;
pub mod store;
pub mod version;

// Re-exports
pub use config::{Config, ConfigError};
pub use copier::{RetryPolicy, RetryingCopier, Sleeper, ThreadSleeper};
pub use error::{BackupError, CopyStage};
pub use store::{BackupReport, VersionStore};
pub use version::{VersionFile, VersionName};

/// Result type for backup operations
pub type Result<T> = std::result::Result<T, BackupError>;
