//! Backup error taxonomy
//!
//! Every failure the backup path can produce is one variant of
//! [`BackupError`]. The retry loop in [`crate::copier`] only consults
//! [`BackupError::is_retryable`].

use std::fmt;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Stage of a single copy attempt at which an I/O failure happened
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CopyStage {
    /// Reading source metadata
    StatSource,
    /// Opening the source for reading
    OpenSource,
    /// Creating (truncating) the destination
    CreateDestination,
    /// Streaming bytes out of the source
    Read,
    /// Streaming bytes into the destination
    Write,
}

impl fmt::Display for CopyStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CopyStage::StatSource => "stat_source",
            CopyStage::OpenSource => "open_source",
            CopyStage::CreateDestination => "create_destination",
            CopyStage::Read => "read",
            CopyStage::Write => "write",
        };
        f.write_str(name)
    }
}

/// Error produced while backing up a single file
#[derive(Debug, Error)]
pub enum BackupError {
    /// The source vanished before it could be copied
    #[error("source file does not exist: {}", path.display())]
    NotFound { path: PathBuf },

    /// Permission failure; may clear up on a later attempt
    #[error("permission denied [{stage}] {}: {source}", path.display())]
    PermissionDenied {
        path: PathBuf,
        stage: CopyStage,
        #[source]
        source: io::Error,
    },

    /// A directory showed up where a regular file was expected
    #[error("source is a directory: {}", path.display())]
    NotAFile { path: PathBuf },

    /// Read or write failed mid-stream
    #[error("transient i/o failure [{stage}] {}: {source}", path.display())]
    Transient {
        path: PathBuf,
        stage: CopyStage,
        #[source]
        source: io::Error,
    },

    /// Any other I/O failure while setting up an attempt
    #[error("i/o failure [{stage}] {}: {source}", path.display())]
    Unrecoverable {
        path: PathBuf,
        stage: CopyStage,
        #[source]
        source: io::Error,
    },

    /// Retry budget spent; wraps the cause of the final attempt
    #[error("exceeded max retries ({attempts}): {last}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        last: Box<BackupError>,
    },

    /// Could not derive or create the version directory
    #[error("failed to prepare backup for {}: {reason}", path.display())]
    Prepare {
        path: PathBuf,
        reason: String,
        #[source]
        source: Option<io::Error>,
    },

    /// An excess version could not be deleted; the new version is kept
    #[error("failed to evict old version {}: {source}", path.display())]
    Eviction {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl BackupError {
    /// Classify an I/O error raised at `stage` while touching `path`.
    ///
    /// Permission errors are retryable at every stage, a missing file never
    /// is, and mid-stream failures always are.
    pub fn from_io(path: impl Into<PathBuf>, stage: CopyStage, source: io::Error) -> Self {
        let path = path.into();
        match (source.kind(), stage) {
            (io::ErrorKind::PermissionDenied, _) => Self::PermissionDenied { path, stage, source },
            (io::ErrorKind::NotFound, CopyStage::StatSource | CopyStage::OpenSource) => {
                Self::NotFound { path }
            }
            (_, CopyStage::Read | CopyStage::Write) => Self::Transient { path, stage, source },
            _ => Self::Unrecoverable { path, stage, source },
        }
    }

    /// Whether another attempt could succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::PermissionDenied { .. } | Self::Transient { .. })
    }

    /// Whether the failure means the source no longer exists
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::NotFound { .. } => true,
            Self::RetriesExhausted { last, .. } => last.is_not_found(),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn io_err(kind: io::ErrorKind) -> io::Error {
        io::Error::new(kind, "boom")
    }

    #[test]
    fn test_permission_is_retryable_at_any_stage() {
        for stage in [
            CopyStage::StatSource,
            CopyStage::OpenSource,
            CopyStage::CreateDestination,
        ] {
            let err = BackupError::from_io("/a", stage, io_err(io::ErrorKind::PermissionDenied));
            assert!(err.is_retryable(), "{stage} should be retryable");
        }
    }

    #[test]
    fn test_missing_source_is_fatal() {
        let err = BackupError::from_io("/a", CopyStage::StatSource, io_err(io::ErrorKind::NotFound));
        assert!(matches!(err, BackupError::NotFound { .. }));
        assert!(!err.is_retryable());
        assert!(err.is_not_found());
    }

    #[test]
    fn test_stream_failures_are_transient() {
        let read = BackupError::from_io("/a", CopyStage::Read, io_err(io::ErrorKind::Other));
        let write = BackupError::from_io("/b", CopyStage::Write, io_err(io::ErrorKind::WriteZero));
        assert!(read.is_retryable());
        assert!(write.is_retryable());
    }

    #[test]
    fn test_other_setup_failures_are_fatal() {
        let err = BackupError::from_io(
            "/b",
            CopyStage::CreateDestination,
            io_err(io::ErrorKind::NotFound),
        );
        assert!(matches!(err, BackupError::Unrecoverable { .. }));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_exhausted_wraps_last_cause() {
        let last = BackupError::from_io("/a", CopyStage::Write, io_err(io::ErrorKind::Other));
        let err = BackupError::RetriesExhausted {
            attempts: 3,
            last: Box::new(last),
        };
        assert!(!err.is_retryable());
        let msg = err.to_string();
        assert!(msg.contains("exceeded max retries (3)"));
        assert!(msg.contains("[write]"));
    }
}
