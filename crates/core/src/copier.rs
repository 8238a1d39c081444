//! Resilient file copy with exponential backoff
//!
//! A copy attempt streams the source into a freshly truncated destination in
//! fixed-size chunks. Failures are classified by [`BackupError::is_retryable`];
//! retryable ones are attempted again after `base_delay * 2^(n-1)`.

use crate::error::{BackupError, CopyStage};
use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, warn};

/// Chunk size used when streaming file contents
pub const CHUNK_SIZE: usize = 32 * 1024;

/// Bounds on how often and how patiently a copy is retried
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub max_attempts: u32,
    /// Delay before the first retry
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
        }
    }

    /// Delay to wait after the given failed attempt (1-based)
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(31);
        self.base_delay.saturating_mul(1u32 << shift)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_millis(100))
    }
}

/// Blocks the calling thread between attempts
pub trait Sleeper: Send + Sync {
    fn sleep(&self, delay: Duration);
}

/// Sleeps on the current thread
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&self, delay: Duration) {
        std::thread::sleep(delay);
    }
}

/// Copies files, retrying transient failures with exponential backoff
pub struct RetryingCopier<S: Sleeper = ThreadSleeper> {
    policy: RetryPolicy,
    sleeper: S,
}

impl RetryingCopier<ThreadSleeper> {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            sleeper: ThreadSleeper,
        }
    }
}

impl<S: Sleeper> RetryingCopier<S> {
    /// Create a copier that waits through a custom sleeper
    pub fn with_sleeper(policy: RetryPolicy, sleeper: S) -> Self {
        Self { policy, sleeper }
    }

    /// Copy `src` to `dst`, retrying per the policy
    pub fn copy(&self, src: &Path, dst: &Path) -> Result<(), BackupError> {
        self.run(|_| copy_once(src, dst))
    }

    /// Drive `attempt` until it succeeds, fails fatally, or the budget runs out.
    ///
    /// `attempt` receives the 1-based attempt number.
    pub fn run<F>(&self, mut attempt: F) -> Result<(), BackupError>
    where
        F: FnMut(u32) -> Result<(), BackupError>,
    {
        let max = self.policy.max_attempts;
        let mut last = None;

        for n in 1..=max {
            match attempt(n) {
                Ok(()) => return Ok(()),
                Err(err) if !err.is_retryable() => return Err(err),
                Err(err) => {
                    if n < max {
                        let delay = self.policy.delay_after(n);
                        warn!(attempt = n, ?delay, "copy attempt failed, retrying: {}", err);
                        self.sleeper.sleep(delay);
                    }
                    last = Some(err);
                }
            }
        }

        // max_attempts >= 1, so at least one attempt ran and failed
        match last {
            Some(last) => Err(BackupError::RetriesExhausted {
                attempts: max,
                last: Box::new(last),
            }),
            None => Ok(()),
        }
    }
}

/// One copy attempt without retries
pub fn copy_once(src: &Path, dst: &Path) -> Result<(), BackupError> {
    let meta = fs::metadata(src).map_err(|e| BackupError::from_io(src, CopyStage::StatSource, e))?;
    if meta.is_dir() {
        return Err(BackupError::NotAFile {
            path: src.to_path_buf(),
        });
    }

    let mut reader =
        File::open(src).map_err(|e| BackupError::from_io(src, CopyStage::OpenSource, e))?;
    let mut writer =
        File::create(dst).map_err(|e| BackupError::from_io(dst, CopyStage::CreateDestination, e))?;

    stream(&mut reader, &mut writer, src, dst)?;

    if let Err(e) = fs::set_permissions(dst, meta.permissions()) {
        debug!("could not copy permissions to {}: {}", dst.display(), e);
    }

    Ok(())
}

/// Stream `reader` into `writer` in [`CHUNK_SIZE`] pieces.
///
/// Returns the number of bytes copied. Any read or write failure is
/// reported as [`BackupError::Transient`].
pub fn stream<R: Read, W: Write>(
    reader: &mut R,
    writer: &mut W,
    src: &Path,
    dst: &Path,
) -> Result<u64, BackupError> {
    let mut buf = vec![0u8; CHUNK_SIZE];
    let mut total = 0u64;

    loop {
        let n = match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(transient(src, CopyStage::Read, e)),
        };
        writer
            .write_all(&buf[..n])
            .map_err(|e| transient(dst, CopyStage::Write, e))?;
        total += n as u64;
    }

    writer.flush().map_err(|e| transient(dst, CopyStage::Write, e))?;
    Ok(total)
}

fn transient(path: &Path, stage: CopyStage, source: io::Error) -> BackupError {
    BackupError::Transient {
        path: path.to_path_buf(),
        stage,
        source,
    }
}
