//! Event dispatch
//!
//! Consumes the watch service's event and error streams on a single thread.
//! Each event is classified, filtered against the ignore rules, and either
//! registers a new directory or goes through debounce admission into the
//! job queue. Nothing here blocks on the queue: a full queue drops the job.

use crate::context::WatchContext;
use crate::debounce::Admission;
use crate::ignore::IgnoreRules;
use crate::queue::Enqueue;
use crate::service::{WatchError, WatchService, WatchStreams};
use crate::{BackupJob, JobKind, WatchEvent, WatchOp};
use crossbeam_channel::{select, Receiver};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};
use walkdir::WalkDir;

/// What the dispatcher did with one event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// Backup job enqueued
    Queued,
    /// Inside the path's debounce window
    Suppressed,
    /// Queue at capacity, job dropped
    QueueFull,
    /// Queue closed for shutdown, job dropped
    QueueClosed,
    /// Path matched an ignore rule
    Ignored,
    /// New directory watched, with the number of directories registered
    DirectoryRegistered(usize),
    /// New directory could not be watched
    RegistrationFailed,
    /// Removal or rename, logged only
    Observed,
    /// Operation not relevant to backups
    Skipped,
}

/// Routes watch events into the backup pipeline
pub struct EventDispatcher {
    source_root: PathBuf,
    ignore: Arc<IgnoreRules>,
    context: Arc<WatchContext>,
    service: Arc<dyn WatchService>,
}

impl EventDispatcher {
    pub fn new(
        source_root: PathBuf,
        ignore: Arc<IgnoreRules>,
        context: Arc<WatchContext>,
        service: Arc<dyn WatchService>,
    ) -> Self {
        Self {
            source_root,
            ignore,
            context,
            service,
        }
    }

    /// Register `root` and every non-ignored directory below it. An ignored
    /// directory prunes its whole subtree. `root` itself is always
    /// registered; a subdirectory that cannot be registered is logged and
    /// skipped.
    ///
    /// Returns the number of directories registered.
    pub fn register_tree(&self, root: &Path) -> Result<usize, WatchError> {
        let mut registered = 0;

        let walker = WalkDir::new(root).into_iter().filter_entry(|entry| {
            entry.depth() == 0 || !self.ignore.matches(entry.path(), entry.file_type().is_dir())
        });

        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) if err.depth() > 0 => {
                    warn!("Skipping unreadable entry: {}", err);
                    continue;
                }
                Err(source) => {
                    return Err(WatchError::Walk {
                        path: root.to_path_buf(),
                        source,
                    });
                }
            };

            if !entry.file_type().is_dir() {
                continue;
            }

            match self.service.add_directory(entry.path()) {
                Ok(()) => {
                    debug!("Watching {}", entry.path().display());
                    registered += 1;
                }
                Err(err) if entry.depth() > 0 => {
                    warn!("Failed to watch {}: {}", entry.path().display(), err);
                }
                Err(err) => return Err(err),
            }
        }

        Ok(registered)
    }

    /// Handle a single event
    pub fn handle_event(&self, event: WatchEvent) -> Dispatch {
        let WatchEvent { path, op } = event;

        let kind = match op {
            WatchOp::Create => JobKind::Created,
            WatchOp::Write => JobKind::Modified,
            WatchOp::Remove => {
                info!("Removed: {}", self.display(&path));
                return Dispatch::Observed;
            }
            WatchOp::Rename => {
                info!("Renamed: {}", self.display(&path));
                return Dispatch::Observed;
            }
            WatchOp::Chmod | WatchOp::Other => return Dispatch::Skipped,
        };

        // The entry may already be gone; treat it as a file and let the
        // worker report the missing source
        let is_dir = std::fs::symlink_metadata(&path)
            .map(|meta| meta.is_dir())
            .unwrap_or(false);

        if self.ignore.matches(&path, is_dir) {
            return Dispatch::Ignored;
        }

        if is_dir {
            if op != WatchOp::Create {
                return Dispatch::Skipped;
            }
            return match self.register_tree(&path) {
                Ok(count) => {
                    info!("New directory: {}", self.display(&path));
                    Dispatch::DirectoryRegistered(count)
                }
                Err(err) => {
                    error!("Failed to watch new directory {}: {}", path.display(), err);
                    Dispatch::RegistrationFailed
                }
            };
        }

        self.enqueue(path, kind)
    }

    fn enqueue(&self, path: PathBuf, kind: JobKind) -> Dispatch {
        let mut rejected = None;
        let admission = self.context.debounce.admit_with(&path, Instant::now(), || {
            match self.context.queue.try_enqueue(BackupJob::new(path.clone(), kind)) {
                Enqueue::Queued => true,
                Enqueue::Full(_) => {
                    rejected = Some(Dispatch::QueueFull);
                    false
                }
                Enqueue::Closed(_) => {
                    rejected = Some(Dispatch::QueueClosed);
                    false
                }
            }
        });

        match admission {
            Admission::Admitted => {
                info!("Queued [{}]: {}", kind, self.display(&path));
                Dispatch::Queued
            }
            Admission::Suppressed { elapsed } => {
                debug!(
                    "Skipping {}: too soon since last backup ({:?} ago)",
                    self.display(&path),
                    elapsed
                );
                Dispatch::Suppressed
            }
            Admission::Declined => match rejected.unwrap_or(Dispatch::QueueClosed) {
                Dispatch::QueueFull => {
                    warn!("Queue full, skipping backup for: {}", self.display(&path));
                    Dispatch::QueueFull
                }
                other => {
                    debug!("Queue closed, dropping event for {}", self.display(&path));
                    other
                }
            },
        }
    }

    /// Log an error reported by the watch service
    pub fn handle_error(&self, err: &WatchError) {
        error!("Watcher error: {}", err);
    }

    /// Dispatch events until `shutdown` fires (or its sender is dropped) or
    /// the event stream ends
    pub fn run(&self, streams: WatchStreams, shutdown: Receiver<()>) {
        let WatchStreams { events, mut errors } = streams;

        loop {
            select! {
                recv(shutdown) -> _ => break,
                recv(events) -> event => match event {
                    Ok(event) => {
                        self.handle_event(event);
                    }
                    Err(_) => {
                        debug!("Event stream closed");
                        break;
                    }
                },
                recv(errors) -> err => match err {
                    Ok(err) => self.handle_error(&err),
                    // Keep dispatching events without the error stream
                    Err(_) => errors = crossbeam_channel::never(),
                },
            }
        }

        debug!("Event dispatcher exiting");
    }

    /// Path relative to the source root, for log lines
    fn display(&self, path: &Path) -> String {
        path.strip_prefix(&self.source_root)
            .unwrap_or(path)
            .display()
            .to_string()
    }
}
