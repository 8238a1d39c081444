//! Watch service abstraction and its `notify` backend
//!
//! A watch service delivers change notifications and asynchronous errors on
//! two separate streams, and accepts new directories at runtime. Directories
//! are registered one by one (non-recursively) so ignored subtrees are never
//! watched.

use crate::{WatchEvent, WatchOp};
use crossbeam_channel::{Receiver, Sender};
use notify::event::ModifyKind;
use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors surfaced by a watch service
#[derive(Debug, Error)]
pub enum WatchError {
    #[error("failed to watch {}: {source}", path.display())]
    Register {
        path: PathBuf,
        #[source]
        source: notify::Error,
    },

    #[error("failed to walk {}: {source}", path.display())]
    Walk {
        path: PathBuf,
        #[source]
        source: walkdir::Error,
    },

    #[error("watch backend error: {0}")]
    Backend(#[from] notify::Error),
}

/// Registers directories for monitoring
pub trait WatchService: Send + Sync {
    /// Start watching `path` (not its subdirectories)
    fn add_directory(&self, path: &Path) -> Result<(), WatchError>;
}

/// Notification and error streams of a watch service
pub struct WatchStreams {
    pub events: Receiver<WatchEvent>,
    pub errors: Receiver<WatchError>,
}

/// [`WatchService`] backed by the platform's recommended `notify` watcher
pub struct NotifyWatchService {
    watcher: Mutex<RecommendedWatcher>,
}

impl NotifyWatchService {
    /// Create the native watcher and the streams it feeds
    pub fn new() -> Result<(Self, WatchStreams), WatchError> {
        let (event_tx, events) = crossbeam_channel::unbounded();
        let (error_tx, errors) = crossbeam_channel::unbounded();

        let watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
            forward(res, &event_tx, &error_tx);
        })?;

        Ok((
            Self {
                watcher: Mutex::new(watcher),
            },
            WatchStreams { events, errors },
        ))
    }
}

impl WatchService for NotifyWatchService {
    fn add_directory(&self, path: &Path) -> Result<(), WatchError> {
        self.watcher
            .lock()
            .watch(path, RecursiveMode::NonRecursive)
            .map_err(|source| WatchError::Register {
                path: path.to_path_buf(),
                source,
            })
    }
}

/// Route one backend callback onto the matching stream. Send failures mean
/// the dispatcher is gone, which only happens during shutdown.
fn forward(
    res: notify::Result<notify::Event>,
    events: &Sender<WatchEvent>,
    errors: &Sender<WatchError>,
) {
    match res {
        Ok(event) => {
            for watch_event in translate(event) {
                let _ = events.send(watch_event);
            }
        }
        Err(err) => {
            let _ = errors.send(WatchError::Backend(err));
        }
    }
}

/// Split a notify event into one [`WatchEvent`] per affected path
pub fn translate(event: notify::Event) -> Vec<WatchEvent> {
    let op = classify(&event.kind);
    event
        .paths
        .into_iter()
        .map(|path| WatchEvent { path, op })
        .collect()
}

/// Map a notify event kind onto the operations the dispatcher cares about
pub fn classify(kind: &EventKind) -> WatchOp {
    match kind {
        EventKind::Create(_) => WatchOp::Create,
        EventKind::Modify(ModifyKind::Data(_)) | EventKind::Modify(ModifyKind::Any) => {
            WatchOp::Write
        }
        EventKind::Modify(ModifyKind::Name(_)) => WatchOp::Rename,
        EventKind::Modify(ModifyKind::Metadata(_)) => WatchOp::Chmod,
        EventKind::Remove(_) => WatchOp::Remove,
        _ => WatchOp::Other,
    }
}
