//! File system watching for backwatch
//!
//! This crate turns raw change notifications into versioned backups:
//! - Ignore-pattern filtering and directory registration
//! - Per-path debouncing
//! - Bounded job queue with drop-on-full backpressure
//! - Worker pool with per-job fault isolation
//! - Lifecycle orchestration (`BackupWatcher`)

pub mod context;
pub mod debounce;
pub mod dispatch;
pub mod ignore;
pub mod pool;
pub mod queue;
pub mod service;

use anyhow::{Context, Result};
use backwatch_core::{Config, VersionStore};
use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::SystemTime;
use tracing::{info, warn};

pub use context::{WatchContext, WatcherStats};
pub use debounce::{Admission, DebounceTracker};
pub use dispatch::{Dispatch, EventDispatcher};
pub use ignore::IgnoreRules;
pub use pool::{BackupProcessor, JobOutcome, JobProcessor, WorkerPool};
pub use queue::{Enqueue, JobQueue};
pub use service::{NotifyWatchService, WatchError, WatchService, WatchStreams};

/// File system event as delivered by a [`WatchService`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchEvent {
    /// Path that changed
    pub path: PathBuf,
    /// Type of change
    pub op: WatchOp,
}

impl WatchEvent {
    pub fn new(path: impl Into<PathBuf>, op: WatchOp) -> Self {
        Self {
            path: path.into(),
            op,
        }
    }
}

/// Type of file system event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchOp {
    /// File or directory created
    Create,
    /// File contents written
    Write,
    /// File or directory deleted
    Remove,
    /// File or directory renamed
    Rename,
    /// Permissions or other metadata changed
    Chmod,
    /// Anything else (access, unknown)
    Other,
}

/// Why a backup job was created
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobKind {
    Created,
    Modified,
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobKind::Created => f.write_str("CREATE"),
            JobKind::Modified => f.write_str("WRITE"),
        }
    }
}

/// A request to back up one file
#[derive(Debug, Clone)]
pub struct BackupJob {
    /// Absolute path to the source file
    pub path: PathBuf,
    /// Event that triggered the backup
    pub kind: JobKind,
    /// When the event was detected
    pub detected_at: SystemTime,
}

impl BackupJob {
    pub fn new(path: PathBuf, kind: JobKind) -> Self {
        Self {
            path,
            kind,
            detected_at: SystemTime::now(),
        }
    }
}

/// Watches a source tree and backs up changed files
///
/// `start` blocks until `stop` is called from another thread.
pub struct BackupWatcher {
    config: Arc<Config>,
    context: Arc<WatchContext>,
    ignore: Arc<IgnoreRules>,
    processor: Arc<dyn JobProcessor>,
    state: Mutex<Lifecycle>,
    stop_tx: Mutex<Option<Sender<()>>>,
    stop_rx: Receiver<()>,
}

enum Lifecycle {
    Idle {
        service: Arc<dyn WatchService>,
        streams: WatchStreams,
    },
    Running(Running),
    Stopped,
}

struct Running {
    pool: WorkerPool,
    dispatcher: JoinHandle<()>,
    dispatcher_shutdown: Sender<()>,
    service: Arc<dyn WatchService>,
}

impl BackupWatcher {
    /// Create a watcher backed by the platform's native notification API
    pub fn new(config: Config) -> Result<Self> {
        let config = prepare(config)?;
        let (service, streams) =
            NotifyWatchService::new().context("failed to create file watcher")?;
        let processor = BackupProcessor::new(
            VersionStore::from_config(&config),
            config.source_root.clone(),
        );
        Self::with_parts(config, Arc::new(service), streams, Arc::new(processor))
    }

    /// Create a watcher from explicit collaborators.
    ///
    /// `config` is used as given; paths should already be absolute.
    pub fn with_parts(
        config: Config,
        service: Arc<dyn WatchService>,
        streams: WatchStreams,
        processor: Arc<dyn JobProcessor>,
    ) -> Result<Self> {
        let ignore = IgnoreRules::new(&config.ignore_patterns)
            .context("invalid ignore pattern")?
            .exclude(config.backup_root.clone());
        let context = WatchContext::new(config.min_interval, config.queue_capacity);
        let (stop_tx, stop_rx) = crossbeam_channel::bounded(0);

        Ok(Self {
            config: Arc::new(config),
            context: Arc::new(context),
            ignore: Arc::new(ignore),
            processor,
            state: Mutex::new(Lifecycle::Idle { service, streams }),
            stop_tx: Mutex::new(Some(stop_tx)),
            stop_rx,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Register the source tree, start workers and dispatch, then block
    /// until [`stop`](Self::stop) completes
    pub fn start(&self) -> Result<()> {
        {
            let mut state = self.state.lock();
            let (service, streams) = match std::mem::replace(&mut *state, Lifecycle::Stopped) {
                Lifecycle::Idle { service, streams } => (service, streams),
                other => {
                    *state = other;
                    anyhow::bail!("watcher was already started");
                }
            };
            *state = Lifecycle::Running(self.launch(service, streams)?);
        }

        info!(
            source = %self.config.source_root.display(),
            backup = %self.config.backup_root.display(),
            versions = self.config.max_versions,
            workers = self.config.workers,
            "Watching for changes"
        );

        // Returns once stop() drops the sender
        let _ = self.stop_rx.recv();
        Ok(())
    }

    fn launch(&self, service: Arc<dyn WatchService>, streams: WatchStreams) -> Result<Running> {
        let dispatcher = EventDispatcher::new(
            self.config.source_root.clone(),
            Arc::clone(&self.ignore),
            Arc::clone(&self.context),
            Arc::clone(&service),
        );

        let dirs = dispatcher
            .register_tree(&self.config.source_root)
            .context("failed to watch source directory")?;
        info!("Registered {} directories", dirs);

        let pool = WorkerPool::spawn(
            self.config.workers,
            Arc::clone(&self.context),
            Arc::clone(&self.processor),
        )
        .context("failed to start worker pool")?;

        let (dispatcher_shutdown, shutdown_rx) = crossbeam_channel::bounded(0);
        let spawned = thread::Builder::new()
            .name("backwatch-dispatch".to_string())
            .spawn(move || dispatcher.run(streams, shutdown_rx));

        match spawned {
            Ok(dispatcher) => Ok(Running {
                pool,
                dispatcher,
                dispatcher_shutdown,
                service,
            }),
            Err(e) => {
                self.context.queue.close();
                pool.join();
                Err(e).context("failed to start event dispatcher")
            }
        }
    }

    /// Gracefully shut down: close the queue, let workers drain it, stop
    /// dispatch and release the watch service. Blocks until done.
    pub fn stop(&self) {
        let previous = std::mem::replace(&mut *self.state.lock(), Lifecycle::Stopped);
        match previous {
            Lifecycle::Running(running) => {
                info!("Closing watcher, draining {} queued jobs", self.context.queue.len());
                self.context.queue.close();
                running.pool.join();

                drop(running.dispatcher_shutdown);
                if running.dispatcher.join().is_err() {
                    warn!("Event dispatcher exited with a panic");
                }
                drop(running.service);
                info!("Watcher stopped");
            }
            Lifecycle::Idle { .. } => {
                self.context.queue.close();
            }
            Lifecycle::Stopped => {}
        }

        self.stop_tx.lock().take();
    }

    /// Snapshot of runtime counters
    pub fn stats(&self) -> WatcherStats {
        self.context.stats()
    }
}

/// Validate the configuration and resolve both roots to canonical paths so
/// event paths from the OS strip cleanly against them
fn prepare(mut config: Config) -> Result<Config> {
    config.validate()?;
    std::fs::create_dir_all(&config.backup_root).with_context(|| {
        format!(
            "failed to create backup directory {}",
            config.backup_root.display()
        )
    })?;
    config.source_root = config
        .source_root
        .canonicalize()
        .with_context(|| format!("cannot resolve {}", config.source_root.display()))?;
    config.backup_root = config
        .backup_root
        .canonicalize()
        .with_context(|| format!("cannot resolve {}", config.backup_root.display()))?;
    Ok(config)
}
