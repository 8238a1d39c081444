//! Shared state of one watcher instance
//!
//! The debounce map and the job queue are the only structures mutated from
//! several threads. They live here, owned by the orchestrator and handed to
//! the dispatcher and the worker pool behind an `Arc`.

use crate::debounce::DebounceTracker;
use crate::queue::JobQueue;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// State shared between dispatcher, workers and the orchestrator
pub struct WatchContext {
    pub debounce: DebounceTracker,
    pub queue: JobQueue,
    active_workers: AtomicUsize,
}

impl WatchContext {
    pub fn new(min_interval: Duration, queue_capacity: usize) -> Self {
        Self {
            debounce: DebounceTracker::new(min_interval),
            queue: JobQueue::new(queue_capacity),
            active_workers: AtomicUsize::new(0),
        }
    }

    /// Number of worker threads currently alive
    pub fn active_workers(&self) -> usize {
        self.active_workers.load(Ordering::SeqCst)
    }

    pub(crate) fn worker_started(&self) {
        self.active_workers.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn worker_exited(&self) {
        self.active_workers.fetch_sub(1, Ordering::SeqCst);
    }

    pub fn stats(&self) -> WatcherStats {
        WatcherStats {
            tracked_paths: self.debounce.tracked_paths(),
            queue_len: self.queue.len(),
            queue_capacity: self.queue.capacity(),
            active_workers: self.active_workers(),
        }
    }
}

/// Point-in-time counters for periodic reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatcherStats {
    /// Distinct paths that have been admitted at least once
    pub tracked_paths: usize,
    /// Jobs waiting in the queue
    pub queue_len: usize,
    /// Maximum number of waiting jobs
    pub queue_capacity: usize,
    /// Live worker threads
    pub active_workers: usize,
}
