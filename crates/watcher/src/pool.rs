//! Backup worker pool
//!
//! A fixed number of threads drain the [`JobQueue`]. Each job's result is
//! captured as a [`JobOutcome`]; failures are logged and the worker moves
//! on. A panic inside one job is caught at the job boundary so it cannot
//! take the worker down with it.

use crate::context::WatchContext;
use crate::BackupJob;
use backwatch_core::{BackupError, Sleeper, ThreadSleeper, VersionStore};
use std::any::Any;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, error, warn};

/// Executes a single backup job
pub trait JobProcessor: Send + Sync + 'static {
    fn process(&self, job: &BackupJob) -> Result<(), BackupError>;
}

/// Processor that writes a new version through a [`VersionStore`]
pub struct BackupProcessor<S: Sleeper = ThreadSleeper> {
    store: VersionStore<S>,
    source_root: PathBuf,
}

impl<S: Sleeper> BackupProcessor<S> {
    pub fn new(store: VersionStore<S>, source_root: PathBuf) -> Self {
        Self { store, source_root }
    }
}

impl<S: Sleeper + 'static> JobProcessor for BackupProcessor<S> {
    fn process(&self, job: &BackupJob) -> Result<(), BackupError> {
        let report = self.store.create_backup(&job.path, &self.source_root)?;
        if !report.evicted.is_empty() {
            debug!(
                "Evicted {} old versions of {}",
                report.evicted.len(),
                job.path.display()
            );
        }
        Ok(())
    }
}

/// Captured result of one job
#[derive(Debug)]
pub enum JobOutcome {
    Completed,
    Failed(BackupError),
    Panicked(String),
}

/// Run `job` through `processor`, converting a panic into
/// [`JobOutcome::Panicked`]
pub fn run_job(processor: &dyn JobProcessor, job: &BackupJob) -> JobOutcome {
    match panic::catch_unwind(AssertUnwindSafe(|| processor.process(job))) {
        Ok(Ok(())) => JobOutcome::Completed,
        Ok(Err(err)) => JobOutcome::Failed(err),
        Err(payload) => JobOutcome::Panicked(panic_message(payload.as_ref())),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        msg.to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// Fixed set of threads consuming the job queue
pub struct WorkerPool {
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawn `size` workers draining `context.queue`
    pub fn spawn(
        size: usize,
        context: Arc<WatchContext>,
        processor: Arc<dyn JobProcessor>,
    ) -> io::Result<Self> {
        let mut workers = Vec::with_capacity(size);

        for id in 1..=size {
            let worker_context = Arc::clone(&context);
            let processor = Arc::clone(&processor);
            // Count before spawning so stats never under-report a starting worker
            context.worker_started();
            let spawned = thread::Builder::new()
                .name(format!("backwatch-worker-{id}"))
                .spawn(move || worker_loop(id, &worker_context, processor.as_ref()));

            match spawned {
                Ok(handle) => workers.push(handle),
                Err(e) => {
                    context.worker_exited();
                    // Already running workers exit once the caller closes the queue
                    return Err(e);
                }
            }
        }

        Ok(Self { workers })
    }

    pub fn size(&self) -> usize {
        self.workers.len()
    }

    /// Wait for every worker to exit. Workers only exit after the queue has
    /// been closed and drained, so close it first.
    pub fn join(self) {
        for handle in self.workers {
            let name = handle.thread().name().unwrap_or("worker").to_string();
            if handle.join().is_err() {
                error!("{} terminated abnormally", name);
            }
        }
    }
}

/// Decrements the live-worker count however the loop ends
struct LiveGuard<'a>(&'a WatchContext);

impl Drop for LiveGuard<'_> {
    fn drop(&mut self) {
        self.0.worker_exited();
    }
}

fn worker_loop(id: usize, context: &WatchContext, processor: &dyn JobProcessor) {
    let _live = LiveGuard(context);

    while let Some(job) = context.queue.dequeue() {
        debug!("Worker #{} -> {} [{}]", id, job.path.display(), job.kind);

        match run_job(processor, &job) {
            JobOutcome::Completed => {}
            JobOutcome::Failed(err) if err.is_not_found() => {
                warn!("Worker #{}: skipped {}: {}", id, job.path.display(), err);
            }
            JobOutcome::Failed(err) => {
                error!("Worker #{}: backup of {} failed: {}", id, job.path.display(), err);
            }
            JobOutcome::Panicked(msg) => {
                error!("PANIC in Worker #{} while backing up {}: {}", id, job.path.display(), msg);
            }
        }
    }

    debug!("Worker #{} exiting", id);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Enqueue, JobKind};
    use crossbeam_channel::{Receiver, Sender};
    use parking_lot::Mutex;
    use std::time::Duration;

    /// Records processed paths; panics on "panic" and fails on "fail"
    #[derive(Default)]
    struct Recorder(Mutex<Vec<PathBuf>>);

    impl JobProcessor for Recorder {
        fn process(&self, job: &BackupJob) -> Result<(), BackupError> {
            let name = job.path.file_name().unwrap().to_string_lossy().into_owned();
            if name == "panic" {
                panic!("corrupted job");
            }
            self.0.lock().push(job.path.clone());
            if name == "fail" {
                return Err(BackupError::NotAFile {
                    path: job.path.clone(),
                });
            }
            Ok(())
        }
    }

    /// Blocks every job until the gate is opened (sender dropped)
    struct Gated {
        entered: Sender<()>,
        gate: Receiver<()>,
    }

    impl JobProcessor for Gated {
        fn process(&self, _job: &BackupJob) -> Result<(), BackupError> {
            let _ = self.entered.send(());
            let _ = self.gate.recv();
            Ok(())
        }
    }

    fn job(name: &str) -> BackupJob {
        BackupJob::new(PathBuf::from(format!("/src/{name}")), JobKind::Modified)
    }

    #[test]
    fn test_pool_drains_queue_on_close() {
        let context = Arc::new(WatchContext::new(Duration::ZERO, 16));
        let recorder = Arc::new(Recorder::default());
        for i in 0..10 {
            assert!(context.queue.try_enqueue(job(&format!("f{i}"))).is_queued());
        }

        let pool = WorkerPool::spawn(3, Arc::clone(&context), recorder.clone()).unwrap();
        assert_eq!(pool.size(), 3);
        context.queue.close();
        pool.join();

        assert_eq!(recorder.0.lock().len(), 10);
        assert_eq!(context.active_workers(), 0);
    }

    #[test]
    fn test_failures_and_panics_do_not_stop_workers() {
        let context = Arc::new(WatchContext::new(Duration::ZERO, 16));
        let recorder = Arc::new(Recorder::default());
        for name in ["a", "panic", "fail", "b", "panic", "c"] {
            context.queue.try_enqueue(job(name));
        }

        // a single worker must survive everything in sequence
        let pool = WorkerPool::spawn(1, Arc::clone(&context), recorder.clone()).unwrap();
        context.queue.close();
        pool.join();

        let processed: Vec<_> = recorder
            .0
            .lock()
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(processed, vec!["a", "fail", "b", "c"]);
    }

    #[test]
    fn test_run_job_captures_outcomes() {
        let recorder = Recorder::default();
        assert!(matches!(run_job(&recorder, &job("ok")), JobOutcome::Completed));
        assert!(matches!(run_job(&recorder, &job("fail")), JobOutcome::Failed(_)));
        match run_job(&recorder, &job("panic")) {
            JobOutcome::Panicked(msg) => assert_eq!(msg, "corrupted job"),
            other => panic!("expected panic outcome, got {other:?}"),
        }
    }

    #[test]
    fn test_overflow_with_blocked_workers() {
        let capacity = 5;
        let workers = 2;
        let context = Arc::new(WatchContext::new(Duration::ZERO, capacity));
        let (entered_tx, entered_rx) = crossbeam_channel::unbounded();
        let (gate_tx, gate_rx) = crossbeam_channel::bounded::<()>(0);
        let processor = Arc::new(Gated {
            entered: entered_tx,
            gate: gate_rx,
        });

        let pool = WorkerPool::spawn(workers, Arc::clone(&context), processor).unwrap();

        // occupy every worker
        for i in 0..workers {
            assert!(context.queue.try_enqueue(job(&format!("busy{i}"))).is_queued());
        }
        for _ in 0..workers {
            entered_rx.recv_timeout(Duration::from_secs(5)).unwrap();
        }

        let mut queued = 0;
        let mut dropped = 0;
        for i in 0..capacity * 3 {
            match context.queue.try_enqueue(job(&format!("extra{i}"))) {
                Enqueue::Queued => queued += 1,
                Enqueue::Full(_) => dropped += 1,
                Enqueue::Closed(_) => panic!("queue closed unexpectedly"),
            }
        }
        assert_eq!(queued, capacity);
        assert_eq!(dropped, capacity * 2);
        assert_eq!(context.queue.len(), capacity);

        context.queue.close();
        drop(gate_tx);
        pool.join();
        assert!(context.queue.is_empty());
    }
}
