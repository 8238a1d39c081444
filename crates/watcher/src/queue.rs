//! Bounded backup job queue
//!
//! Producers never block: a full queue rejects the job and the caller logs
//! the drop. Closing the queue drops the only sender, so consumers drain
//! what is left and then see the end of the stream.

use crate::BackupJob;
use crossbeam_channel::{Receiver, Sender, TrySendError};
use parking_lot::Mutex;

/// Result of a non-blocking enqueue
#[derive(Debug)]
pub enum Enqueue {
    Queued,
    /// Queue at capacity; the job is handed back
    Full(BackupJob),
    /// Queue closed for shutdown; the job is handed back
    Closed(BackupJob),
}

impl Enqueue {
    pub fn is_queued(&self) -> bool {
        matches!(self, Enqueue::Queued)
    }
}

/// Fixed-capacity FIFO of pending backup jobs
pub struct JobQueue {
    sender: Mutex<Option<Sender<BackupJob>>>,
    receiver: Receiver<BackupJob>,
    capacity: usize,
}

impl JobQueue {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (sender, receiver) = crossbeam_channel::bounded(capacity);
        Self {
            sender: Mutex::new(Some(sender)),
            receiver,
            capacity,
        }
    }

    /// Enqueue without blocking
    pub fn try_enqueue(&self, job: BackupJob) -> Enqueue {
        let guard = self.sender.lock();
        let Some(sender) = guard.as_ref() else {
            return Enqueue::Closed(job);
        };
        match sender.try_send(job) {
            Ok(()) => Enqueue::Queued,
            Err(TrySendError::Full(job)) => Enqueue::Full(job),
            Err(TrySendError::Disconnected(job)) => Enqueue::Closed(job),
        }
    }

    /// Wait for the next job. Returns `None` once the queue is closed and
    /// drained.
    pub fn dequeue(&self) -> Option<BackupJob> {
        self.receiver.recv().ok()
    }

    /// Stop accepting jobs. Returns false if already closed.
    pub fn close(&self) -> bool {
        self.sender.lock().take().is_some()
    }

    pub fn is_closed(&self) -> bool {
        self.sender.lock().is_none()
    }

    pub fn len(&self) -> usize {
        self.receiver.len()
    }

    pub fn is_empty(&self) -> bool {
        self.receiver.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
