//! Per-path debouncing logic
//!
//! Prevents backing up the same file more often than once per
//! `min_interval`. The check and the timestamp update for a path happen
//! under that path's map entry lock, so two concurrent callers can never
//! both be admitted inside one window.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

/// Result of an admission check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Admitted; the last-backup time is now `now`
    Admitted,
    /// Inside the cooldown window; `elapsed` since the last backup
    Suppressed { elapsed: Duration },
    /// Outside the window, but the commit callback declined
    Declined,
}

impl Admission {
    pub fn is_admitted(&self) -> bool {
        matches!(self, Admission::Admitted)
    }
}

/// Tracks when each path was last admitted for backup
pub struct DebounceTracker {
    min_interval: Duration,
    last_backup: DashMap<PathBuf, Instant>,
}

impl DebounceTracker {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_backup: DashMap::new(),
        }
    }

    /// Admit `path` at `now` unless it was admitted less than
    /// `min_interval` ago. Records `now` on admission.
    pub fn admit(&self, path: &Path, now: Instant) -> bool {
        self.admit_with(path, now, || true).is_admitted()
    }

    /// Like [`admit`](Self::admit), but `now` is only recorded if `commit`
    /// returns true. `commit` runs while the entry is locked and must not
    /// block or call back into the tracker.
    pub fn admit_with<F>(&self, path: &Path, now: Instant, commit: F) -> Admission
    where
        F: FnOnce() -> bool,
    {
        match self.last_backup.entry(path.to_path_buf()) {
            Entry::Occupied(mut entry) => {
                let elapsed = now.saturating_duration_since(*entry.get());
                if elapsed < self.min_interval {
                    return Admission::Suppressed { elapsed };
                }
                if !commit() {
                    return Admission::Declined;
                }
                entry.insert(now);
                Admission::Admitted
            }
            Entry::Vacant(entry) => {
                if !commit() {
                    return Admission::Declined;
                }
                entry.insert(now);
                Admission::Admitted
            }
        }
    }

    /// Last admission time of `path`
    pub fn last_backup(&self, path: &Path) -> Option<Instant> {
        self.last_backup.get(path).map(|entry| *entry.value())
    }

    /// Number of distinct paths ever admitted
    pub fn tracked_paths(&self) -> usize {
        self.last_backup.len()
    }
}
