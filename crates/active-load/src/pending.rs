//! Deduplicating admission queue for files awaiting load.

use std::collections::{HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};

/// A file admitted for loading but not yet picked up by a worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingEntry {
    pub path: PathBuf,
    pub generated_by_external_source: bool,
}

#[derive(Default)]
struct QueueState {
    pending: VecDeque<PendingEntry>,
    pending_paths: HashSet<PathBuf>,
    in_flight: HashSet<PathBuf>,
}

/// FIFO of pending files plus the set of files currently being loaded.
///
/// A path is in at most one of the two at any time. All transitions happen
/// under one mutex; the pending length is mirrored in an atomic so
/// [`PendingQueue::size`] never waits on the lock.
#[derive(Default)]
pub struct PendingQueue {
    state: Mutex<QueueState>,
    pending_len: AtomicUsize,
}

impl PendingQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        // State is only mutated through the small sections below, none of which panic midway.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Admit a file. Returns `false` without touching state if the path is
    /// already pending or being loaded.
    pub fn enqueue(&self, path: impl Into<PathBuf>, generated_by_external_source: bool) -> bool {
        let path = path.into();
        let mut state = self.lock();
        if state.pending_paths.contains(&path) || state.in_flight.contains(&path) {
            return false;
        }
        state.pending_paths.insert(path.clone());
        state.pending.push_back(PendingEntry {
            path,
            generated_by_external_source,
        });
        self.pending_len.store(state.pending.len(), Ordering::Release);
        true
    }

    /// Pop the oldest pending file and mark it in flight.
    pub fn dequeue(&self) -> Option<PendingEntry> {
        let mut state = self.lock();
        let entry = state.pending.pop_front()?;
        state.pending_paths.remove(&entry.path);
        state.in_flight.insert(entry.path.clone());
        self.pending_len.store(state.pending.len(), Ordering::Release);
        Some(entry)
    }

    /// Release the in-flight marker. A no-op for unknown paths.
    pub fn complete_in_flight(&self, path: &Path) {
        self.lock().in_flight.remove(path);
    }

    /// Number of pending (not in-flight) files.
    pub fn size(&self) -> usize {
        self.pending_len.load(Ordering::Acquire)
    }

    pub fn in_flight_count(&self) -> usize {
        self.lock().in_flight.len()
    }

    pub fn is_pending(&self, path: &Path) -> bool {
        self.lock().pending_paths.contains(path)
    }

    pub fn is_in_flight(&self, path: &Path) -> bool {
        self.lock().in_flight.contains(path)
    }
}
