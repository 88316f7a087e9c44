//! Wait-free snapshot cell for coordinator state.
//!
//! One writer (the coordinator loop) publishes immutable snapshots through
//! an atomic pointer swap; any number of readers load without locks.
//! Superseded snapshots are retired and reclaimed only after a grace
//! period, which is what makes the readers' load-then-pin window sound.

use std::sync::atomic::{AtomicPtr, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

/// Single-writer, wait-free-reader cell holding an `Arc<T>` snapshot.
pub struct SnapshotCell<T> {
    /// Raw pointer obtained from `Arc::into_raw`; never null.
    current: AtomicPtr<T>,
    /// Superseded snapshots awaiting reclamation: `(ptr, retired_at_ns)`.
    retired: Mutex<Vec<(*const T, u64)>>,
    grace_ns: u64,
}

// SAFETY: T is only shared immutably; the writer/retire protocol is
// documented on each method.
unsafe impl<T: Send + Sync> Send for SnapshotCell<T> {}
unsafe impl<T: Send + Sync> Sync for SnapshotCell<T> {}

impl<T> SnapshotCell<T> {
    /// Cell holding `initial`; retired snapshots live at least `grace_ns`.
    pub fn new(initial: T, grace_ns: u64) -> Self {
        let ptr = Arc::into_raw(Arc::new(initial)).cast_mut();
        Self {
            current: AtomicPtr::new(ptr),
            retired: Mutex::new(Vec::new()),
            grace_ns,
        }
    }

    /// Wait-free load of the current snapshot.
    pub fn load(&self) -> Arc<T> {
        let ptr = self.current.load(Ordering::Acquire);
        // SAFETY: `ptr` came from Arc::into_raw and is kept alive by the
        // cell (as current, or on the retired list for at least grace_ns
        // after being swapped out). Readers pin it by bumping the strong
        // count before materializing their own Arc; the grace period
        // guarantees the count is still nonzero here.
        unsafe {
            Arc::increment_strong_count(ptr);
            Arc::from_raw(ptr)
        }
    }

    /// Publish a new snapshot (single writer), retiring the old one.
    pub fn publish(&self, next: T, now_ns: u64) {
        let next_ptr = Arc::into_raw(Arc::new(next)).cast_mut();
        let old = self.current.swap(next_ptr, Ordering::AcqRel);
        let mut retired = self.retired.lock().unwrap_or_else(PoisonError::into_inner);
        retired.push((old.cast_const(), now_ns));
    }

    /// Reclaim snapshots retired longer than the grace period ago.
    /// Called from the writer's housekeeping tick.
    pub fn reclaim(&self, now_ns: u64) -> usize {
        let mut retired = self.retired.lock().unwrap_or_else(PoisonError::into_inner);
        let before = retired.len();
        retired.retain(|(ptr, retired_at)| {
            if now_ns.saturating_sub(*retired_at) >= self.grace_ns {
                // SAFETY: swapped out of `current` at least grace_ns ago;
                // every reader that loaded it has since pinned its own
                // reference, so dropping the cell's reference is safe.
                unsafe {
                    drop(Arc::from_raw(*ptr));
                }
                false
            } else {
                true
            }
        });
        before - retired.len()
    }
}

impl<T> Drop for SnapshotCell<T> {
    fn drop(&mut self) {
        // SAFETY: exclusive access; reclaim the current and every retired
        // snapshot exactly once.
        unsafe {
            drop(Arc::from_raw(self.current.load(Ordering::Relaxed).cast_const()));
        }
        let retired = self.retired.get_mut().unwrap_or_else(PoisonError::into_inner);
        for (ptr, _) in retired.drain(..) {
            // SAFETY: as above.
            unsafe {
                drop(Arc::from_raw(ptr));
            }
        }
    }
}
