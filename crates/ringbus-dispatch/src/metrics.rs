use std::sync::atomic::{AtomicU64, Ordering};

/// Dispatcher counters, always-on and relaxed.
#[derive(Debug, Default)]
pub struct DispatchMetrics {
    /// Items run to completion.
    pub tasks_executed: AtomicU64,
    /// Items whose closure panicked (caught and isolated).
    pub tasks_failed: AtomicU64,
    /// Items taken from another worker's deque.
    pub tasks_stolen: AtomicU64,
    /// Items that overflowed their target worker onto a sibling.
    pub tasks_spilled: AtomicU64,
    /// Items released unexecuted by a forced abort.
    pub tasks_aborted: AtomicU64,
}

impl DispatchMetrics {
    #[inline]
    pub(crate) fn add_executed(&self) {
        self.tasks_executed.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn add_failed(&self) {
        self.tasks_failed.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn add_stolen(&self) {
        self.tasks_stolen.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn add_spilled(&self) {
        self.tasks_spilled.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn add_aborted(&self, n: u64) {
        self.tasks_aborted.fetch_add(n, Ordering::Relaxed);
    }

    /// Point-in-time copy.
    pub fn snapshot(&self) -> DispatchSnapshot {
        DispatchSnapshot {
            tasks_executed: self.tasks_executed.load(Ordering::Relaxed),
            tasks_failed: self.tasks_failed.load(Ordering::Relaxed),
            tasks_stolen: self.tasks_stolen.load(Ordering::Relaxed),
            tasks_spilled: self.tasks_spilled.load(Ordering::Relaxed),
            tasks_aborted: self.tasks_aborted.load(Ordering::Relaxed),
        }
    }
}

/// Plain copy of [`DispatchMetrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchSnapshot {
    pub tasks_executed: u64,
    pub tasks_failed: u64,
    pub tasks_stolen: u64,
    pub tasks_spilled: u64,
    pub tasks_aborted: u64,
}
