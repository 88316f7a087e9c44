//! Worker threads: local LIFO, class-confined stealing, panic isolation.

use crate::deque::{Steal, StealDeque};
use crate::hooks::{pin_current_thread, HostHooks};
use crate::metrics::DispatchMetrics;
use crate::task::WorkItem;
use std::collections::{HashMap, VecDeque};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::Duration;

/// Worker class, fixed at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerClass {
    /// Pinned to performance cores; runs CRITICAL/HIGH work.
    Performance,
    /// Pinned to efficiency cores; runs NORMAL and below.
    Efficiency,
}

impl WorkerClass {
    pub(crate) fn label(self) -> &'static str {
        match self {
            WorkerClass::Performance => "P",
            WorkerClass::Efficiency => "E",
        }
    }
}

/// Callback fired when one correlation id panics more than
/// [`PANIC_BREAKER_LIMIT`] times.
pub type CircuitBreaker = Arc<dyn Fn(u32) + Send + Sync>;

/// Panics tolerated per correlation id before the breaker fires.
pub const PANIC_BREAKER_LIMIT: u32 = 3;

/// State shared by every worker and the submitting side.
pub(crate) struct Shared {
    /// One steal deque per worker; only worker `i` touches the bottom of
    /// `deques[i]`.
    pub deques: Vec<StealDeque<WorkItem>>,
    /// Submission inboxes; the owning worker moves them onto its deque.
    pub inboxes: Vec<Mutex<VecDeque<WorkItem>>>,
    pub classes: Vec<WorkerClass>,
    /// Worker indices by class, for spill and steal candidates.
    pub p_members: Vec<usize>,
    pub e_members: Vec<usize>,
    pub running: AtomicBool,
    pub force_abort: AtomicBool,
    pub idle_lock: Mutex<()>,
    pub idle_cv: Condvar,
    pub hooks: Arc<dyn HostHooks>,
    pub metrics: DispatchMetrics,
    pub panic_counts: Mutex<HashMap<u32, u32>>,
    pub breaker: Option<CircuitBreaker>,
    pub steal_rounds: usize,
    pub inbox_capacity: usize,
}

impl Shared {
    pub(crate) fn class_members(&self, class: WorkerClass) -> &[usize] {
        match class {
            WorkerClass::Performance => &self.p_members,
            WorkerClass::Efficiency => &self.e_members,
        }
    }

    /// Wake every parked worker (shutdown posts one wake per worker).
    pub(crate) fn wake_all(&self) {
        let _guard = self.idle_lock.lock().unwrap_or_else(PoisonError::into_inner);
        self.idle_cv.notify_all();
    }
}

/// Body of one worker thread.
pub(crate) fn worker_loop(shared: &Arc<Shared>, me: usize, cpu: Option<usize>) {
    if let Some(cpu) = cpu {
        if let Err(e) = pin_current_thread(cpu) {
            tracing::warn!(worker = me, cpu, error = %e, "core affinity failed, running unpinned");
        }
    }

    loop {
        drain_inbox(shared, me);

        if let Some(item) = shared.deques[me].pop() {
            execute(shared, item);
            continue;
        }

        if let Some(item) = try_steal(shared, me) {
            shared.metrics.add_stolen();
            execute(shared, item);
            continue;
        }

        if !shared.running.load(Ordering::Acquire) {
            if shared.force_abort.load(Ordering::Acquire) {
                release_pending(shared, me);
                return;
            }
            // Graceful shutdown: leave once nothing local remains.
            let inbox_empty = shared.inboxes[me]
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .is_empty();
            if inbox_empty && shared.deques[me].is_empty() {
                return;
            }
            continue;
        }

        // Nothing local, nothing stealable: park until an enqueue wakes us.
        let guard = shared.idle_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let _ = shared
            .idle_cv
            .wait_timeout(guard, Duration::from_millis(1))
            .unwrap_or_else(PoisonError::into_inner);
    }
}

/// Move submitted items onto the worker's own deque.
fn drain_inbox(shared: &Shared, me: usize) {
    let mut inbox = shared.inboxes[me].lock().unwrap_or_else(PoisonError::into_inner);
    while let Some(item) = inbox.pop_front() {
        if let Err(item) = shared.deques[me].push(item) {
            inbox.push_front(item);
            break;
        }
    }
}

/// One randomized sweep over same-class victims per round, up to the
/// configured number of rounds. The class boundary is load-bearing:
/// CRITICAL/HIGH work must never migrate onto an efficiency worker.
fn try_steal(shared: &Shared, me: usize) -> Option<WorkItem> {
    let members = shared.class_members(shared.classes[me]);
    if members.len() <= 1 {
        return None;
    }

    for _ in 0..shared.steal_rounds {
        let start = (shared.hooks.random_u64() as usize) % members.len();
        for step in 0..members.len() {
            let victim = members[(start + step) % members.len()];
            if victim == me {
                continue;
            }
            loop {
                match shared.deques[victim].steal() {
                    Steal::Taken(item) => return Some(item),
                    Steal::Retry => continue,
                    Steal::Empty => break,
                }
            }
        }
        std::thread::yield_now();
    }
    None
}

/// Run one item, isolating panics and feeding the circuit breaker.
fn execute(shared: &Shared, item: WorkItem) {
    let correlation_id = item.correlation_id;
    match catch_unwind(AssertUnwindSafe(move || item.run())) {
        Ok(()) => shared.metrics.add_executed(),
        Err(_) => {
            shared.metrics.add_failed();
            tracing::error!(correlation_id, "task panicked; worker continues");

            let count = {
                let mut counts = shared
                    .panic_counts
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner);
                let count = counts.entry(correlation_id).or_insert(0);
                *count += 1;
                *count
            };
            if count > PANIC_BREAKER_LIMIT {
                if let Some(breaker) = &shared.breaker {
                    breaker(correlation_id);
                }
            }
        }
    }
}

/// Forced abort: pending items are dropped, not run.
fn release_pending(shared: &Shared, me: usize) {
    let mut dropped = 0u64;
    while shared.deques[me].pop().is_some() {
        dropped += 1;
    }
    let mut inbox = shared.inboxes[me].lock().unwrap_or_else(PoisonError::into_inner);
    dropped += inbox.len() as u64;
    inbox.clear();
    if dropped > 0 {
        shared.metrics.add_aborted(dropped);
        tracing::debug!(worker = me, dropped, "forced abort released pending items");
    }
}
