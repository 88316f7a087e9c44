use crate::error::DispatchError;
use crate::hooks::{CoreType, HostHooks};
use crate::metrics::DispatchSnapshot;
use crate::task::WorkItem;
use crate::worker::{worker_loop, CircuitBreaker, Shared, WorkerClass};
use crate::StealDeque;
use ringbus::Priority;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread::JoinHandle;

/// Worker pool sizing and behavior.
#[derive(Debug, Clone, Copy)]
pub struct DispatcherConfig {
    /// Performance-class workers (CRITICAL/HIGH).
    pub p_workers: usize,
    /// Efficiency-class workers (NORMAL and below).
    pub e_workers: usize,
    /// Per-worker deque capacity (power of two).
    pub queue_capacity: usize,
    /// Per-worker submission inbox capacity.
    pub inbox_capacity: usize,
    /// Randomized steal sweeps before a worker parks.
    pub steal_rounds: usize,
    /// Pin workers to CPUs reported by the host hooks.
    pub pin_threads: bool,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            p_workers: 2,
            e_workers: 2,
            queue_capacity: 1 << 10,
            inbox_capacity: 1 << 10,
            steal_rounds: 4,
            pin_threads: false,
        }
    }
}

/// Work-stealing dispatcher with an asymmetric worker pool.
///
/// The pool is partitioned at construction: performance-class workers run
/// CRITICAL/HIGH work, efficiency-class workers everything else. Work is
/// assigned by correlation id so related items share a worker; overflow
/// spills within the class, never across it.
pub struct Dispatcher {
    shared: Arc<Shared>,
    handles: Vec<JoinHandle<()>>,
}

impl Dispatcher {
    /// Spawn the worker pool.
    pub fn new(config: DispatcherConfig, hooks: Arc<dyn HostHooks>) -> Self {
        Self::with_circuit_breaker(config, hooks, None)
    }

    /// Spawn the worker pool with a panic circuit-breaker callback.
    pub fn with_circuit_breaker(
        config: DispatcherConfig,
        hooks: Arc<dyn HostHooks>,
        breaker: Option<CircuitBreaker>,
    ) -> Self {
        let total = config.p_workers + config.e_workers;
        assert!(total > 0, "dispatcher needs at least one worker");

        let mut classes = Vec::with_capacity(total);
        classes.extend(std::iter::repeat(WorkerClass::Performance).take(config.p_workers));
        classes.extend(std::iter::repeat(WorkerClass::Efficiency).take(config.e_workers));

        let shared = Arc::new(Shared {
            deques: (0..total).map(|_| StealDeque::new(config.queue_capacity)).collect(),
            inboxes: (0..total).map(|_| Mutex::new(VecDeque::new())).collect(),
            p_members: (0..config.p_workers).collect(),
            e_members: (config.p_workers..total).collect(),
            classes,
            running: AtomicBool::new(true),
            force_abort: AtomicBool::new(false),
            idle_lock: Mutex::new(()),
            idle_cv: Condvar::new(),
            hooks,
            metrics: crate::metrics::DispatchMetrics::default(),
            panic_counts: Mutex::new(HashMap::new()),
            breaker,
            steal_rounds: config.steal_rounds.max(1),
            inbox_capacity: config.inbox_capacity,
        });

        let cpu_plan = plan_affinity(&shared, config);
        let handles = (0..total)
            .map(|i| {
                let shared = Arc::clone(&shared);
                let cpu = cpu_plan[i];
                let name = format!("rbd-{}{}", shared.classes[i].label().to_lowercase(), i);
                std::thread::Builder::new()
                    .name(name)
                    .spawn(move || worker_loop(&shared, i, cpu))
                    .expect("spawn worker thread")
            })
            .collect();

        Self { shared, handles }
    }

    /// Submit a closure at `priority`, grouped by `correlation_id`.
    pub fn submit<F>(&self, priority: Priority, correlation_id: u32, task: F) -> Result<(), DispatchError>
    where
        F: FnOnce() + Send + 'static,
    {
        let item = WorkItem::new(priority, correlation_id, self.shared.hooks.now_ns(), task);
        self.submit_item(item)
    }

    /// Submit a prebuilt [`WorkItem`].
    pub fn submit_item(&self, item: WorkItem) -> Result<(), DispatchError> {
        if !self.shared.running.load(Ordering::Acquire) {
            return Err(DispatchError::ShuttingDown);
        }

        let class = if item.priority.is_latency_critical() {
            WorkerClass::Performance
        } else {
            WorkerClass::Efficiency
        };
        let members = self.shared.class_members(class);
        if members.is_empty() {
            return Err(DispatchError::NoWorkers { class: class.label() });
        }

        // Fibonacci hash keeps adjacent correlation ids off one worker.
        let hash = (u64::from(item.correlation_id)).wrapping_mul(0x9E37_79B9_7F4A_7C15);
        let home = (hash >> 32) as usize % members.len();

        // Target worker first, then spill around the class ring.
        let mut item = Some(item);
        for (attempt, slot) in (0..members.len()).map(|k| (k, members[(home + k) % members.len()])) {
            let mut inbox = self.shared.inboxes[slot]
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            if inbox.len() < self.shared.inbox_capacity {
                if let Some(item) = item.take() {
                    inbox.push_back(item);
                }
                drop(inbox);
                if attempt > 0 {
                    self.shared.metrics.add_spilled();
                }
                self.notify_one();
                return Ok(());
            }
        }

        Err(DispatchError::QueueFull { class: class.label() })
    }

    fn notify_one(&self) {
        let _guard = self
            .shared
            .idle_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        self.shared.idle_cv.notify_one();
    }

    /// Counter snapshot.
    pub fn metrics(&self) -> DispatchSnapshot {
        self.shared.metrics.snapshot()
    }

    /// Worker count per class: `(performance, efficiency)`.
    pub fn worker_counts(&self) -> (usize, usize) {
        (self.shared.p_members.len(), self.shared.e_members.len())
    }

    /// True until shutdown begins.
    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }

    /// Graceful shutdown: workers drain their queues, then exit.
    pub fn shutdown(mut self) -> DispatchSnapshot {
        self.stop(false);
        self.join_all();
        self.shared.metrics.snapshot()
    }

    /// Forced shutdown: pending items are released without execution.
    pub fn abort(mut self) -> DispatchSnapshot {
        self.stop(true);
        self.join_all();
        self.shared.metrics.snapshot()
    }

    fn stop(&self, force: bool) {
        if force {
            self.shared.force_abort.store(true, Ordering::Release);
        }
        self.shared.running.store(false, Ordering::Release);
        self.shared.wake_all();
    }

    fn join_all(&mut self) {
        for handle in self.handles.drain(..) {
            let _ = handle.join();
        }
        // A submit that raced the shutdown flag may have landed in an
        // inbox after its worker drained; account for those items.
        let mut leftovers = 0u64;
        for inbox in &self.shared.inboxes {
            let mut inbox = inbox.lock().unwrap_or_else(PoisonError::into_inner);
            leftovers += inbox.len() as u64;
            inbox.clear();
        }
        if leftovers > 0 {
            self.shared.metrics.add_aborted(leftovers);
        }
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        if !self.handles.is_empty() {
            self.stop(false);
            self.join_all();
        }
    }
}

/// Choose a CPU per worker from the host topology.
///
/// Performance workers take the cores the host reports as performance
/// class; efficiency workers take the efficiency cores. With an unknown
/// topology the pool is partitioned by index. Workers beyond the
/// available CPUs run unpinned.
fn plan_affinity(shared: &Shared, config: DispatcherConfig) -> Vec<Option<usize>> {
    let total = config.p_workers + config.e_workers;
    if !config.pin_threads {
        return vec![None; total];
    }

    let cpus = shared.hooks.available_cpus();
    let mut perf: Vec<usize> = Vec::new();
    let mut eff: Vec<usize> = Vec::new();
    let mut unknown: Vec<usize> = Vec::new();
    for cpu in cpus {
        match shared.hooks.core_type(cpu) {
            CoreType::Performance => perf.push(cpu),
            CoreType::Efficiency => eff.push(cpu),
            CoreType::Unknown => unknown.push(cpu),
        }
    }
    // Unknown topology: hand the first unclassified CPUs to the
    // performance pool, the rest to efficiency.
    let mut spare = unknown.into_iter();
    while perf.len() < config.p_workers {
        match spare.next() {
            Some(cpu) => perf.push(cpu),
            None => break,
        }
    }
    while eff.len() < config.e_workers {
        match spare.next() {
            Some(cpu) => eff.push(cpu),
            None => break,
        }
    }

    (0..total)
        .map(|i| {
            if i < config.p_workers {
                perf.get(i).copied()
            } else {
                eff.get(i - config.p_workers).copied()
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hooks::SystemHooks;
    use std::sync::atomic::AtomicUsize;

    fn dispatcher() -> Dispatcher {
        Dispatcher::new(DispatcherConfig::default(), Arc::new(SystemHooks::with_seed(1)))
    }

    #[test]
    fn test_submit_and_execute() {
        let d = dispatcher();
        let ran = Arc::new(AtomicUsize::new(0));
        for i in 0..100 {
            let ran = Arc::clone(&ran);
            d.submit(Priority::Normal, i, move || {
                ran.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
        }
        let snap = d.shutdown();
        assert_eq!(ran.load(Ordering::SeqCst), 100);
        assert_eq!(snap.tasks_executed, 100);
    }

    #[test]
    fn test_submit_after_shutdown_rejected() {
        let d = dispatcher();
        let shared = Arc::clone(&d.shared);
        let _ = d.shutdown();

        let item = WorkItem::new(Priority::Normal, 1, 0, || {});
        let revived = Dispatcher {
            shared,
            handles: Vec::new(),
        };
        assert!(matches!(
            revived.submit_item(item),
            Err(DispatchError::ShuttingDown)
        ));
    }

    #[test]
    fn test_no_workers_for_class() {
        let config = DispatcherConfig {
            p_workers: 0,
            e_workers: 1,
            ..DispatcherConfig::default()
        };
        let d = Dispatcher::new(config, Arc::new(SystemHooks::with_seed(1)));
        assert!(matches!(
            d.submit(Priority::Critical, 1, || {}),
            Err(DispatchError::NoWorkers { class: "P" })
        ));
    }
}
