//! Per-node health record: counters, gauges, availability EMA, hysteresis.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

/// Cluster node identifier, stable for the node's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub u16);

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "node-{}", self.0)
    }
}

/// Bandwidth samples kept for the moving average.
const BANDWIDTH_WINDOW: usize = 16;

/// EMA decay: `s <- 0.95*s + 0.05` on success, `s <- 0.95*s` on failure.
const EMA_DECAY: f64 = 0.95;

/// Health record for one node.
///
/// Every hot field is an atomic with a single logical writer (the monitor
/// that owns request-outcome reporting); selectors read without locks.
/// Floating-point gauges are stored as `f64` bit patterns in `AtomicU64`.
#[repr(align(64))]
pub struct NodeHealth {
    id: NodeId,
    endpoint: String,

    // Request counters
    total_requests: AtomicU64,
    successful_requests: AtomicU64,
    failed_requests: AtomicU64,
    total_response_ns: AtomicU64,
    active_connections: AtomicU32,
    queue_depth: AtomicU32,

    // Utilization gauges, each in [0, 1] (f64 bits)
    cpu_load: AtomicU64,
    memory_load: AtomicU64,
    network_load: AtomicU64,
    messages_per_sec: AtomicU64,

    // Availability EMA in [0, 1] (f64 bits)
    availability: AtomicU64,

    // Hysteresis counters
    consecutive_failures: AtomicU32,
    consecutive_successes: AtomicU32,

    // Bandwidth estimate (bytes/sec), moving average of recent samples
    bandwidth_samples: Mutex<[u64; BANDWIDTH_WINDOW]>,
    bandwidth_count: AtomicU32,

    last_activity_ns: AtomicU64,
}

impl NodeHealth {
    pub fn new(id: NodeId, endpoint: String, now_ns: u64) -> Self {
        Self {
            id,
            endpoint,
            total_requests: AtomicU64::new(0),
            successful_requests: AtomicU64::new(0),
            failed_requests: AtomicU64::new(0),
            total_response_ns: AtomicU64::new(0),
            active_connections: AtomicU32::new(0),
            queue_depth: AtomicU32::new(0),
            cpu_load: AtomicU64::new(0f64.to_bits()),
            memory_load: AtomicU64::new(0f64.to_bits()),
            network_load: AtomicU64::new(0f64.to_bits()),
            messages_per_sec: AtomicU64::new(0f64.to_bits()),
            availability: AtomicU64::new(1f64.to_bits()),
            consecutive_failures: AtomicU32::new(0),
            consecutive_successes: AtomicU32::new(0),
            bandwidth_samples: Mutex::new([0; BANDWIDTH_WINDOW]),
            bandwidth_count: AtomicU32::new(0),
            last_activity_ns: AtomicU64::new(now_ns),
        }
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    // ---------------------------------------------------------------------
    // OUTCOME REPORTING (single writer: the health monitor)
    // ---------------------------------------------------------------------

    /// Record a request outcome and update the EMA and streak counters.
    pub(crate) fn record_outcome(
        &self,
        success: bool,
        response_time_ns: u64,
        recovery_threshold: u32,
        now_ns: u64,
    ) {
        self.apply_outcome(success, response_time_ns, recovery_threshold);
        self.last_activity_ns.store(now_ns, Ordering::Relaxed);
    }

    fn apply_outcome(&self, success: bool, response_time_ns: u64, recovery_threshold: u32) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        self.total_response_ns.fetch_add(response_time_ns, Ordering::Relaxed);

        let ema = f64::from_bits(self.availability.load(Ordering::Relaxed));
        let next = if success {
            self.successful_requests.fetch_add(1, Ordering::Relaxed);
            let streak = self.consecutive_successes.fetch_add(1, Ordering::Relaxed) + 1;
            // The failure streak only clears once the node has proven
            // itself for a full recovery window; a single success must
            // not flip an unhealthy node back.
            if streak >= recovery_threshold {
                self.consecutive_failures.store(0, Ordering::Relaxed);
            }
            EMA_DECAY * ema + (1.0 - EMA_DECAY)
        } else {
            self.failed_requests.fetch_add(1, Ordering::Relaxed);
            self.consecutive_failures.fetch_add(1, Ordering::Relaxed);
            self.consecutive_successes.store(0, Ordering::Relaxed);
            EMA_DECAY * ema
        };
        self.availability.store(next.to_bits(), Ordering::Relaxed);
    }

    /// Update utilization gauges (values clamped to [0, 1]).
    pub fn set_utilization(&self, cpu: f64, memory: f64, network: f64, messages_per_sec: f64) {
        self.cpu_load.store(cpu.clamp(0.0, 1.0).to_bits(), Ordering::Relaxed);
        self.memory_load.store(memory.clamp(0.0, 1.0).to_bits(), Ordering::Relaxed);
        self.network_load.store(network.clamp(0.0, 1.0).to_bits(), Ordering::Relaxed);
        self.messages_per_sec.store(messages_per_sec.max(0.0).to_bits(), Ordering::Relaxed);
    }

    /// Record observed throughput for the bandwidth estimate.
    pub fn record_bandwidth_sample(&self, bytes_per_sec: u64) {
        let count = self.bandwidth_count.fetch_add(1, Ordering::Relaxed) as usize;
        let mut samples = self
            .bandwidth_samples
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        samples[count % BANDWIDTH_WINDOW] = bytes_per_sec;
    }

    /// Mark a heartbeat or any other sign of life.
    pub fn touch(&self, now_ns: u64) {
        self.last_activity_ns.store(now_ns, Ordering::Relaxed);
    }

    pub fn set_queue_depth(&self, depth: u32) {
        self.queue_depth.store(depth, Ordering::Relaxed);
    }

    pub fn connection_opened(&self) {
        self.active_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_closed(&self) {
        self.active_connections.fetch_sub(1, Ordering::Relaxed);
    }

    // ---------------------------------------------------------------------
    // READ SIDE (selectors, governor, coordinator)
    // ---------------------------------------------------------------------

    /// Health per the hysteresis predicate: a node is healthy when its
    /// failure streak is short of the threshold AND it has either never
    /// entered a streak or has completed a full recovery window.
    pub fn is_healthy(&self, failure_threshold: u32, recovery_threshold: u32) -> bool {
        let failures = self.consecutive_failures.load(Ordering::Relaxed);
        let successes = self.consecutive_successes.load(Ordering::Relaxed);
        failures < failure_threshold && (successes >= recovery_threshold || failures == 0)
    }

    /// Availability EMA in [0, 1].
    pub fn availability(&self) -> f64 {
        f64::from_bits(self.availability.load(Ordering::Relaxed))
    }

    /// Mean response time over every completed request, 0 when idle.
    pub fn avg_latency_ns(&self) -> u64 {
        let total = self.total_requests.load(Ordering::Relaxed);
        if total == 0 {
            return 0;
        }
        self.total_response_ns.load(Ordering::Relaxed) / total
    }

    /// Weighted utilization: `0.4*cpu + 0.3*mem + 0.2*net + 0.1*queue`.
    pub fn load_factor(&self) -> f64 {
        let cpu = f64::from_bits(self.cpu_load.load(Ordering::Relaxed));
        let mem = f64::from_bits(self.memory_load.load(Ordering::Relaxed));
        let net = f64::from_bits(self.network_load.load(Ordering::Relaxed));
        let queue = f64::from(self.queue_depth.load(Ordering::Relaxed)).min(100.0) / 100.0;
        0.4 * cpu + 0.3 * mem + 0.2 * net + 0.1 * queue
    }

    /// Moving average of recent throughput samples, bytes/sec.
    pub fn estimated_bandwidth(&self) -> u64 {
        let count = (self.bandwidth_count.load(Ordering::Relaxed) as usize).min(BANDWIDTH_WINDOW);
        if count == 0 {
            return 0;
        }
        let samples = self
            .bandwidth_samples
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        samples[..count].iter().sum::<u64>() / count as u64
    }

    pub fn total_requests(&self) -> u64 {
        self.total_requests.load(Ordering::Relaxed)
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures.load(Ordering::Relaxed)
    }

    pub fn consecutive_successes(&self) -> u32 {
        self.consecutive_successes.load(Ordering::Relaxed)
    }

    pub fn last_activity_ns(&self) -> u64 {
        self.last_activity_ns.load(Ordering::Relaxed)
    }

    pub fn active_connections(&self) -> u32 {
        self.active_connections.load(Ordering::Relaxed)
    }

    /// Synthesize a failure (staleness probe, forced demotion).
    ///
    /// Deliberately leaves `last_activity_ns` untouched: the node is still
    /// silent, and each subsequent probe tick must keep counting against it.
    pub(crate) fn synthesize_failure(&self) {
        self.apply_outcome(false, 0, u32::MAX);
    }
}
