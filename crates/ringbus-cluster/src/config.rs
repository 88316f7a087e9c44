use crate::select::Algorithm;

/// Coordination-plane tuning.
#[derive(Debug, Clone, Copy)]
pub struct ClusterConfig {
    /// Expected cluster size (vote majorities are computed against this).
    pub cluster_size: u32,
    /// Healthy nodes required for majority operations.
    pub quorum_size: u32,
    /// Heartbeat period; staleness fires at twice this.
    pub heartbeat_ms: u64,
    /// Consecutive failures before a node is unhealthy.
    pub failure_threshold: u32,
    /// Consecutive successes before an unhealthy node recovers.
    pub recovery_threshold: u32,
    /// Probation window after recovery, during which traffic is ramped.
    pub probation_ms: u64,
    /// Fraction of fair share a recovering node receives during probation.
    pub probation_share: f64,
    /// Virtual positions per node on the consistent-hash ring.
    pub virtual_nodes: usize,
    /// Default selection algorithm when the caller names none.
    pub algorithm_default: Algorithm,
    /// Pooled connections kept per node.
    pub pool_min: usize,
    pub pool_max: usize,
    /// Idle pooled connections past this age are closed on probe ticks.
    pub idle_timeout_ms: u64,
    /// Congestion ratio above which the flow window shrinks.
    pub congestion_threshold: f64,
    /// Flow window bounds in bytes.
    pub flow_window_max: u64,
    pub flow_window_min: u64,
    /// Per-node batch size bounds.
    pub batch_min: usize,
    pub batch_max: usize,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            cluster_size: 1,
            quorum_size: 1,
            heartbeat_ms: 100,
            failure_threshold: 3,
            recovery_threshold: 2,
            probation_ms: 5_000,
            probation_share: 0.25,
            virtual_nodes: 100,
            algorithm_default: Algorithm::Adaptive,
            pool_min: 2,
            pool_max: 8,
            idle_timeout_ms: 30_000,
            congestion_threshold: 0.85,
            flow_window_max: 16 << 20,
            flow_window_min: 4 << 20,
            batch_min: 16,
            batch_max: 1024,
        }
    }
}

impl ClusterConfig {
    /// Heartbeat period in nanoseconds.
    #[inline]
    pub const fn heartbeat_ns(&self) -> u64 {
        self.heartbeat_ms * 1_000_000
    }

    /// Activity older than twice the heartbeat counts as a missed probe.
    #[inline]
    pub const fn staleness_ns(&self) -> u64 {
        2 * self.heartbeat_ns()
    }

    /// Probation window in nanoseconds.
    #[inline]
    pub const fn probation_ns(&self) -> u64 {
        self.probation_ms * 1_000_000
    }
}
