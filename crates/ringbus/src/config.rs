use crate::priority::LANE_COUNT;

/// Sizing and drain policy for a [`PriorityRing`](crate::PriorityRing).
#[derive(Debug, Clone, Copy)]
pub struct RingConfig {
    /// Per-lane capacity in bytes, CRITICAL through BACKGROUND.
    /// Each must be a power of two.
    pub lane_bytes: [usize; LANE_COUNT],
    /// Messages served from one lane per fairness pass; 0 = strict
    /// priority order.
    pub fair_quota: usize,
}

impl RingConfig {
    /// Custom per-lane sizes.
    ///
    /// # Panics
    ///
    /// Panics if any lane size is not a power of two or is below 64 bytes.
    pub const fn new(lane_bytes: [usize; LANE_COUNT], fair_quota: usize) -> Self {
        let mut i = 0;
        while i < LANE_COUNT {
            assert!(lane_bytes[i].is_power_of_two(), "lane size must be a power of two");
            assert!(lane_bytes[i] >= 64, "lane size must hold at least one record");
            i += 1;
        }
        Self { lane_bytes, fair_quota }
    }

    /// Identical capacity for all six lanes.
    pub const fn uniform(bytes_per_lane: usize) -> Self {
        Self::new([bytes_per_lane; LANE_COUNT], 0)
    }

    /// Total bytes across all lanes.
    pub const fn total_bytes(&self) -> usize {
        let mut total = 0;
        let mut i = 0;
        while i < LANE_COUNT {
            total += self.lane_bytes[i];
            i += 1;
        }
        total
    }

    /// Largest payload lane `i` accepts (a quarter of its capacity).
    #[inline]
    pub const fn max_message(&self, lane: usize) -> usize {
        self.lane_bytes[lane] / 4
    }
}

impl Default for RingConfig {
    fn default() -> Self {
        // Latency-critical lanes stay small enough to live in cache; the
        // journal- and batch-bound lanes absorb bursts.
        Self::new(
            [
                1 << 18, // CRITICAL   256 KiB
                1 << 18, // HIGH       256 KiB
                1 << 19, // NORMAL     512 KiB
                1 << 20, // LOW          1 MiB
                1 << 21, // BATCH        2 MiB
                1 << 18, // BACKGROUND 256 KiB
            ],
            0,
        )
    }
}

/// Small-footprint configuration: all lanes fit in L2.
pub const LOW_LATENCY_RING: RingConfig = RingConfig::new([1 << 14; LANE_COUNT], 0);

/// Burst-tolerant configuration with a fairness quota so BATCH traffic
/// cannot be starved indefinitely by NORMAL.
pub const HIGH_THROUGHPUT_RING: RingConfig = RingConfig::new(
    [1 << 20, 1 << 20, 1 << 21, 1 << 22, 1 << 23, 1 << 20],
    64,
);

/// Configuration for the transport plane.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Namespace for OS artifacts: the shared region name, the datagram
    /// socket `/tmp/<namespace>.sock`, the journal `/tmp/<namespace>.queue`.
    pub namespace: String,
    /// Shared region size in bytes.
    pub region_bytes: usize,
    /// Journal file size in bytes (truncated to this size on open).
    pub journal_bytes: usize,
    /// Pinned region size in bytes for BATCH/BACKGROUND staging.
    pub dma_bytes: usize,
    /// Submission/completion queue depth (entries, power of two).
    pub sq_depth: usize,
    /// Largest accepted payload on any transport.
    pub max_payload: usize,
    /// Disable the submission queue, forcing the HIGH → ring degrade path.
    pub disable_submission_queue: bool,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            namespace: "ringbus".to_string(),
            region_bytes: 256 << 20,
            journal_bytes: 64 << 20,
            dma_bytes: 16 << 20,
            sq_depth: 1 << 10,
            max_payload: 64 << 10,
            disable_submission_queue: false,
        }
    }
}

impl TransportConfig {
    /// Datagram socket path for this namespace.
    pub fn socket_path(&self) -> std::path::PathBuf {
        std::path::PathBuf::from(format!("/tmp/{}.sock", self.namespace))
    }

    /// Journal file path for this namespace.
    pub fn journal_path(&self) -> std::path::PathBuf {
        std::path::PathBuf::from(format!("/tmp/{}.queue", self.namespace))
    }
}
