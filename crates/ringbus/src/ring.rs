use crate::config::RingConfig;
use crate::error::{ReadError, WriteError};
use crate::lane::Lane;
use crate::metrics::{FabricMetrics, MetricsSnapshot};
use crate::priority::{Priority, LANE_COUNT};
use crate::shm::SharedRegion;
use std::cell::UnsafeCell;
use std::sync::Arc;

/// Six-lane priority ring: one independent byte lane per [`Priority`].
///
/// Producers write to the lane their priority selects; a single consumer
/// drains lanes in strict priority order, or round-robins with a per-lane
/// quota when a fairness quota is configured. Within a lane, order is FIFO.
///
/// The consumer side is single-threaded by contract (the dispatcher pump);
/// producer calls are safe from any thread subject to each lane's SPSC or
/// shared-writer mode.
pub struct PriorityRing {
    lanes: [Lane; LANE_COUNT],
    fair_quota: usize,
    /// Fair-mode drain cursor. Touched only by the single consumer.
    fair: UnsafeCell<FairCursor>,
    metrics: FabricMetrics,
    /// Keeps the shared mapping alive for region-backed lanes.
    _region: Option<Arc<SharedRegion>>,
}

#[derive(Default)]
struct FairCursor {
    lane: usize,
    served: usize,
}

// SAFETY: `fair` is only accessed from the single consumer, per the
// documented contract; everything else is atomics or immutable.
unsafe impl Send for PriorityRing {}
unsafe impl Sync for PriorityRing {}

impl PriorityRing {
    /// Heap-backed ring with the given lane sizes.
    pub fn new(config: RingConfig) -> Self {
        let lanes = std::array::from_fn(|i| Lane::new(config.lane_bytes[i]));
        Self {
            lanes,
            fair_quota: config.fair_quota,
            fair: UnsafeCell::new(FairCursor::default()),
            metrics: FabricMetrics::new(),
            _region: None,
        }
    }

    /// Ring whose lanes are carved out of a shared memory region, for
    /// cross-process fabrics. The region must hold `config.total_bytes()`.
    pub fn in_region(
        region: &Arc<SharedRegion>,
        config: RingConfig,
    ) -> Result<Self, crate::error::PlatformError> {
        if region.len() < config.total_bytes() {
            return Err(crate::error::PlatformError::MappingFailed {
                name: region.name().to_string(),
                source: std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    format!(
                        "region of {} bytes cannot hold {}-byte ring",
                        region.len(),
                        config.total_bytes()
                    ),
                ),
            });
        }

        let mut offset = 0usize;
        let lanes = std::array::from_fn(|i| {
            let bytes = config.lane_bytes[i];
            // SAFETY: offsets are disjoint, within bounds (checked above),
            // and the Arc held in `_region` outlives every lane.
            let lane = unsafe { Lane::from_raw(region.as_ptr().add(offset), bytes) };
            offset += bytes;
            lane
        });

        Ok(Self {
            lanes,
            fair_quota: config.fair_quota,
            fair: UnsafeCell::new(FairCursor::default()),
            metrics: FabricMetrics::new(),
            _region: Some(Arc::clone(region)),
        })
    }

    /// The lane serving `priority`.
    #[inline]
    pub fn lane(&self, priority: Priority) -> &Lane {
        &self.lanes[priority.lane()]
    }

    /// Append a record to the lane for `priority` (single producer per lane).
    pub fn write(&self, priority: Priority, payload: &[u8]) -> Result<(), WriteError> {
        match self.lanes[priority.lane()].write(payload) {
            Ok(()) => {
                self.metrics.add_sent(1);
                Ok(())
            }
            Err(e) => {
                if matches!(e, WriteError::Full) {
                    self.metrics.add_full_reject();
                }
                Err(e)
            }
        }
    }

    /// Append a record from any producer thread (CAS-published).
    pub fn write_shared(&self, priority: Priority, payload: &[u8]) -> Result<(), WriteError> {
        match self.lanes[priority.lane()].write_shared(payload) {
            Ok(()) => {
                self.metrics.add_sent(1);
                Ok(())
            }
            Err(e) => {
                if matches!(e, WriteError::Full) {
                    self.metrics.add_full_reject();
                }
                Err(e)
            }
        }
    }

    /// Drain the next record into `dest`, honoring the drain policy.
    ///
    /// Returns `Ok(None)` when every lane is empty. Corrupt lanes are
    /// counted, left to resynchronize, and skipped; the only error
    /// surfaced is `DestTooSmall`, which is a caller bug.
    ///
    /// Single consumer only.
    pub fn read_next(&self, dest: &mut [u8]) -> Result<Option<(Priority, usize)>, ReadError> {
        if self.fair_quota == 0 {
            self.read_strict(dest)
        } else {
            self.read_fair(dest)
        }
    }

    /// Highest-priority lane with a pending record wins, always.
    fn read_strict(&self, dest: &mut [u8]) -> Result<Option<(Priority, usize)>, ReadError> {
        for priority in Priority::ALL {
            match self.lanes[priority.lane()].read(dest) {
                Ok(n) => {
                    self.metrics.add_received(1);
                    return Ok(Some((priority, n)));
                }
                Err(ReadError::Empty) => continue,
                Err(ReadError::Corrupt { .. }) => {
                    self.metrics.add_lane_degraded();
                    continue;
                }
                Err(e @ ReadError::DestTooSmall { .. }) => return Err(e),
            }
        }
        Ok(None)
    }

    /// Sweep lanes in priority order, serving at most `fair_quota` records
    /// from each before advancing, so a busy high lane cannot starve the
    /// ones below it.
    fn read_fair(&self, dest: &mut [u8]) -> Result<Option<(Priority, usize)>, ReadError> {
        // SAFETY: single consumer by contract; no other accessor exists.
        let cursor = unsafe { &mut *self.fair.get() };

        for _ in 0..LANE_COUNT {
            let priority = Priority::ALL[cursor.lane];
            if cursor.served < self.fair_quota {
                match self.lanes[cursor.lane].read(dest) {
                    Ok(n) => {
                        cursor.served += 1;
                        self.metrics.add_received(1);
                        return Ok(Some((priority, n)));
                    }
                    Err(ReadError::Empty) => {}
                    Err(ReadError::Corrupt { .. }) => {
                        self.metrics.add_lane_degraded();
                    }
                    Err(e @ ReadError::DestTooSmall { .. }) => return Err(e),
                }
            }
            cursor.lane = (cursor.lane + 1) % LANE_COUNT;
            cursor.served = 0;
        }
        Ok(None)
    }

    /// Pending bytes summed over all lanes.
    pub fn backlog(&self) -> usize {
        self.lanes.iter().map(Lane::len).sum()
    }

    /// True when no lane holds a published record.
    pub fn is_empty(&self) -> bool {
        self.lanes.iter().all(Lane::is_empty)
    }

    /// Counter snapshot.
    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Live counters, shared with the fabric that owns this ring.
    pub fn metrics_handle(&self) -> &FabricMetrics {
        &self.metrics
    }

    /// Largest payload the lane for `priority` accepts.
    #[inline]
    pub fn max_message(&self, priority: Priority) -> usize {
        self.lanes[priority.lane()].max_message()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RingConfig;

    #[test]
    fn test_strict_priority_order() {
        let ring = PriorityRing::new(RingConfig::uniform(1 << 12));
        ring.write(Priority::Batch, b"bulk").unwrap();
        ring.write(Priority::Critical, b"ctl").unwrap();
        ring.write(Priority::Normal, b"mid").unwrap();

        let mut buf = [0u8; 64];
        let (p, n) = ring.read_next(&mut buf).unwrap().unwrap();
        assert_eq!((p, &buf[..n]), (Priority::Critical, &b"ctl"[..]));
        let (p, n) = ring.read_next(&mut buf).unwrap().unwrap();
        assert_eq!((p, &buf[..n]), (Priority::Normal, &b"mid"[..]));
        let (p, n) = ring.read_next(&mut buf).unwrap().unwrap();
        assert_eq!((p, &buf[..n]), (Priority::Batch, &b"bulk"[..]));
        assert!(ring.read_next(&mut buf).unwrap().is_none());
    }

    #[test]
    fn test_fifo_within_lane() {
        let ring = PriorityRing::new(RingConfig::uniform(1 << 14));
        for i in 0u32..100 {
            ring.write(Priority::Normal, &i.to_le_bytes()).unwrap();
        }
        let mut buf = [0u8; 16];
        for i in 0u32..100 {
            let (_, n) = ring.read_next(&mut buf).unwrap().unwrap();
            assert_eq!(u32::from_le_bytes(buf[..n].try_into().unwrap()), i);
        }
    }

    #[test]
    fn test_fair_quota_lets_lower_lanes_through() {
        let mut cfg = RingConfig::uniform(1 << 14);
        cfg.fair_quota = 2;
        let ring = PriorityRing::new(cfg);

        for i in 0u8..6 {
            ring.write(Priority::High, &[i]).unwrap();
        }
        ring.write(Priority::Batch, b"b").unwrap();

        // With a quota of 2, the batch record must appear within the first
        // pass rather than after all six HIGH records.
        let mut order = Vec::new();
        let mut buf = [0u8; 16];
        while let Some((p, _)) = ring.read_next(&mut buf).unwrap() {
            order.push(p);
        }
        let batch_at = order.iter().position(|p| *p == Priority::Batch).unwrap();
        assert!(batch_at < 6, "batch starved: drained at position {batch_at} in {order:?}");
    }

    #[test]
    fn test_metrics_track_traffic() {
        let ring = PriorityRing::new(RingConfig::uniform(1 << 12));
        ring.write(Priority::Normal, b"x").unwrap();
        let mut buf = [0u8; 16];
        let _ = ring.read_next(&mut buf).unwrap();
        let snap = ring.metrics();
        assert_eq!(snap.messages_sent, 1);
        assert_eq!(snap.messages_received, 1);
    }

    #[test]
    #[cfg(unix)]
    fn test_region_backed_ring_round_trips() {
        let region = SharedRegion::anonymous(RingConfig::uniform(1 << 12).total_bytes()).unwrap();
        let ring = PriorityRing::in_region(&region, RingConfig::uniform(1 << 12)).unwrap();

        ring.write(Priority::High, b"shared").unwrap();
        let mut buf = [0u8; 64];
        let (p, n) = ring.read_next(&mut buf).unwrap().unwrap();
        assert_eq!((p, &buf[..n]), (Priority::High, &b"shared"[..]));
    }

    #[test]
    #[cfg(unix)]
    fn test_region_too_small_is_rejected() {
        let region = SharedRegion::anonymous(1 << 12).unwrap();
        assert!(PriorityRing::in_region(&region, RingConfig::uniform(1 << 12)).is_err());
    }

    #[test]
    fn test_full_counts_rejects() {
        let ring = PriorityRing::new(RingConfig::uniform(64));
        // 16-byte max payload on a 64-byte lane; fill it up.
        let payload = [0u8; 12];
        let mut accepted = 0;
        while ring.write(Priority::Critical, &payload).is_ok() {
            accepted += 1;
        }
        assert!(accepted >= 3);
        assert!(ring.metrics().full_rejects >= 1);
    }
}
