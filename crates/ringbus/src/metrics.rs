//! Atomic counters for the IPC plane.
//!
//! Counters are always-on and relaxed; a [`MetricsSnapshot`] is a plain
//! copy for callers that want a consistent-enough view without stalling
//! producers or consumers.

use std::sync::atomic::{AtomicU64, Ordering};

/// Shared counters updated by producers, consumers and transports.
#[derive(Debug, Default)]
pub struct FabricMetrics {
    /// Records accepted by a lane.
    pub messages_sent: AtomicU64,
    /// Records delivered to the consumer.
    pub messages_received: AtomicU64,
    /// Envelopes dropped on checksum mismatch.
    pub corrupt_messages: AtomicU64,
    /// Writes rejected with `Full`.
    pub full_rejects: AtomicU64,
    /// Lane degradation events.
    pub lanes_degraded: AtomicU64,
    /// Envelopes the selector could not place on any transport.
    pub unroutable: AtomicU64,
}

impl FabricMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn add_sent(&self, n: u64) {
        self.messages_sent.fetch_add(n, Ordering::Relaxed);
    }

    #[inline]
    pub fn add_received(&self, n: u64) {
        self.messages_received.fetch_add(n, Ordering::Relaxed);
    }

    #[inline]
    pub fn add_corrupt(&self) {
        self.corrupt_messages.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn add_full_reject(&self) {
        self.full_rejects.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn add_lane_degraded(&self) {
        self.lanes_degraded.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn add_unroutable(&self) {
        self.unroutable.fetch_add(1, Ordering::Relaxed);
    }

    /// Point-in-time copy of every counter.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            messages_sent: self.messages_sent.load(Ordering::Relaxed),
            messages_received: self.messages_received.load(Ordering::Relaxed),
            corrupt_messages: self.corrupt_messages.load(Ordering::Relaxed),
            full_rejects: self.full_rejects.load(Ordering::Relaxed),
            lanes_degraded: self.lanes_degraded.load(Ordering::Relaxed),
            unroutable: self.unroutable.load(Ordering::Relaxed),
        }
    }
}

/// Plain copy of [`FabricMetrics`] counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub messages_sent: u64,
    pub messages_received: u64,
    pub corrupt_messages: u64,
    pub full_rejects: u64,
    pub lanes_degraded: u64,
    pub unroutable: u64,
}
