//! Load-balanced node selection.
//!
//! Five pluggable algorithms over the health monitor's current view. All
//! of them return [`ClusterError::NoHealthyNode`] when nothing is healthy.

use crate::error::ClusterError;
use crate::hash_ring::HashRing;
use crate::monitor::HealthMonitor;
use crate::node::{NodeHealth, NodeId};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

/// Selection algorithm, chosen per call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Algorithm {
    /// Atomic counter modulo the healthy count.
    RoundRobin,
    /// Lowest weighted utilization.
    LeastLoaded,
    /// Lowest mean response time (nodes with at least one request).
    LowestLatency,
    /// Blend of availability, latency and load.
    #[default]
    Adaptive,
    /// Consistent hashing over the caller's key; unhealthy hits fall back
    /// to round-robin rather than walking the ring.
    ConsistentHash,
}

/// Node selector over a [`HealthMonitor`].
pub struct NodeSelector {
    monitor: Arc<HealthMonitor>,
    round_robin: AtomicU64,
    ring: RwLock<HashRing>,
}

impl NodeSelector {
    pub fn new(monitor: Arc<HealthMonitor>, virtual_nodes: usize) -> Self {
        Self {
            monitor,
            round_robin: AtomicU64::new(0),
            ring: RwLock::new(HashRing::new(virtual_nodes)),
        }
    }

    /// Rebuild the consistent-hash ring after membership changes.
    ///
    /// The ring holds every registered node, healthy or not; health is
    /// checked at lookup time so a recovering node reclaims its keys
    /// without another rebuild.
    pub fn rebuild_ring(&self) {
        let members: Vec<NodeId> = self.monitor.all_nodes().iter().map(|n| n.id()).collect();
        let mut ring = self.ring.write().unwrap_or_else(PoisonError::into_inner);
        ring.rebuild(members);
    }

    /// Pick a node. `key` feeds consistent hashing; other algorithms
    /// ignore it.
    pub fn pick(&self, algorithm: Algorithm, key: u64) -> Result<NodeId, ClusterError> {
        let healthy = self.monitor.healthy_nodes();
        if healthy.is_empty() {
            return Err(ClusterError::NoHealthyNode);
        }

        let chosen = match algorithm {
            Algorithm::RoundRobin => self.round_robin(&healthy),
            Algorithm::LeastLoaded => Self::least_loaded(&healthy),
            Algorithm::LowestLatency => Self::lowest_latency(&healthy),
            Algorithm::Adaptive => Self::adaptive(&healthy),
            Algorithm::ConsistentHash => self.consistent_hash(&healthy, key),
        };
        Ok(chosen)
    }

    fn round_robin(&self, healthy: &[Arc<NodeHealth>]) -> NodeId {
        let n = self.round_robin.fetch_add(1, Ordering::Relaxed);
        healthy[(n % healthy.len() as u64) as usize].id()
    }

    fn least_loaded(healthy: &[Arc<NodeHealth>]) -> NodeId {
        healthy
            .iter()
            .min_by(|a, b| a.load_factor().total_cmp(&b.load_factor()))
            .map(|n| n.id())
            .unwrap_or(healthy[0].id())
    }

    fn lowest_latency(healthy: &[Arc<NodeHealth>]) -> NodeId {
        healthy
            .iter()
            .filter(|n| n.total_requests() > 0)
            .min_by_key(|n| n.avg_latency_ns())
            .or_else(|| healthy.first())
            .map(|n| n.id())
            .unwrap_or(healthy[0].id())
    }

    /// `0.3*availability + 0.4*latency_score + 0.3*load_score`, where
    /// `latency_score = 1/(1 + avg_latency_ms)` and
    /// `load_score = 1 - load_factor`.
    fn adaptive(healthy: &[Arc<NodeHealth>]) -> NodeId {
        healthy
            .iter()
            .max_by(|a, b| Self::adaptive_score(a).total_cmp(&Self::adaptive_score(b)))
            .map(|n| n.id())
            .unwrap_or(healthy[0].id())
    }

    fn adaptive_score(node: &NodeHealth) -> f64 {
        let avg_latency_ms = node.avg_latency_ns() as f64 / 1_000_000.0;
        let latency_score = 1.0 / (1.0 + avg_latency_ms);
        let load_score = 1.0 - node.load_factor();
        0.3 * node.availability() + 0.4 * latency_score + 0.3 * load_score
    }

    fn consistent_hash(&self, healthy: &[Arc<NodeHealth>], key: u64) -> NodeId {
        let hit = {
            let ring = self.ring.read().unwrap_or_else(PoisonError::into_inner);
            ring.lookup(key)
        };
        match hit {
            Some(node) if self.monitor.is_healthy(node) => node,
            // Unhealthy or unknown owner: round-robin instead of walking
            // the ring, so a partial outage cannot funnel its whole
            // keyspace onto one survivor.
            _ => self.round_robin(healthy),
        }
    }
}
