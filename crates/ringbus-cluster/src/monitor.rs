//! Health monitor: node registry, outcome reporting, staleness probes.

use crate::config::ClusterConfig;
use crate::error::ClusterError;
use crate::node::{NodeHealth, NodeId};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

/// Health state change produced by an outcome report or a staleness probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthTransition {
    BecameHealthy(NodeId),
    BecameUnhealthy(NodeId),
}

/// Registry of node health records.
///
/// Registration and removal take the registry write lock (cold path);
/// outcome reporting and selector reads touch only per-node atomics and
/// the read lock.
pub struct HealthMonitor {
    nodes: RwLock<HashMap<NodeId, Arc<NodeHealth>>>,
    healthy_count: AtomicU32,
    failure_threshold: u32,
    recovery_threshold: u32,
    staleness_ns: u64,
}

impl HealthMonitor {
    pub fn new(config: &ClusterConfig) -> Self {
        Self {
            nodes: RwLock::new(HashMap::new()),
            healthy_count: AtomicU32::new(0),
            failure_threshold: config.failure_threshold,
            recovery_threshold: config.recovery_threshold,
            staleness_ns: config.staleness_ns(),
        }
    }

    /// Register a node; it starts healthy.
    pub fn register(&self, id: NodeId, endpoint: impl Into<String>, now_ns: u64) -> Arc<NodeHealth> {
        let record = Arc::new(NodeHealth::new(id, endpoint.into(), now_ns));
        let mut nodes = self.nodes.write().unwrap_or_else(PoisonError::into_inner);
        match nodes.insert(id, Arc::clone(&record)) {
            None => {
                self.healthy_count.fetch_add(1, Ordering::Relaxed);
            }
            // Re-registration: the fresh record starts healthy, so only
            // bump the count if the one it replaced was not.
            Some(old) => {
                if !old.is_healthy(self.failure_threshold, self.recovery_threshold) {
                    self.healthy_count.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
        record
    }

    /// Remove a node and its record.
    pub fn remove(&self, id: NodeId) -> Result<(), ClusterError> {
        let mut nodes = self.nodes.write().unwrap_or_else(PoisonError::into_inner);
        match nodes.remove(&id) {
            Some(record) => {
                if record.is_healthy(self.failure_threshold, self.recovery_threshold) {
                    self.healthy_count.fetch_sub(1, Ordering::Relaxed);
                }
                Ok(())
            }
            None => Err(ClusterError::NoSuchNode(id)),
        }
    }

    /// Report a request outcome for `id`.
    ///
    /// Returns the health transition, if the report caused one.
    pub fn report(
        &self,
        id: NodeId,
        success: bool,
        response_time_ns: u64,
        now_ns: u64,
    ) -> Result<Option<HealthTransition>, ClusterError> {
        let record = self.get(id)?;
        Ok(self.apply_report(&record, success, response_time_ns, now_ns))
    }

    fn apply_report(
        &self,
        record: &NodeHealth,
        success: bool,
        response_time_ns: u64,
        now_ns: u64,
    ) -> Option<HealthTransition> {
        let id = record.id();
        let was_healthy = record.is_healthy(self.failure_threshold, self.recovery_threshold);
        record.record_outcome(success, response_time_ns, self.recovery_threshold, now_ns);
        let now_healthy = record.is_healthy(self.failure_threshold, self.recovery_threshold);

        match (was_healthy, now_healthy) {
            (false, true) => {
                self.healthy_count.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(node = %id, "node recovered");
                Some(HealthTransition::BecameHealthy(id))
            }
            (true, false) => {
                self.healthy_count.fetch_sub(1, Ordering::Relaxed);
                tracing::warn!(node = %id, "node became unhealthy");
                Some(HealthTransition::BecameUnhealthy(id))
            }
            _ => None,
        }
    }

    /// Synthesize failures for nodes silent past twice the heartbeat.
    pub fn probe_stale(&self, now_ns: u64) -> Vec<HealthTransition> {
        let stale: Vec<Arc<NodeHealth>> = {
            let nodes = self.nodes.read().unwrap_or_else(PoisonError::into_inner);
            nodes
                .values()
                .filter(|n| now_ns.saturating_sub(n.last_activity_ns()) > self.staleness_ns)
                .cloned()
                .collect()
        };

        let mut transitions = Vec::new();
        for record in stale {
            let id = record.id();
            let was_healthy = record.is_healthy(self.failure_threshold, self.recovery_threshold);
            record.synthesize_failure();
            let now_healthy = record.is_healthy(self.failure_threshold, self.recovery_threshold);
            if was_healthy && !now_healthy {
                self.healthy_count.fetch_sub(1, Ordering::Relaxed);
                tracing::warn!(node = %id, "node went stale");
                transitions.push(HealthTransition::BecameUnhealthy(id));
            }
        }
        transitions
    }

    /// Record a heartbeat from `id`.
    ///
    /// For an unhealthy node the beacon also counts as a success toward
    /// recovery; without it, a node demoted by stale probes could only
    /// recover through request traffic it is no longer receiving.
    pub fn heartbeat(&self, id: NodeId, now_ns: u64) -> Result<Option<HealthTransition>, ClusterError> {
        let record = self.get(id)?;
        if !record.is_healthy(self.failure_threshold, self.recovery_threshold) {
            return Ok(self.apply_report(&record, true, 0, now_ns));
        }
        record.touch(now_ns);
        Ok(None)
    }

    /// The record for `id`.
    pub fn get(&self, id: NodeId) -> Result<Arc<NodeHealth>, ClusterError> {
        let nodes = self.nodes.read().unwrap_or_else(PoisonError::into_inner);
        nodes.get(&id).cloned().ok_or(ClusterError::NoSuchNode(id))
    }

    /// Healthy records sorted by node id (stable order for round-robin).
    pub fn healthy_nodes(&self) -> Vec<Arc<NodeHealth>> {
        let nodes = self.nodes.read().unwrap_or_else(PoisonError::into_inner);
        let mut healthy: Vec<_> = nodes
            .values()
            .filter(|n| n.is_healthy(self.failure_threshold, self.recovery_threshold))
            .cloned()
            .collect();
        healthy.sort_by_key(|n| n.id());
        healthy
    }

    /// Every registered record, sorted by node id.
    pub fn all_nodes(&self) -> Vec<Arc<NodeHealth>> {
        let nodes = self.nodes.read().unwrap_or_else(PoisonError::into_inner);
        let mut all: Vec<_> = nodes.values().cloned().collect();
        all.sort_by_key(|n| n.id());
        all
    }

    /// Count of currently healthy nodes.
    pub fn healthy_count(&self) -> u32 {
        self.healthy_count.load(Ordering::Relaxed)
    }

    /// True when `id` is registered and healthy.
    pub fn is_healthy(&self, id: NodeId) -> bool {
        self.get(id)
            .map(|n| n.is_healthy(self.failure_threshold, self.recovery_threshold))
            .unwrap_or(false)
    }

    pub fn failure_threshold(&self) -> u32 {
        self.failure_threshold
    }

    pub fn recovery_threshold(&self) -> u32 {
        self.recovery_threshold
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn monitor() -> HealthMonitor {
        HealthMonitor::new(&ClusterConfig {
            failure_threshold: 3,
            recovery_threshold: 2,
            heartbeat_ms: 10,
            ..ClusterConfig::default()
        })
    }

    #[test]
    fn test_register_and_count() {
        let m = monitor();
        m.register(NodeId(1), "a", 0);
        m.register(NodeId(2), "b", 0);
        assert_eq!(m.healthy_count(), 2);

        m.remove(NodeId(1)).unwrap();
        assert_eq!(m.healthy_count(), 1);
        assert!(matches!(m.remove(NodeId(1)), Err(ClusterError::NoSuchNode(_))));
    }

    #[test]
    fn test_transitions_with_hysteresis() {
        let m = monitor();
        m.register(NodeId(1), "a", 0);

        assert_eq!(m.report(NodeId(1), false, 0, 0).unwrap(), None);
        assert_eq!(m.report(NodeId(1), false, 0, 0).unwrap(), None);
        assert_eq!(
            m.report(NodeId(1), false, 0, 0).unwrap(),
            Some(HealthTransition::BecameUnhealthy(NodeId(1)))
        );
        assert_eq!(m.healthy_count(), 0);

        assert_eq!(m.report(NodeId(1), true, 0, 0).unwrap(), None);
        assert_eq!(
            m.report(NodeId(1), true, 0, 0).unwrap(),
            Some(HealthTransition::BecameHealthy(NodeId(1)))
        );
        assert_eq!(m.healthy_count(), 1);
    }

    #[test]
    fn test_staleness_synthesizes_failures() {
        let m = monitor();
        m.register(NodeId(1), "a", 0);

        // Heartbeat interval is 10 ms; silence past 20 ms is stale.
        // Three stale probes demote the node (failure_threshold = 3).
        let stale_at = 21_000_000;
        assert!(m.probe_stale(stale_at).is_empty());
        assert!(m.probe_stale(stale_at).is_empty());
        let transitions = m.probe_stale(stale_at);
        assert_eq!(transitions, vec![HealthTransition::BecameUnhealthy(NodeId(1))]);
    }

    #[test]
    fn test_heartbeat_prevents_staleness() {
        let m = monitor();
        m.register(NodeId(1), "a", 0);
        m.heartbeat(NodeId(1), 15_000_000).unwrap();
        assert!(m.probe_stale(21_000_000).is_empty());
        assert_eq!(m.healthy_count(), 1);
    }
}
