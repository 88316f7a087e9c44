use crate::node::NodeId;
use std::sync::Arc;

/// Cluster-membership and leadership events surfaced to the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClusterEvent {
    NodeJoined(NodeId),
    NodeLeft(NodeId),
    BecameLeader(NodeId),
    BecameFollower(NodeId),
    PartitionDetected,
    PartitionRecovered,
}

/// Performance alert categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertKind {
    /// Global congestion ratio crossed the configured threshold.
    CongestionHigh,
    /// A node's queue depth crossed the configured threshold.
    QueueDepthHigh,
    /// A node's mean latency crossed the configured threshold.
    LatencyHigh,
}

/// Callback for cluster events.
pub type ClusterEventFn = Arc<dyn Fn(ClusterEvent) + Send + Sync>;

/// Callback for performance alerts: `(kind, current, threshold)`.
pub type PerformanceAlertFn = Arc<dyn Fn(AlertKind, f64, f64) + Send + Sync>;
