use crate::node::NodeId;
use thiserror::Error;

/// Errors surfaced by the coordination plane.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ClusterError {
    /// Every registered node is unhealthy; retry after a delay.
    #[error("no healthy node available")]
    NoHealthyNode,

    /// The node id is not registered. Programmer error.
    #[error("no such node {0}")]
    NoSuchNode(NodeId),

    /// The node's connection pool has no pooled handle; the caller may
    /// create a fresh connection.
    #[error("connection pool for node {node} is exhausted")]
    Exhausted {
        /// The node whose pool came up empty.
        node: NodeId,
    },

    /// The cluster has lost quorum; majority-requiring operations are
    /// refused until it recovers. Reads continue.
    #[error("partition detected: {healthy} healthy nodes of quorum {quorum}")]
    PartitionDetected {
        /// Healthy node count at refusal time.
        healthy: u32,
        /// Configured quorum size.
        quorum: u32,
    },

    /// A leader election is in progress; retry after a delay.
    #[error("election in flight for term {term}")]
    ElectionInFlight {
        /// The contested term.
        term: u64,
    },
}

impl ClusterError {
    /// True when the caller may retry after a delay.
    #[inline]
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::NoHealthyNode
                | Self::Exhausted { .. }
                | Self::PartitionDetected { .. }
                | Self::ElectionInFlight { .. }
        )
    }
}
