//! Cluster wire messages, carried as envelope payloads.
//!
//! Application message types live below [`CLUSTER_TYPE_BASE`]; the fabric
//! reserves the top of the type byte for its own traffic. Payloads are
//! bincode-encoded.

use ringbus_cluster::NodeId;
use serde::{Deserialize, Serialize};

/// First envelope `message_type` reserved for fabric-internal traffic.
pub const CLUSTER_TYPE_BASE: u8 = 0xF0;

/// Envelope message types for cluster traffic.
pub const MSG_HEARTBEAT: u8 = 0xF1;
pub const MSG_VOTE_REQUEST: u8 = 0xF2;
pub const MSG_VOTE_GRANT: u8 = 0xF3;
pub const MSG_HEALTH_EVENT: u8 = 0xF4;

/// True when the envelope type addresses the fabric, not an agent.
#[inline]
pub fn is_cluster_type(message_type: u8) -> bool {
    message_type >= CLUSTER_TYPE_BASE
}

/// Messages exchanged between fabric nodes and fed to the coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClusterMessage {
    /// Periodic liveness beacon; `is_leader` asserts leadership for `term`.
    Heartbeat {
        from: u16,
        term: u64,
        is_leader: bool,
        healthy_count: u32,
    },
    /// A candidate soliciting votes for `term`.
    VoteRequest { term: u64, candidate: u16 },
    /// A vote granted to `candidate` for `term`.
    VoteGrant { term: u64, voter: u16 },
    /// Synthetic health transition from the staleness probe, enqueued on
    /// the background lane for the coordinator.
    HealthEvent { node: u16, healthy: bool },
}

impl ClusterMessage {
    /// Envelope message type for this variant.
    pub fn message_type(&self) -> u8 {
        match self {
            ClusterMessage::Heartbeat { .. } => MSG_HEARTBEAT,
            ClusterMessage::VoteRequest { .. } => MSG_VOTE_REQUEST,
            ClusterMessage::VoteGrant { .. } => MSG_VOTE_GRANT,
            ClusterMessage::HealthEvent { .. } => MSG_HEALTH_EVENT,
        }
    }

    /// Sender node, where the variant carries one.
    pub fn sender(&self) -> Option<NodeId> {
        match self {
            ClusterMessage::Heartbeat { from, .. } => Some(NodeId(*from)),
            ClusterMessage::VoteRequest { candidate, .. } => Some(NodeId(*candidate)),
            ClusterMessage::VoteGrant { voter, .. } => Some(NodeId(*voter)),
            ClusterMessage::HealthEvent { .. } => None,
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, bincode::Error> {
        bincode::serialize(self)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, bincode::Error> {
        bincode::deserialize(bytes)
    }
}
