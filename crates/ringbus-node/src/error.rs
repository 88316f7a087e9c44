use thiserror::Error;

/// Errors surfaced by the node runtime.
#[derive(Debug, Error)]
pub enum NodeError {
    /// Startup-time platform failure (mapping, paging, affinity).
    #[error(transparent)]
    Platform(#[from] ringbus::PlatformError),

    /// Envelope encode/decode failure.
    #[error(transparent)]
    Envelope(#[from] ringbus::EnvelopeError),

    /// Transport routing failure.
    #[error(transparent)]
    Transport(#[from] ringbus::TransportError),

    /// Work submission failure.
    #[error(transparent)]
    Dispatch(#[from] ringbus_dispatch::DispatchError),

    /// Coordination-plane failure.
    #[error(transparent)]
    Cluster(#[from] ringbus_cluster::ClusterError),

    /// Cluster wire message could not be decoded.
    #[error("bad cluster message: {0}")]
    BadClusterMessage(#[from] bincode::Error),

    /// Socket I/O failure.
    #[error("socket error: {0}")]
    Io(#[from] std::io::Error),

    /// The target agent id is not registered on this node.
    #[error("no agent {0} on this node")]
    NoSuchAgent(u16),
}

impl NodeError {
    /// True when the caller may retry after a delay.
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Transport(e) => e.is_recoverable(),
            Self::Dispatch(e) => e.is_recoverable(),
            Self::Cluster(e) => e.is_recoverable(),
            _ => false,
        }
    }
}
