use ringbus::{RingConfig, TransportConfig};
use ringbus_cluster::{Algorithm, ClusterConfig};
use ringbus_dispatch::DispatcherConfig;
use std::path::PathBuf;

/// Full configuration for one fabric node.
///
/// The host parses whatever CLI or file format it likes and hands the
/// result here; the fabric never reads configuration sources itself.
/// TLS fields are carried for the host's outer transports; the fabric
/// does not terminate TLS.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Names every OS artifact: shared region, sockets, journal.
    pub namespace: String,
    /// This node's id within the cluster.
    pub node_id: u16,
    /// Expected cluster size.
    pub cluster_size: u32,
    /// Bind address/port for hosts that front the fabric with a network
    /// listener. Unused by the intra-host transports.
    pub bind_address: String,
    pub bind_port: u16,
    /// Healthy nodes required for majority operations.
    pub quorum_size: u32,
    /// TLS material for the host's outer listener.
    pub enable_tls: bool,
    pub cert_path: Option<PathBuf>,
    pub key_path: Option<PathBuf>,
    /// Priority ring sizing.
    pub ring: RingConfig,
    /// Transport plane sizing.
    pub transport: TransportConfig,
    /// Worker pool sizing.
    pub dispatcher: DispatcherConfig,
    /// Coordination-plane tuning.
    pub cluster: ClusterConfig,
    /// Peer node ids this node heartbeats with.
    pub peers: Vec<u16>,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            namespace: "ringbus".to_string(),
            node_id: 0,
            cluster_size: 1,
            bind_address: "127.0.0.1".to_string(),
            bind_port: 7400,
            quorum_size: 1,
            enable_tls: false,
            cert_path: None,
            key_path: None,
            ring: RingConfig::default(),
            transport: TransportConfig::default(),
            dispatcher: DispatcherConfig::default(),
            cluster: ClusterConfig::default(),
            peers: Vec::new(),
        }
    }
}

impl NodeConfig {
    /// Per-node namespace (each node owns its socket and journal).
    pub fn node_namespace(&self, node_id: u16) -> String {
        format!("{}-{}", self.namespace, node_id)
    }

    /// Ingress socket path for a node in this cluster.
    pub fn peer_socket(&self, node_id: u16) -> PathBuf {
        PathBuf::from(format!("/tmp/{}.sock", self.node_namespace(node_id)))
    }

    /// Resolve the transport config for this node (namespace scoped to
    /// the node id, cluster settings folded in).
    pub fn transport_for_node(&self) -> TransportConfig {
        TransportConfig {
            namespace: self.node_namespace(self.node_id),
            ..self.transport.clone()
        }
    }

    /// Fold the top-level cluster fields into the cluster config.
    pub fn cluster_for_node(&self) -> ClusterConfig {
        ClusterConfig {
            cluster_size: self.cluster_size,
            quorum_size: self.quorum_size,
            ..self.cluster
        }
    }

    /// Default selection algorithm.
    pub fn algorithm_default(&self) -> Algorithm {
        self.cluster.algorithm_default
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_scoped_paths() {
        let cfg = NodeConfig {
            namespace: "mesh".into(),
            node_id: 3,
            ..NodeConfig::default()
        };
        assert_eq!(cfg.node_namespace(3), "mesh-3");
        assert_eq!(cfg.peer_socket(5).to_str().unwrap(), "/tmp/mesh-5.sock");
        assert_eq!(cfg.transport_for_node().namespace, "mesh-3");
    }

    #[test]
    fn test_cluster_fields_fold() {
        let cfg = NodeConfig {
            cluster_size: 5,
            quorum_size: 3,
            ..NodeConfig::default()
        };
        let cluster = cfg.cluster_for_node();
        assert_eq!(cluster.cluster_size, 5);
        assert_eq!(cluster.quorum_size, 3);
    }
}
