//! ringbus-node - Fabric Node Runtime
//!
//! Composes the three planes into one owning handle: the lock-free IPC
//! plane (`ringbus`), the work-stealing dispatcher (`ringbus-dispatch`)
//! and the coordination plane (`ringbus-cluster`). Adds what only the
//! runtime layer can: an agent registry, the delivery pump, datagram
//! ingress, heartbeat/probe/election loops on tokio, and an async
//! completion bridge for HIGH-priority submissions.
//!
//! ```text
//!  agents ──send──► TransportSelector ──► ring / sq / socket / journal / dma
//!                                              │
//!                   pump thread  ◄─────────────┘
//!                        │ decode + verify
//!                        ├── cluster messages ──► Coordinator (inline)
//!                        └── agent messages ────► Dispatcher ──► on_message
//! ```
//!
//! Every handle is explicit: tests build several fabrics in one process
//! and nothing leaks through globals.

mod agent;
mod config;
mod error;
mod fabric;
mod runtime;
mod wire;

pub use agent::{Agent, AgentId, AgentRegistry};
pub use config::NodeConfig;
pub use error::NodeError;
pub use fabric::Fabric;
pub use runtime::FabricRuntime;
pub use wire::{
    is_cluster_type, ClusterMessage, CLUSTER_TYPE_BASE, MSG_HEALTH_EVENT, MSG_HEARTBEAT,
    MSG_VOTE_GRANT, MSG_VOTE_REQUEST,
};

// The planes a host needs to configure or observe.
pub use ringbus::{Completion, Priority, Route};
pub use ringbus_cluster::{Algorithm, ClusterEvent, ClusterView, NodeId, Role};
pub use ringbus_dispatch::{CoreType, HostHooks, SystemHooks};
