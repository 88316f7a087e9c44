//! ringbus-cluster - Coordination Plane for the ringbus Fabric
//!
//! Pure data structures and algorithms for cluster awareness: per-node
//! health records with an availability EMA and hysteresis, five
//! load-balanced selection algorithms (including consistent hashing),
//! quorum/split-brain tracking, a leader-election state machine, bounded
//! connection pools, and an AIMD bandwidth governor.
//!
//! The crate does no I/O and spawns no tasks. The node runtime feeds it
//! heartbeats, request outcomes and votes; it answers with selections,
//! snapshots and events. Concurrency is an orthogonal concern kept at the
//! edges: health fields are single-writer atomics, the coordinator
//! publishes immutable snapshots through a wait-free cell, and everything
//! else is a plain method call.

mod config;
mod coordinator;
mod error;
mod events;
mod governor;
mod hash_ring;
mod monitor;
mod node;
mod pool;
mod select;
mod snapshot;

pub use config::ClusterConfig;
pub use coordinator::{ClusterView, Coordinator, Role};
pub use error::ClusterError;
pub use events::{AlertKind, ClusterEvent, ClusterEventFn, PerformanceAlertFn};
pub use governor::BandwidthGovernor;
pub use hash_ring::HashRing;
pub use monitor::{HealthMonitor, HealthTransition};
pub use node::{NodeHealth, NodeId};
pub use pool::{ConnectionPool, PooledConnection};
pub use select::{Algorithm, NodeSelector};
pub use snapshot::SnapshotCell;
