//! Congestion-adaptive flow windows and batch sizing.
//!
//! Additive-increase / multiplicative-decrease: above the congestion
//! threshold the flow window shrinks by 10% per tick (floored at the
//! configured minimum, itself at least 25% of the maximum); at or below
//! it, the window grows by 5% (capped at the maximum). Per-node batch
//! sizes adapt with the same rule inside their own bounds.

use crate::config::ClusterConfig;
use crate::node::NodeId;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

/// Throughput samples kept per node.
const SAMPLE_WINDOW: usize = 32;

struct NodeFlow {
    samples: [u64; SAMPLE_WINDOW],
    count: usize,
    batch_size: usize,
}

/// Global flow window plus per-node batch tuning.
pub struct BandwidthGovernor {
    /// Current window, bytes per tick.
    flow_window: AtomicU64,
    window_max: u64,
    window_min: u64,
    /// Bytes the fabric may move per tick, for the congestion ratio.
    capacity_per_tick: u64,
    congestion_threshold: f64,
    batch_min: usize,
    batch_max: usize,
    nodes: Mutex<HashMap<NodeId, NodeFlow>>,
}

impl BandwidthGovernor {
    pub fn new(config: &ClusterConfig, capacity_per_tick: u64) -> Self {
        // The floor is never below a quarter of the configured maximum.
        let window_min = config.flow_window_min.max(config.flow_window_max / 4);
        Self {
            flow_window: AtomicU64::new(config.flow_window_max),
            window_max: config.flow_window_max,
            window_min,
            capacity_per_tick: capacity_per_tick.max(1),
            congestion_threshold: config.congestion_threshold,
            batch_min: config.batch_min,
            batch_max: config.batch_max,
            nodes: Mutex::new(HashMap::new()),
        }
    }

    pub fn register_node(&self, node: NodeId) {
        let mut nodes = self.nodes.lock().unwrap_or_else(PoisonError::into_inner);
        nodes.entry(node).or_insert_with(|| NodeFlow {
            samples: [0; SAMPLE_WINDOW],
            count: 0,
            batch_size: self.batch_max,
        });
    }

    pub fn remove_node(&self, node: NodeId) {
        let mut nodes = self.nodes.lock().unwrap_or_else(PoisonError::into_inner);
        nodes.remove(&node);
    }

    /// Record bytes moved to `node` during the current tick.
    pub fn record_transfer(&self, node: NodeId, bytes: u64) {
        let mut nodes = self.nodes.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(flow) = nodes.get_mut(&node) {
            flow.samples[flow.count % SAMPLE_WINDOW] = bytes;
            flow.count += 1;
        }
    }

    /// Congestion ratio for a tick that moved `used_bytes`.
    pub fn congestion(&self, used_bytes: u64) -> f64 {
        (used_bytes as f64 / self.capacity_per_tick as f64).clamp(0.0, 1.0)
    }

    /// Apply one adaptation tick. Returns the new flow window.
    pub fn adjust(&self, used_bytes: u64) -> u64 {
        let congestion = self.congestion(used_bytes);
        let current = self.flow_window.load(Ordering::Relaxed);
        let next = if congestion > self.congestion_threshold {
            ((current as f64 * 0.9) as u64).max(self.window_min)
        } else {
            ((current as f64 * 1.05) as u64).min(self.window_max)
        };
        self.flow_window.store(next, Ordering::Relaxed);

        let shrink = congestion > self.congestion_threshold;
        let mut nodes = self.nodes.lock().unwrap_or_else(PoisonError::into_inner);
        for flow in nodes.values_mut() {
            flow.batch_size = if shrink {
                ((flow.batch_size as f64 * 0.9) as usize).max(self.batch_min)
            } else {
                // max(+1) keeps small batches growing despite truncation.
                ((flow.batch_size as f64 * 1.05) as usize)
                    .max(flow.batch_size + 1)
                    .min(self.batch_max)
            };
        }
        next
    }

    /// Current flow window in bytes per tick.
    pub fn flow_window(&self) -> u64 {
        self.flow_window.load(Ordering::Relaxed)
    }

    /// Current batch size for `node`, within the configured bounds.
    pub fn batch_size(&self, node: NodeId) -> usize {
        let nodes = self.nodes.lock().unwrap_or_else(PoisonError::into_inner);
        nodes.get(&node).map_or(self.batch_min, |f| f.batch_size)
    }

    /// Mean of the node's recent per-tick transfer samples.
    pub fn node_throughput(&self, node: NodeId) -> u64 {
        let nodes = self.nodes.lock().unwrap_or_else(PoisonError::into_inner);
        nodes.get(&node).map_or(0, |flow| {
            let n = flow.count.min(SAMPLE_WINDOW);
            if n == 0 {
                return 0;
            }
            flow.samples[..n].iter().sum::<u64>() / n as u64
        })
    }
}
