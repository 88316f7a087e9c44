//! Bounded per-node connection pools with idle eviction.

use crate::error::ClusterError;
use crate::node::NodeId;
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError, RwLock};

/// A pooled connection handle.
///
/// The pool never creates connections; callers check a fresh one in after
/// receiving `Exhausted` and establishing their own.
pub trait PooledConnection: Send {
    /// False once the transport under the handle died.
    fn is_alive(&self) -> bool {
        true
    }

    /// Release transport resources. Called on eviction and overflow.
    fn close(&mut self) {}
}

struct Slot {
    conn: Box<dyn PooledConnection>,
    checked_in_ns: u64,
}

/// Fixed-size pool per node, one mutex per node's slot array.
pub struct ConnectionPool {
    pools: RwLock<HashMap<NodeId, Mutex<Vec<Slot>>>>,
    max_per_node: usize,
    idle_timeout_ns: u64,
}

impl ConnectionPool {
    pub fn new(max_per_node: usize, idle_timeout_ms: u64) -> Self {
        Self {
            pools: RwLock::new(HashMap::new()),
            max_per_node: max_per_node.max(1),
            idle_timeout_ns: idle_timeout_ms * 1_000_000,
        }
    }

    /// Create the (empty) pool for a node.
    pub fn register_node(&self, node: NodeId) {
        let mut pools = self.pools.write().unwrap_or_else(PoisonError::into_inner);
        pools.entry(node).or_insert_with(|| Mutex::new(Vec::new()));
    }

    /// Drop a node's pool, closing everything in it.
    pub fn remove_node(&self, node: NodeId) {
        let removed = {
            let mut pools = self.pools.write().unwrap_or_else(PoisonError::into_inner);
            pools.remove(&node)
        };
        if let Some(slots) = removed {
            let mut slots = slots.into_inner().unwrap_or_else(PoisonError::into_inner);
            for mut slot in slots.drain(..) {
                slot.conn.close();
            }
        }
    }

    /// Pop a live pooled handle for `node`.
    ///
    /// `Exhausted` means the pool is empty; the caller may create a fresh
    /// connection and later [`release`](Self::release) it.
    pub fn acquire(&self, node: NodeId) -> Result<Box<dyn PooledConnection>, ClusterError> {
        let pools = self.pools.read().unwrap_or_else(PoisonError::into_inner);
        let slots = pools.get(&node).ok_or(ClusterError::NoSuchNode(node))?;
        let mut slots = slots.lock().unwrap_or_else(PoisonError::into_inner);

        while let Some(slot) = slots.pop() {
            let mut conn = slot.conn;
            if conn.is_alive() {
                return Ok(conn);
            }
            conn.close();
        }
        Err(ClusterError::Exhausted { node })
    }

    /// Check a handle back in; overflow beyond the per-node bound closes
    /// the handle instead.
    pub fn release(
        &self,
        node: NodeId,
        mut conn: Box<dyn PooledConnection>,
        now_ns: u64,
    ) -> Result<(), ClusterError> {
        let pools = self.pools.read().unwrap_or_else(PoisonError::into_inner);
        let slots = pools.get(&node).ok_or(ClusterError::NoSuchNode(node))?;
        let mut slots = slots.lock().unwrap_or_else(PoisonError::into_inner);

        if slots.len() >= self.max_per_node || !conn.is_alive() {
            conn.close();
        } else {
            slots.push(Slot {
                conn,
                checked_in_ns: now_ns,
            });
        }
        Ok(())
    }

    /// Close idle handles past the timeout. Called from the probe tick.
    pub fn evict_idle(&self, now_ns: u64) -> usize {
        let pools = self.pools.read().unwrap_or_else(PoisonError::into_inner);
        let mut evicted = 0;
        for slots in pools.values() {
            let mut slots = slots.lock().unwrap_or_else(PoisonError::into_inner);
            let mut keep = Vec::with_capacity(slots.len());
            for mut slot in slots.drain(..) {
                if now_ns.saturating_sub(slot.checked_in_ns) > self.idle_timeout_ns {
                    slot.conn.close();
                    evicted += 1;
                } else {
                    keep.push(slot);
                }
            }
            *slots = keep;
        }
        evicted
    }

    /// Pooled handles currently checked in for `node`.
    pub fn pooled_count(&self, node: NodeId) -> usize {
        let pools = self.pools.read().unwrap_or_else(PoisonError::into_inner);
        pools
            .get(&node)
            .map(|s| s.lock().unwrap_or_else(PoisonError::into_inner).len())
            .unwrap_or(0)
    }
}
