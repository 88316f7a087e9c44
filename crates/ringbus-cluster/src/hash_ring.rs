//! Consistent-hash ring with virtual nodes.

use crate::node::NodeId;
use std::collections::hash_map::DefaultHasher;
use std::collections::BTreeMap;
use std::hash::{Hash, Hasher};

/// Ring of `virtual_nodes` positions per physical node.
///
/// A key maps to the first virtual position at or after its hash,
/// wrapping at the top of the u64 space. Membership changes rebuild the
/// ring; lookups are read-only.
#[derive(Debug, Default, Clone)]
pub struct HashRing {
    points: BTreeMap<u64, NodeId>,
    virtual_nodes: usize,
}

impl HashRing {
    pub fn new(virtual_nodes: usize) -> Self {
        Self {
            points: BTreeMap::new(),
            virtual_nodes: virtual_nodes.max(1),
        }
    }

    /// Rebuild the ring from the current membership.
    pub fn rebuild(&mut self, nodes: impl IntoIterator<Item = NodeId>) {
        self.points.clear();
        for node in nodes {
            for replica in 0..self.virtual_nodes {
                self.points.insert(Self::position(node, replica), node);
            }
        }
    }

    /// Node owning `key`, or `None` on an empty ring.
    pub fn lookup(&self, key: u64) -> Option<NodeId> {
        let hashed = Self::mix(key);
        self.points
            .range(hashed..)
            .next()
            .or_else(|| self.points.iter().next())
            .map(|(_, node)| *node)
    }

    /// True when no node occupies the ring.
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Virtual position for one replica of a node.
    fn position(node: NodeId, replica: usize) -> u64 {
        let mut hasher = DefaultHasher::new();
        (node.0, replica as u64).hash(&mut hasher);
        hasher.finish()
    }

    /// Scramble the key so sequential ids spread across the ring.
    fn mix(key: u64) -> u64 {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        hasher.finish()
    }
}
