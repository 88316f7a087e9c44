//! Property tests for selection fairness, hysteresis and hashing.

use proptest::prelude::*;
use ringbus_cluster::{
    Algorithm, ClusterConfig, HashRing, HealthMonitor, NodeId, NodeSelector,
};
use std::collections::HashMap;
use std::sync::Arc;

fn cluster(nodes: u16) -> (Arc<HealthMonitor>, NodeSelector) {
    let monitor = Arc::new(HealthMonitor::new(&ClusterConfig::default()));
    for i in 0..nodes {
        monitor.register(NodeId(i), format!("peer-{i}"), 0);
    }
    let selector = NodeSelector::new(Arc::clone(&monitor), 100);
    selector.rebuild_ring();
    (monitor, selector)
}

proptest! {
    /// Over L round-robin selections of N healthy nodes, every node is
    /// picked either floor(L/N) or ceil(L/N) times.
    #[test]
    fn prop_round_robin_is_balanced(nodes in 1u16..12, rounds in 1usize..500) {
        let (_, selector) = cluster(nodes);
        let mut counts: HashMap<NodeId, usize> = HashMap::new();
        for _ in 0..rounds {
            let picked = selector.pick(Algorithm::RoundRobin, 0).unwrap();
            *counts.entry(picked).or_insert(0) += 1;
        }

        let floor = rounds / nodes as usize;
        let ceil = rounds.div_ceil(nodes as usize);
        for i in 0..nodes {
            let count = counts.get(&NodeId(i)).copied().unwrap_or(0);
            prop_assert!(
                count == floor || count == ceil,
                "node {i} picked {count} times, expected {floor} or {ceil}"
            );
        }
    }

    /// The health predicate always matches the streak counters.
    #[test]
    fn prop_health_matches_counters(
        outcomes in prop::collection::vec(prop::bool::ANY, 1..100),
    ) {
        let config = ClusterConfig::default();
        let monitor = HealthMonitor::new(&config);
        monitor.register(NodeId(0), "peer", 0);

        for success in outcomes {
            monitor.report(NodeId(0), success, 1_000, 0).unwrap();
            let record = monitor.get(NodeId(0)).unwrap();
            let failures = record.consecutive_failures();
            let successes = record.consecutive_successes();
            let healthy = record.is_healthy(config.failure_threshold, config.recovery_threshold);
            prop_assert_eq!(
                healthy,
                failures < config.failure_threshold
                    && (successes >= config.recovery_threshold || failures == 0),
                "predicate mismatch at failures={} successes={}",
                failures,
                successes
            );
        }
    }

    /// Consistent hashing: same key, same owner, as long as the owner
    /// stays healthy.
    #[test]
    fn prop_consistent_hash_is_deterministic(keys in prop::collection::vec(any::<u64>(), 1..50)) {
        let (_, selector) = cluster(5);
        for key in keys {
            let a = selector.pick(Algorithm::ConsistentHash, key).unwrap();
            let b = selector.pick(Algorithm::ConsistentHash, key).unwrap();
            prop_assert_eq!(a, b);
        }
    }

    /// Removing one node from a V=100 ring relocates only the removed
    /// node's share of the keyspace.
    #[test]
    fn prop_ring_removal_is_minimal(seed_nodes in 3u16..8) {
        let members: Vec<NodeId> = (0..seed_nodes).map(NodeId).collect();
        let mut ring = HashRing::new(100);
        ring.rebuild(members.clone());

        const KEYS: u64 = 10_000;
        let before: Vec<NodeId> = (0..KEYS).map(|k| ring.lookup(k).unwrap()).collect();

        let removed = members[0];
        ring.rebuild(members[1..].to_vec());
        for k in 0..KEYS {
            let now = ring.lookup(k).unwrap();
            if before[k as usize] != removed {
                prop_assert_eq!(before[k as usize], now, "stable key {} moved", k);
            } else {
                prop_assert!(now != removed);
            }
        }
    }
}

#[test]
fn test_adaptive_prefers_lightly_loaded_node() {
    let (monitor, selector) = cluster(2);
    monitor.get(NodeId(0)).unwrap().set_utilization(0.9, 0.9, 0.9, 0.0);
    monitor.get(NodeId(1)).unwrap().set_utilization(0.1, 0.1, 0.1, 0.0);

    let mut b_wins = 0;
    for _ in 0..1_000 {
        if selector.pick(Algorithm::Adaptive, 0).unwrap() == NodeId(1) {
            b_wins += 1;
        }
    }
    assert!(
        b_wins >= 700,
        "adaptive picked the idle node only {b_wins}/1000 times"
    );
}

#[test]
fn test_consistent_hash_stability_under_node_loss() {
    // 4 healthy nodes, V=100, 100k keys: removing one node relocates
    // fewer than 30% of keys.
    let mut ring = HashRing::new(100);
    ring.rebuild([NodeId(1), NodeId(2), NodeId(3), NodeId(4)]);

    const KEYS: u64 = 100_000;
    let before: Vec<NodeId> = (0..KEYS).map(|k| ring.lookup(k).unwrap()).collect();

    ring.rebuild([NodeId(1), NodeId(2), NodeId(3)]);
    let relocated = (0..KEYS)
        .filter(|k| ring.lookup(*k).unwrap() != before[*k as usize])
        .count();

    assert!(
        (relocated as f64) < 0.30 * KEYS as f64,
        "{relocated} of {KEYS} keys relocated"
    );
}
