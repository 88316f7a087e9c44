//! End-to-end fabric scenarios: local delivery, cross-node round trips,
//! completions, partitions and leader failover.

use ringbus_node::{
    Agent, AgentId, ClusterEvent, Completion, Fabric, FabricRuntime, NodeConfig, NodeId,
    Priority, Route, SystemHooks,
};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{mpsc, Arc, Weak};
use std::time::{Duration, Instant};

/// Unique namespace per test so parallel tests never share sockets.
fn namespace(tag: &str) -> String {
    static COUNTER: AtomicU32 = AtomicU32::new(0);
    format!(
        "rbe2e-{}-{}-{}",
        tag,
        std::process::id(),
        COUNTER.fetch_add(1, Ordering::Relaxed)
    )
}

fn small_config(namespace: &str, node_id: u16, peers: Vec<u16>) -> NodeConfig {
    let mut config = NodeConfig {
        namespace: namespace.to_string(),
        node_id,
        cluster_size: peers.len() as u32 + 1,
        quorum_size: (peers.len() as u32 + 1) / 2 + 1,
        peers,
        ..NodeConfig::default()
    };
    config.transport.region_bytes = 1 << 20;
    config.transport.journal_bytes = 1 << 20;
    config.transport.dma_bytes = 1 << 20;
    config.transport.max_payload = 4 << 10;
    config.cluster.heartbeat_ms = 50;
    config
}

/// Records every message and optionally echoes type+1 back to the sender
/// node.
struct Recorder {
    seen: mpsc::Sender<(AgentId, u8, Vec<u8>)>,
    echo_to: Option<(Weak<Fabric>, NodeId)>,
    my_id: AgentId,
}

impl Agent for Recorder {
    fn on_message(&mut self, source: AgentId, message_type: u8, payload: &[u8]) {
        let _ = self.seen.send((source, message_type, payload.to_vec()));
        if let Some((fabric, peer)) = &self.echo_to {
            if let Some(fabric) = fabric.upgrade() {
                let _ = fabric.send_to_node(
                    *peer,
                    self.my_id,
                    source,
                    message_type.wrapping_add(1),
                    0,
                    payload,
                );
            }
        }
    }
}

#[test]
fn test_critical_local_delivery_through_ring() {
    let ns = namespace("ring");
    let fabric = Fabric::new(
        small_config(&ns, 0, vec![]),
        Arc::new(SystemHooks::with_seed(1)),
    )
    .unwrap();

    let (tx, rx) = mpsc::channel();
    fabric.register_agent(
        7,
        Box::new(Recorder {
            seen: tx,
            echo_to: None,
            my_id: 7,
        }),
    );

    let route = fabric
        .send_local(1, 7, 42, Priority::Critical, 0, b"halt")
        .unwrap();
    assert_eq!(route, Route::Ring);

    // Drive the pump by hand (no runtime in this test).
    let deadline = Instant::now() + Duration::from_secs(2);
    loop {
        fabric.pump_once();
        match rx.try_recv() {
            Ok((source, message_type, payload)) => {
                assert_eq!((source, message_type), (1, 42));
                assert_eq!(payload, b"halt");
                break;
            }
            Err(_) => {
                assert!(Instant::now() < deadline, "message never delivered");
                std::thread::sleep(Duration::from_millis(1));
            }
        }
    }
    assert_eq!(fabric.ring_metrics().corrupt_messages, 0);
    fabric.shutdown();
}

#[test]
fn test_broadcast_reaches_every_agent() {
    let ns = namespace("bcast");
    let fabric = Fabric::new(
        small_config(&ns, 0, vec![]),
        Arc::new(SystemHooks::with_seed(2)),
    )
    .unwrap();

    let (tx, rx) = mpsc::channel();
    for id in [10u16, 11, 12] {
        fabric.register_agent(
            id,
            Box::new(Recorder {
                seen: tx.clone(),
                echo_to: None,
                my_id: id,
            }),
        );
    }

    fabric
        .send_local(1, ringbus::BROADCAST, 5, Priority::Critical, 0, b"all")
        .unwrap();

    let deadline = Instant::now() + Duration::from_secs(2);
    let mut received = 0;
    while received < 3 {
        fabric.pump_once();
        while rx.try_recv().is_ok() {
            received += 1;
        }
        assert!(Instant::now() < deadline, "broadcast incomplete: {received}/3");
        std::thread::sleep(Duration::from_millis(1));
    }
    fabric.shutdown();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_high_priority_completion_resolves() {
    let ns = namespace("sq");
    let fabric = Fabric::new(
        small_config(&ns, 0, vec![]),
        Arc::new(SystemHooks::with_seed(3)),
    )
    .unwrap();

    let (tx, _rx) = mpsc::channel();
    fabric.register_agent(
        3,
        Box::new(Recorder {
            seen: tx,
            echo_to: None,
            my_id: 3,
        }),
    );

    let completion = fabric
        .send_with_completion(1, 3, 9, 0, b"rpc")
        .unwrap();

    // Pump from a helper thread the way the runtime would.
    let pump_fabric = Arc::clone(&fabric);
    let pump = std::thread::spawn(move || {
        let deadline = Instant::now() + Duration::from_secs(2);
        while Instant::now() < deadline {
            if pump_fabric.pump_once() + pump_fabric.reap_completions() == 0 {
                std::thread::sleep(Duration::from_millis(1));
            }
        }
    });

    let outcome = tokio::time::timeout(Duration::from_secs(2), completion)
        .await
        .expect("completion timed out")
        .expect("completion channel closed");
    assert_eq!(outcome, Completion::Done);
    pump.join().unwrap();
    fabric.shutdown();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_cross_node_ping_pong() {
    let ns = namespace("pong");
    let hooks_a = Arc::new(SystemHooks::with_seed(10));
    let hooks_b = Arc::new(SystemHooks::with_seed(11));

    let fabric_a = Fabric::new(small_config(&ns, 1, vec![2]), hooks_a).unwrap();
    let fabric_b = Fabric::new(small_config(&ns, 2, vec![1]), hooks_b).unwrap();

    let (tx_a, rx_a) = mpsc::channel();
    fabric_a.register_agent(
        10,
        Box::new(Recorder {
            seen: tx_a,
            echo_to: None,
            my_id: 10,
        }),
    );

    let (tx_b, _rx_b) = mpsc::channel();
    fabric_b.register_agent(
        20,
        Box::new(Recorder {
            seen: tx_b,
            echo_to: Some((Arc::downgrade(&fabric_b), NodeId(1))),
            my_id: 20,
        }),
    );

    let runtime_a = FabricRuntime::start(Arc::clone(&fabric_a)).unwrap();
    let runtime_b = FabricRuntime::start(Arc::clone(&fabric_b)).unwrap();

    // Node 1, agent 10 pings node 2, agent 20; the recorder on node 2
    // echoes type+1 back to agent 10 on node 1.
    fabric_a
        .send_to_node(NodeId(2), 10, 20, 100, 77, b"ping")
        .unwrap();

    let reply = tokio::task::spawn_blocking(move || rx_a.recv_timeout(Duration::from_secs(5)))
        .await
        .unwrap()
        .expect("no pong");
    assert_eq!(reply, (20, 101, b"ping".to_vec()));

    runtime_a.shutdown().await;
    runtime_b.shutdown().await;
}

#[test]
fn test_partition_detected_and_recovered() {
    let ns = namespace("part");
    // Cluster of five: this node plus four peers, quorum 3.
    let fabric = Fabric::new(
        small_config(&ns, 0, vec![1, 2, 3, 4]),
        Arc::new(SystemHooks::with_seed(4)),
    )
    .unwrap();

    let (tx, rx) = mpsc::channel();
    fabric.set_cluster_event_handler(Arc::new(move |event| {
        let _ = tx.send(event);
    }));

    let f_thresh = fabric.config().cluster.failure_threshold;
    let r_thresh = fabric.config().cluster.recovery_threshold;

    // Demote three of four peers: healthy goes 5 -> 2, under quorum 3.
    for peer in [1u16, 2, 3] {
        for _ in 0..f_thresh {
            fabric.report_outcome(NodeId(peer), false, 0).unwrap();
        }
    }
    while fabric.pump_once() > 0 {}
    let mut events: Vec<ClusterEvent> = rx.try_iter().collect();
    assert_eq!(
        events,
        vec![ClusterEvent::PartitionDetected],
        "expected exactly one partition event"
    );
    assert!(fabric.require_quorum().is_err());
    assert!(fabric.cluster_view().partitioned);

    // Restore one peer: healthy back to 3, quorum holds again.
    for _ in 0..r_thresh {
        fabric.report_outcome(NodeId(1), true, 0).unwrap();
    }
    while fabric.pump_once() > 0 {}
    events = rx.try_iter().collect();
    assert_eq!(events, vec![ClusterEvent::PartitionRecovered]);
    assert!(fabric.require_quorum().is_ok());
    fabric.shutdown();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_leader_failover() {
    let ns = namespace("elect");
    let ids = [1u16, 2, 3];

    let mut fabrics = Vec::new();
    let mut runtimes = Vec::new();
    let (tx, rx) = mpsc::channel::<(u16, ClusterEvent)>();

    for (i, id) in ids.iter().enumerate() {
        let peers: Vec<u16> = ids.iter().copied().filter(|p| p != id).collect();
        let fabric = Fabric::new(
            small_config(&ns, *id, peers),
            Arc::new(SystemHooks::with_seed(20 + i as u64)),
        )
        .unwrap();
        let tx = tx.clone();
        let me = *id;
        fabric.set_cluster_event_handler(Arc::new(move |event| {
            let _ = tx.send((me, event));
        }));
        runtimes.push(FabricRuntime::start(Arc::clone(&fabric)).unwrap());
        fabrics.push(fabric);
    }

    // Some node wins the initial election.
    let first_leader = wait_for_leader(&rx, Duration::from_secs(10), None);

    // Kill the leader's runtime; its silence must trigger a new election
    // on the survivors.
    let leader_pos = ids.iter().position(|id| *id == first_leader).unwrap();
    runtimes.remove(leader_pos).shutdown().await;
    let dead = fabrics.remove(leader_pos);
    drop(dead);

    let second_leader = wait_for_leader(&rx, Duration::from_secs(15), Some(first_leader));
    assert_ne!(second_leader, first_leader);

    for runtime in runtimes {
        runtime.shutdown().await;
    }
}

/// Wait until any node not equal to `excluding` reports BecameLeader.
fn wait_for_leader(
    rx: &mpsc::Receiver<(u16, ClusterEvent)>,
    timeout: Duration,
    excluding: Option<u16>,
) -> u16 {
    let deadline = Instant::now() + timeout;
    loop {
        let remaining = deadline
            .checked_duration_since(Instant::now())
            .expect("no leader elected in time");
        if let Ok((node, event)) = rx.recv_timeout(remaining) {
            if let ClusterEvent::BecameLeader(leader) = event {
                if excluding != Some(leader.0) {
                    let _ = node;
                    return leader.0;
                }
            }
        }
    }
}

#[test]
fn test_unknown_agent_messages_are_dropped_quietly() {
    let ns = namespace("drop");
    let fabric = Fabric::new(
        small_config(&ns, 0, vec![]),
        Arc::new(SystemHooks::with_seed(5)),
    )
    .unwrap();

    fabric
        .send_local(1, 99, 1, Priority::Critical, 0, b"void")
        .unwrap();
    // Pumping must neither panic nor corrupt anything.
    let deadline = Instant::now() + Duration::from_millis(500);
    while Instant::now() < deadline && fabric.pump_once() == 0 {
        std::thread::sleep(Duration::from_millis(1));
    }
    assert_eq!(fabric.ring_metrics().corrupt_messages, 0);
    fabric.shutdown();
}
