//! Background loops: ingress, heartbeat, probes, elections, delivery pump.
//!
//! The async side (timers, datagram I/O) runs as tokio tasks; the ring
//! pump is a dedicated thread because it polls lock-free structures and
//! must never block the runtime. Shutdown is cooperative: a flag plus a
//! notification, then joins.

use crate::fabric::Fabric;
use crate::error::NodeError;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UnixDatagram;
use tokio::sync::Notify;
use tokio::time::{interval, MissedTickBehavior};

struct Stop {
    flag: AtomicBool,
    notify: Notify,
}

impl Stop {
    fn is_set(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }

    fn set(&self) {
        self.flag.store(true, Ordering::Release);
        self.notify.notify_waiters();
    }
}

/// Running background loops for one fabric.
pub struct FabricRuntime {
    fabric: Arc<Fabric>,
    stop: Arc<Stop>,
    tasks: Vec<tokio::task::JoinHandle<()>>,
    pump: Option<std::thread::JoinHandle<()>>,
}

impl FabricRuntime {
    /// Bind the ingress socket and start every loop.
    pub fn start(fabric: Arc<Fabric>) -> Result<Self, NodeError> {
        let stop = Arc::new(Stop {
            flag: AtomicBool::new(false),
            notify: Notify::new(),
        });

        let ingress_path = fabric
            .config()
            .peer_socket(fabric.node_id().0);
        // A stale socket file from a previous run would fail the bind.
        let _ = std::fs::remove_file(&ingress_path);
        let socket = UnixDatagram::bind(&ingress_path)?;

        let mut tasks = Vec::new();
        tasks.push(tokio::spawn(Self::ingress_loop(
            Arc::clone(&fabric),
            Arc::clone(&stop),
            socket,
        )));
        tasks.push(tokio::spawn(Self::heartbeat_loop(
            Arc::clone(&fabric),
            Arc::clone(&stop),
        )));
        tasks.push(tokio::spawn(Self::probe_loop(
            Arc::clone(&fabric),
            Arc::clone(&stop),
        )));
        tasks.push(tokio::spawn(Self::election_loop(
            Arc::clone(&fabric),
            Arc::clone(&stop),
        )));

        let pump = {
            let fabric = Arc::clone(&fabric);
            let stop = Arc::clone(&stop);
            std::thread::Builder::new()
                .name("rbn-pump".to_string())
                .spawn(move || Self::pump_loop(&fabric, &stop))?
        };

        Ok(Self {
            fabric,
            stop,
            tasks,
            pump: Some(pump),
        })
    }

    /// Stop every loop, then shut the fabric down.
    pub async fn shutdown(mut self) {
        self.stop.set();
        for task in self.tasks.drain(..) {
            let _ = task.await;
        }
        if let Some(pump) = self.pump.take() {
            let _ = pump.join();
        }
        self.fabric.shutdown();
    }

    /// The fabric behind this runtime.
    pub fn fabric(&self) -> &Arc<Fabric> {
        &self.fabric
    }

    async fn ingress_loop(fabric: Arc<Fabric>, stop: Arc<Stop>, socket: UnixDatagram) {
        let max = ringbus::HEADER_LEN + fabric.config().transport.max_payload;
        let mut buf = vec![0u8; max];
        loop {
            tokio::select! {
                _ = stop.notify.notified() => break,
                received = socket.recv(&mut buf) => match received {
                    Ok(len) => {
                        fabric.deliver_frame(&buf[..len]);
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "ingress receive failed");
                    }
                },
            }
            if stop.is_set() {
                break;
            }
        }
    }

    async fn heartbeat_loop(fabric: Arc<Fabric>, stop: Arc<Stop>) {
        let mut ticker = interval(Duration::from_millis(fabric.config().cluster.heartbeat_ms));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = stop.notify.notified() => break,
                _ = ticker.tick() => fabric.heartbeat_tick(),
            }
            if stop.is_set() {
                break;
            }
        }
    }

    async fn probe_loop(fabric: Arc<Fabric>, stop: Arc<Stop>) {
        let mut ticker = interval(Duration::from_millis(fabric.config().cluster.heartbeat_ms));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = stop.notify.notified() => break,
                _ = ticker.tick() => fabric.probe_tick(),
            }
            if stop.is_set() {
                break;
            }
        }
    }

    /// Election timer: 3-5 heartbeat intervals, re-jittered each cycle so
    /// colliding candidates separate.
    async fn election_loop(fabric: Arc<Fabric>, stop: Arc<Stop>) {
        let heartbeat_ms = fabric.config().cluster.heartbeat_ms.max(1);
        loop {
            let jitter = fabric.hooks().random_u64() % (2 * heartbeat_ms);
            let timeout = Duration::from_millis(3 * heartbeat_ms + jitter);
            tokio::select! {
                _ = stop.notify.notified() => break,
                () = tokio::time::sleep(timeout) => fabric.election_tick(),
            }
            if stop.is_set() {
                break;
            }
        }
    }

    /// Single consumer for the ring, submission queue, journal and
    /// staging region. Busy when traffic flows, naps when idle.
    fn pump_loop(fabric: &Arc<Fabric>, stop: &Arc<Stop>) {
        while !stop.is_set() {
            let moved = fabric.pump_once() + fabric.reap_completions();
            if moved == 0 {
                std::thread::sleep(Duration::from_micros(100));
            }
        }
        // Final drain so nothing submitted before the stop flag is lost.
        while fabric.pump_once() + fabric.reap_completions() > 0 {}
    }
}
