//! The owning fabric handle: every plane composed behind one struct.
//!
//! Nothing here is a process global. Tests build several independent
//! fabrics in one process and tear them down without ordering hazards;
//! callbacks receive whatever context they capture, not a singleton.

use crate::agent::{Agent, AgentId, AgentRegistry};
use crate::config::NodeConfig;
use crate::error::NodeError;
use crate::wire::{is_cluster_type, ClusterMessage};
use ringbus::{
    Completion, Envelope, EnvelopeError, Metadata, Priority, PriorityRing, Route,
    TransportSelector, BROADCAST,
};
use ringbus_cluster::{
    BandwidthGovernor, ClusterEvent, ClusterEventFn, Coordinator, HealthMonitor,
    HealthTransition, NodeId, NodeSelector, PerformanceAlertFn, AlertKind,
};
use ringbus_dispatch::{Dispatcher, DispatchSnapshot, HostHooks};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::oneshot;

/// Messages drained from each transport per pump pass.
const PUMP_BATCH: usize = 64;

/// One fabric node: IPC plane, dispatcher, and coordination plane.
pub struct Fabric {
    config: NodeConfig,
    node_id: NodeId,
    hooks: Arc<dyn HostHooks>,
    ring: Arc<PriorityRing>,
    transport: TransportSelector,
    dispatcher: Mutex<Option<Dispatcher>>,
    monitor: Arc<HealthMonitor>,
    selector: NodeSelector,
    coordinator: Coordinator,
    pool: ringbus_cluster::ConnectionPool,
    governor: BandwidthGovernor,
    agents: Arc<AgentRegistry>,
    completions: Mutex<HashMap<u64, oneshot::Sender<Completion>>>,
    on_cluster_event: Mutex<Option<ClusterEventFn>>,
    on_performance_alert: Mutex<Option<PerformanceAlertFn>>,
    next_message_id: AtomicU32,
    bytes_this_tick: AtomicU64,
    running: AtomicBool,
}

impl Fabric {
    /// Build every plane from `config`. Platform failures abort startup
    /// after each backend's downgrade path has been attempted.
    pub fn new(config: NodeConfig, hooks: Arc<dyn HostHooks>) -> Result<Arc<Self>, NodeError> {
        let now = hooks.now_ns();
        let node_id = NodeId(config.node_id);

        let ring = Arc::new(PriorityRing::new(config.ring));
        let transport = TransportSelector::new(&config.transport_for_node(), Arc::clone(&ring))?;
        let dispatcher = Dispatcher::new(config.dispatcher, Arc::clone(&hooks));

        let cluster_config = config.cluster_for_node();
        let monitor = Arc::new(HealthMonitor::new(&cluster_config));
        let pool = ringbus_cluster::ConnectionPool::new(
            cluster_config.pool_max,
            cluster_config.idle_timeout_ms,
        );
        let governor = BandwidthGovernor::new(&cluster_config, cluster_config.flow_window_max);

        for peer in &config.peers {
            let peer_id = NodeId(*peer);
            monitor.register(peer_id, config.peer_socket(*peer).display().to_string(), now);
            pool.register_node(peer_id);
            governor.register_node(peer_id);
        }

        let selector = NodeSelector::new(Arc::clone(&monitor), cluster_config.virtual_nodes);
        selector.rebuild_ring();

        let coordinator = Coordinator::new(node_id, &cluster_config);
        // The local node is not in its own monitor; quorum math counts it
        // as one implicitly healthy member.
        coordinator.observe_health(monitor.healthy_count() + 1, now);

        Ok(Arc::new(Self {
            config,
            node_id,
            hooks,
            ring,
            transport,
            dispatcher: Mutex::new(Some(dispatcher)),
            monitor,
            selector,
            coordinator,
            pool,
            governor,
            agents: Arc::new(AgentRegistry::new()),
            completions: Mutex::new(HashMap::new()),
            on_cluster_event: Mutex::new(None),
            on_performance_alert: Mutex::new(None),
            next_message_id: AtomicU32::new(1),
            bytes_this_tick: AtomicU64::new(0),
            running: AtomicBool::new(true),
        }))
    }

    // ---------------------------------------------------------------------
    // AGENTS AND CALLBACKS
    // ---------------------------------------------------------------------

    pub fn register_agent(&self, id: AgentId, agent: Box<dyn Agent>) {
        self.agents.register(id, agent);
    }

    pub fn deregister_agent(&self, id: AgentId) -> bool {
        self.agents.deregister(id)
    }

    /// Install the cluster-event callback.
    pub fn set_cluster_event_handler(&self, handler: ClusterEventFn) {
        *self
            .on_cluster_event
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(handler);
    }

    /// Install the performance-alert callback.
    pub fn set_performance_alert_handler(&self, handler: PerformanceAlertFn) {
        *self
            .on_performance_alert
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(handler);
    }

    // ---------------------------------------------------------------------
    // SENDING
    // ---------------------------------------------------------------------

    /// Send to an agent on this node via the transport its priority
    /// selects.
    pub fn send_local(
        &self,
        source: AgentId,
        target: AgentId,
        message_type: u8,
        priority: Priority,
        correlation_id: u32,
        payload: &[u8],
    ) -> Result<Route, NodeError> {
        let frame = self.encode_frame(source, target, message_type, priority, correlation_id, payload)?;
        let route = self.transport.route(priority, &frame)?;
        self.bytes_this_tick.fetch_add(frame.len() as u64, Ordering::Relaxed);
        Ok(route)
    }

    /// Send HIGH-priority work and receive the completion asynchronously.
    ///
    /// When the submission queue is degraded the message still goes out on
    /// the ring and the completion resolves immediately.
    pub fn send_with_completion(
        &self,
        source: AgentId,
        target: AgentId,
        message_type: u8,
        correlation_id: u32,
        payload: &[u8],
    ) -> Result<oneshot::Receiver<Completion>, NodeError> {
        let (tx, rx) = oneshot::channel();
        match self.send_local(source, target, message_type, Priority::High, correlation_id, payload)? {
            Route::Submitted(token) => {
                let mut completions = self
                    .completions
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner);
                completions.insert(token.0, tx);
            }
            _ => {
                let _ = tx.send(Completion::Done);
            }
        }
        Ok(rx)
    }

    /// Send to an agent on another node over the datagram tier.
    pub fn send_to_node(
        &self,
        node: NodeId,
        source: AgentId,
        target: AgentId,
        message_type: u8,
        correlation_id: u32,
        payload: &[u8],
    ) -> Result<(), NodeError> {
        let frame = self.encode_frame(
            source,
            target,
            message_type,
            Priority::Normal,
            correlation_id,
            payload,
        )?;
        self.transport
            .send_datagram(&frame, &self.config.peer_socket(node.0))?;
        self.governor.record_transfer(node, frame.len() as u64);
        self.bytes_this_tick.fetch_add(frame.len() as u64, Ordering::Relaxed);
        Ok(())
    }

    /// Pick a healthy peer with the given (or default) algorithm.
    pub fn pick_node(
        &self,
        algorithm: Option<ringbus_cluster::Algorithm>,
        key: u64,
    ) -> Result<NodeId, NodeError> {
        let algorithm = algorithm.unwrap_or_else(|| self.config.algorithm_default());
        Ok(self.selector.pick(algorithm, key)?)
    }

    fn encode_frame(
        &self,
        source: AgentId,
        target: AgentId,
        message_type: u8,
        priority: Priority,
        correlation_id: u32,
        payload: &[u8],
    ) -> Result<Vec<u8>, EnvelopeError> {
        let envelope = Envelope {
            message_id: self.next_message_id.fetch_add(1, Ordering::Relaxed),
            timestamp_ns: self.hooks.now_ns(),
            source,
            target,
            message_type,
            priority,
            flags: 0,
            core_hint: 0,
            correlation_id,
            metadata: Metadata::default(),
        };
        envelope.encode(payload, self.config.transport.max_payload)
    }

    // ---------------------------------------------------------------------
    // DELIVERY PUMP (single consumer thread)
    // ---------------------------------------------------------------------

    /// Drain every transport once. Returns the number of delivered
    /// messages. Must be called from a single pump thread.
    pub fn pump_once(&self) -> usize {
        let mut delivered = 0;
        let mut buf = vec![0u8; ringbus::HEADER_LEN + self.config.transport.max_payload];

        // Priority ring: strict priority order (or the configured
        // fairness quota) across all six lanes.
        for _ in 0..PUMP_BATCH {
            match self.ring.read_next(&mut buf) {
                Ok(Some((_, len))) => {
                    self.deliver_frame(&buf[..len]);
                    delivered += 1;
                }
                Ok(None) => break,
                Err(e) => {
                    tracing::error!(error = %e, "ring pump misconfigured");
                    break;
                }
            }
        }

        // Submission queue: each consumed entry gets a completion.
        if let Some(sq) = self.transport.submission_queue() {
            for _ in 0..PUMP_BATCH {
                match sq.take(&mut buf) {
                    Ok(Some((token, len))) => {
                        let ok = self.deliver_frame(&buf[..len]);
                        sq.post_completion(
                            token,
                            if ok { Completion::Done } else { Completion::Dropped },
                        );
                        delivered += 1;
                    }
                    Ok(None) => break,
                    Err(_) => break,
                }
            }
        }

        // Journal (LOW) and staging region (BATCH/BACKGROUND).
        for _ in 0..PUMP_BATCH {
            match self.transport.journal().read(&mut buf) {
                Ok(len) => {
                    self.deliver_frame(&buf[..len]);
                    delivered += 1;
                }
                Err(_) => break,
            }
        }
        delivered += self.transport.staging().drain(|frame| {
            self.deliver_frame(frame);
        });

        delivered
    }

    /// Resolve completion futures for reaped submission-queue entries.
    pub fn reap_completions(&self) -> usize {
        let Some(sq) = self.transport.submission_queue() else {
            return 0;
        };
        let mut reaped = 0;
        while let Some((token, outcome)) = sq.reap() {
            let sender = {
                let mut completions = self
                    .completions
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner);
                completions.remove(&token.0)
            };
            if let Some(sender) = sender {
                let _ = sender.send(outcome);
            }
            reaped += 1;
        }
        reaped
    }

    /// Decode one frame and deliver it. Returns false for drops.
    pub fn deliver_frame(&self, frame: &[u8]) -> bool {
        let (envelope, payload) = match Envelope::decode(frame, self.config.transport.max_payload) {
            Ok(decoded) => decoded,
            Err(e) => {
                self.ring.metrics_handle().add_corrupt();
                tracing::debug!(error = %e, "dropped undecodable frame");
                return false;
            }
        };

        if is_cluster_type(envelope.message_type) {
            match ClusterMessage::decode(payload) {
                Ok(msg) => {
                    self.handle_cluster_message(&msg);
                    return true;
                }
                Err(e) => {
                    self.ring.metrics_handle().add_corrupt();
                    tracing::debug!(error = %e, "dropped bad cluster payload");
                    return false;
                }
            }
        }

        // Agent delivery runs on a dispatcher worker of the right class.
        let agents = Arc::clone(&self.agents);
        let payload = payload.to_vec();
        let (source, target, message_type) = (envelope.source, envelope.target, envelope.message_type);
        let submitted = self.with_dispatcher(|d| {
            d.submit(envelope.priority, envelope.correlation_id, move || {
                if target == BROADCAST {
                    agents.deliver_all(source, message_type, &payload);
                } else if !agents.deliver(target, source, message_type, &payload) {
                    tracing::debug!(agent = target, "message for unknown agent dropped");
                }
            })
        });
        match submitted {
            Some(Ok(())) => true,
            Some(Err(e)) => {
                tracing::warn!(error = %e, "delivery dispatch failed");
                false
            }
            None => false,
        }
    }

    // ---------------------------------------------------------------------
    // CLUSTER PLANE
    // ---------------------------------------------------------------------

    /// Report a request outcome against a peer. Health transitions are
    /// forwarded to the coordinator loop as synthetic health events.
    pub fn report_outcome(
        &self,
        node: NodeId,
        success: bool,
        response_time_ns: u64,
    ) -> Result<(), NodeError> {
        let transition = self
            .monitor
            .report(node, success, response_time_ns, self.hooks.now_ns())?;
        if let Some(transition) = transition {
            self.enqueue_health_event(transition);
        }
        Ok(())
    }

    /// Admit a node into the cluster at runtime.
    pub fn add_peer(&self, node: NodeId) {
        let now = self.hooks.now_ns();
        self.monitor
            .register(node, self.config.peer_socket(node.0).display().to_string(), now);
        self.pool.register_node(node);
        self.governor.register_node(node);
        self.selector.rebuild_ring();
        for event in self.coordinator.observe_health(self.quorum_healthy_count(), now) {
            self.emit_cluster_event(event);
        }
        self.emit_cluster_event(ClusterEvent::NodeJoined(node));
    }

    /// Remove a node from the cluster at runtime.
    pub fn remove_peer(&self, node: NodeId) -> Result<(), NodeError> {
        self.monitor.remove(node)?;
        self.pool.remove_node(node);
        self.governor.remove_node(node);
        self.selector.rebuild_ring();
        let now = self.hooks.now_ns();
        self.coordinator.node_failed(node, now);
        for event in self.coordinator.observe_health(self.quorum_healthy_count(), now) {
            self.emit_cluster_event(event);
        }
        self.emit_cluster_event(ClusterEvent::NodeLeft(node));
        Ok(())
    }

    /// Current leadership/quorum view (wait-free).
    pub fn cluster_view(&self) -> Arc<ringbus_cluster::ClusterView> {
        self.coordinator.view()
    }

    /// The settled leader; `ElectionInFlight` while one is being chosen.
    pub fn leader(&self) -> Result<NodeId, NodeError> {
        Ok(self.coordinator.leader()?)
    }

    /// Refuse majority-requiring operations while partitioned.
    pub fn require_quorum(&self) -> Result<(), NodeError> {
        Ok(self.coordinator.require_quorum()?)
    }

    fn handle_cluster_message(&self, msg: &ClusterMessage) {
        let now = self.hooks.now_ns();
        match *msg {
            ClusterMessage::Heartbeat { from, term, is_leader, .. } => {
                if let Ok(Some(transition)) = self.monitor.heartbeat(NodeId(from), now) {
                    self.enqueue_health_event(transition);
                }
                if is_leader {
                    if let Some(event) = self.coordinator.observe_leader(term, NodeId(from), now) {
                        self.emit_cluster_event(event);
                    }
                }
            }
            ClusterMessage::VoteRequest { term, candidate } => {
                if self.coordinator.handle_vote_request(term, NodeId(candidate), now) {
                    let grant = ClusterMessage::VoteGrant {
                        term,
                        voter: self.node_id.0,
                    };
                    self.send_cluster_to(NodeId(candidate), &grant);
                }
            }
            ClusterMessage::VoteGrant { term, voter } => {
                if let Some(event) = self.coordinator.record_vote(term, NodeId(voter), now) {
                    self.emit_cluster_event(event);
                }
            }
            ClusterMessage::HealthEvent { node, healthy } => {
                if healthy {
                    self.coordinator.node_recovered(NodeId(node), now);
                } else {
                    self.coordinator.node_failed(NodeId(node), now);
                }
                for event in self.coordinator.observe_health(self.quorum_healthy_count(), now) {
                    self.emit_cluster_event(event);
                }
            }
        }
    }

    /// Heartbeat tick: broadcast liveness (and leadership) to every peer.
    pub fn heartbeat_tick(&self) {
        let msg = ClusterMessage::Heartbeat {
            from: self.node_id.0,
            term: self.coordinator.current_term(),
            is_leader: self.coordinator.is_leader(),
            healthy_count: self.monitor.healthy_count(),
        };
        for peer in &self.config.peers {
            self.send_cluster_to(NodeId(*peer), &msg);
        }
    }

    /// Probe tick: staleness, idle pool eviction, governor adaptation,
    /// snapshot reclamation, agent ticks.
    pub fn probe_tick(&self) {
        let now = self.hooks.now_ns();

        for transition in self.monitor.probe_stale(now) {
            self.enqueue_health_event(transition);
        }

        self.pool.evict_idle(now);
        self.coordinator.probe_tick(now);

        let used = self.bytes_this_tick.swap(0, Ordering::Relaxed);
        let congestion = self.governor.congestion(used);
        self.governor.adjust(used);
        let threshold = self.config.cluster.congestion_threshold;
        if congestion > threshold {
            self.emit_performance_alert(AlertKind::CongestionHigh, congestion, threshold);
        }

        self.agents.tick_all(now);
    }

    /// Election tick: campaign when no live leader is known.
    pub fn election_tick(&self) {
        if !self.coordinator.needs_election() {
            return;
        }
        let now = self.hooks.now_ns();
        match self.coordinator.start_election(now) {
            Ok(term) => {
                // Our own vote may already be a majority (single-node
                // cluster); otherwise solicit the peers.
                if let Some(event) = self.coordinator.record_vote(term, self.node_id, now) {
                    self.emit_cluster_event(event);
                    return;
                }
                let request = ClusterMessage::VoteRequest {
                    term,
                    candidate: self.node_id.0,
                };
                for peer in &self.config.peers {
                    self.send_cluster_to(NodeId(*peer), &request);
                }
            }
            Err(e) => tracing::debug!(error = %e, "election deferred"),
        }
    }

    /// Queue a health transition onto the background lane; the pump
    /// (acting as the coordinator loop) consumes it.
    fn enqueue_health_event(&self, transition: HealthTransition) {
        let (node, healthy) = match transition {
            HealthTransition::BecameHealthy(n) => (n, true),
            HealthTransition::BecameUnhealthy(n) => (n, false),
        };
        let msg = ClusterMessage::HealthEvent {
            node: node.0,
            healthy,
        };
        match self.encode_cluster_frame(&msg, Priority::Background) {
            Ok(frame) => {
                if self.ring.write_shared(Priority::Background, &frame).is_err() {
                    // Lane saturated: apply inline rather than lose the
                    // transition.
                    self.handle_cluster_message(&msg);
                }
            }
            Err(e) => tracing::error!(error = %e, "health event encode failed"),
        }
        // Selector ring health is checked per lookup, but probation
        // bookkeeping wants to know promptly.
        self.selector.rebuild_ring();
    }

    fn send_cluster_to(&self, node: NodeId, msg: &ClusterMessage) {
        let frame = match self.encode_cluster_frame(msg, Priority::Normal) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::error!(error = %e, "cluster frame encode failed");
                return;
            }
        };
        if let Err(e) = self
            .transport
            .send_datagram(&frame, &self.config.peer_socket(node.0))
        {
            tracing::debug!(peer = %node, error = %e, "cluster send failed");
        }
    }

    fn encode_cluster_frame(
        &self,
        msg: &ClusterMessage,
        priority: Priority,
    ) -> Result<Vec<u8>, NodeError> {
        let payload = msg.encode()?;
        Ok(self.encode_frame(
            self.node_id.0,
            BROADCAST,
            msg.message_type(),
            priority,
            0,
            &payload,
        )?)
    }

    fn emit_cluster_event(&self, event: ClusterEvent) {
        tracing::debug!(?event, "cluster event");
        let handler = {
            let guard = self
                .on_cluster_event
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            guard.clone()
        };
        if let Some(handler) = handler {
            handler(event);
        }
    }

    fn emit_performance_alert(&self, kind: AlertKind, current: f64, threshold: f64) {
        let handler = {
            let guard = self
                .on_performance_alert
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            guard.clone()
        };
        if let Some(handler) = handler {
            handler(kind, current, threshold);
        }
    }

    // ---------------------------------------------------------------------
    // LIFECYCLE AND INTROSPECTION
    // ---------------------------------------------------------------------

    /// This node's id.
    pub fn node_id(&self) -> NodeId {
        self.node_id
    }

    /// The node configuration.
    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    /// Host hooks (clock, RNG, topology).
    pub fn hooks(&self) -> &Arc<dyn HostHooks> {
        &self.hooks
    }

    /// The health monitor.
    pub fn monitor(&self) -> &Arc<HealthMonitor> {
        &self.monitor
    }

    /// IPC-plane counters.
    pub fn ring_metrics(&self) -> ringbus::MetricsSnapshot {
        self.ring.metrics()
    }

    /// Dispatcher counters (zeroed after shutdown).
    pub fn dispatch_metrics(&self) -> DispatchSnapshot {
        self.with_dispatcher(Dispatcher::metrics).unwrap_or_default()
    }

    /// True until shutdown.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Shut down: stop accepting work, drain the dispatcher, notify
    /// agents.
    pub fn shutdown(&self) {
        if self.running.swap(false, Ordering::AcqRel) {
            let dispatcher = {
                let mut guard = self
                    .dispatcher
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner);
                guard.take()
            };
            if let Some(dispatcher) = dispatcher {
                dispatcher.shutdown();
            }
            self.agents.shutdown_all();
        }
    }

    /// Healthy peers plus this node itself.
    fn quorum_healthy_count(&self) -> u32 {
        self.monitor.healthy_count() + 1
    }

    fn with_dispatcher<R>(&self, f: impl FnOnce(&Dispatcher) -> R) -> Option<R> {
        let guard = self
            .dispatcher
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        guard.as_ref().map(f)
    }
}

impl Drop for Fabric {
    fn drop(&mut self) {
        self.shutdown();
    }
}
