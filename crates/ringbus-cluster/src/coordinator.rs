//! Cluster coordinator: roles, terms, quorum and failover.
//!
//! The coordinator is transport-agnostic: the node runtime feeds it health
//! transitions, heartbeats and votes, and broadcasts whatever messages the
//! returned events imply. It is the single writer of leadership state;
//! selectors and callers read through a wait-free snapshot cell.

use crate::config::ClusterConfig;
use crate::error::ClusterError;
use crate::events::ClusterEvent;
use crate::node::NodeId;
use crate::snapshot::SnapshotCell;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError};

/// Role in the election state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Follower,
    Candidate,
    Leader,
}

/// Immutable leadership/quorum snapshot, read wait-free by selectors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterView {
    pub term: u64,
    pub role: Role,
    pub leader: Option<NodeId>,
    pub healthy_count: u32,
    pub quorum_size: u32,
    pub partitioned: bool,
}

/// Writer-side election state. The coordinator loop is the only mutator;
/// the mutex keeps incidental callers (tests, shutdown) sound.
struct ElectionState {
    term: u64,
    role: Role,
    leader: Option<NodeId>,
    /// Vote granted per term; at most one, which is what bounds the
    /// cluster to one leader per term.
    voted_for: HashMap<u64, NodeId>,
    /// Votes received while campaigning in `term`.
    votes: HashSet<NodeId>,
    healthy_count: u32,
    partitioned: bool,
    /// Recovering nodes and their probation start.
    recovering: HashMap<NodeId, u64>,
}

/// Coordinator for one fabric node.
pub struct Coordinator {
    me: NodeId,
    cluster_size: u32,
    quorum_size: u32,
    probation_ns: u64,
    probation_share: f64,
    state: Mutex<ElectionState>,
    view: SnapshotCell<ClusterView>,
}

impl Coordinator {
    pub fn new(me: NodeId, config: &ClusterConfig) -> Self {
        let initial = ClusterView {
            term: 0,
            role: Role::Follower,
            leader: None,
            healthy_count: 0,
            quorum_size: config.quorum_size,
            partitioned: false,
        };
        Self {
            me,
            cluster_size: config.cluster_size,
            quorum_size: config.quorum_size,
            probation_ns: config.probation_ns(),
            probation_share: config.probation_share,
            state: Mutex::new(ElectionState {
                term: 0,
                role: Role::Follower,
                leader: None,
                voted_for: HashMap::new(),
                votes: HashSet::new(),
                healthy_count: 0,
                partitioned: false,
                recovering: HashMap::new(),
            }),
            // Two heartbeats of grace is far beyond any reader's critical
            // section.
            view: SnapshotCell::new(initial, 2 * config.heartbeat_ns()),
        }
    }

    /// Wait-free view for selectors and callers.
    pub fn view(&self) -> Arc<ClusterView> {
        self.view.load()
    }

    /// This node's id.
    pub fn id(&self) -> NodeId {
        self.me
    }

    // ---------------------------------------------------------------------
    // HEALTH AND QUORUM
    // ---------------------------------------------------------------------

    /// Feed the monitor's healthy count after any health transition.
    /// Emits partition events on edges only, never spuriously.
    pub fn observe_health(&self, healthy_count: u32, now_ns: u64) -> Vec<ClusterEvent> {
        let mut state = self.lock();
        state.healthy_count = healthy_count;
        let partitioned = healthy_count < self.quorum_size;

        let mut events = Vec::new();
        if partitioned && !state.partitioned {
            state.partitioned = true;
            tracing::warn!(healthy_count, quorum = self.quorum_size, "partition detected");
            events.push(ClusterEvent::PartitionDetected);
        } else if !partitioned && state.partitioned {
            state.partitioned = false;
            tracing::warn!(healthy_count, quorum = self.quorum_size, "partition recovered");
            events.push(ClusterEvent::PartitionRecovered);
        }
        self.publish(&state, now_ns);
        events
    }

    /// Refuse majority-requiring operations while partitioned. Reads are
    /// not gated.
    pub fn require_quorum(&self) -> Result<(), ClusterError> {
        let state = self.lock();
        if state.partitioned {
            return Err(ClusterError::PartitionDetected {
                healthy: state.healthy_count,
                quorum: self.quorum_size,
            });
        }
        Ok(())
    }

    /// A node finished its recovery window; start its probation.
    pub fn node_recovered(&self, node: NodeId, now_ns: u64) {
        let mut state = self.lock();
        state.recovering.insert(node, now_ns);
    }

    /// A node went unhealthy. If it held leadership, clear it; the caller
    /// runs an election when its timeout fires.
    pub fn node_failed(&self, node: NodeId, now_ns: u64) {
        let mut state = self.lock();
        state.recovering.remove(&node);
        if state.leader == Some(node) {
            tracing::warn!(leader = %node, "leader lost, awaiting election");
            state.leader = None;
            self.publish(&state, now_ns);
        }
    }

    /// Fraction of its fair traffic share a node should receive now.
    /// Recovering nodes are capped until probation ends.
    pub fn traffic_share(&self, node: NodeId, now_ns: u64) -> f64 {
        let state = self.lock();
        match state.recovering.get(&node) {
            Some(started) if now_ns.saturating_sub(*started) < self.probation_ns => {
                self.probation_share
            }
            _ => 1.0,
        }
    }

    /// Drop probation entries whose window has passed.
    pub fn probe_tick(&self, now_ns: u64) {
        let mut state = self.lock();
        let probation_ns = self.probation_ns;
        state
            .recovering
            .retain(|_, started| now_ns.saturating_sub(*started) < probation_ns);
        drop(state);
        self.view.reclaim(now_ns);
    }

    // ---------------------------------------------------------------------
    // ELECTIONS
    // ---------------------------------------------------------------------

    /// True when no live leader is known (the election timer should run).
    pub fn needs_election(&self) -> bool {
        let state = self.lock();
        state.role != Role::Leader && state.leader.is_none()
    }

    /// Election timeout fired: become candidate, vote for self.
    ///
    /// Returns the new term for the caller to broadcast vote requests in,
    /// or an error while the cluster lacks quorum (leadership changes are
    /// majority operations).
    pub fn start_election(&self, now_ns: u64) -> Result<u64, ClusterError> {
        let mut state = self.lock();
        if state.partitioned {
            return Err(ClusterError::PartitionDetected {
                healthy: state.healthy_count,
                quorum: self.quorum_size,
            });
        }
        state.term += 1;
        state.role = Role::Candidate;
        state.leader = None;
        state.votes.clear();
        state.votes.insert(self.me);
        let term = state.term;
        state.voted_for.insert(term, self.me);
        tracing::debug!(term, "starting election");
        self.publish(&state, now_ns);
        Ok(term)
    }

    /// A candidate asked for our vote. At most one grant per term.
    pub fn handle_vote_request(&self, term: u64, candidate: NodeId, now_ns: u64) -> bool {
        let mut state = self.lock();
        if term < state.term {
            return false;
        }
        if term > state.term {
            Self::step_down(&mut state, term);
            self.publish(&state, now_ns);
        }
        match state.voted_for.get(&term) {
            Some(existing) => *existing == candidate,
            None => {
                state.voted_for.insert(term, candidate);
                true
            }
        }
    }

    /// A vote arrived for our candidacy. Majority promotes us to leader.
    pub fn record_vote(&self, term: u64, from: NodeId, now_ns: u64) -> Option<ClusterEvent> {
        let mut state = self.lock();
        if state.role != Role::Candidate || term != state.term {
            return None;
        }
        state.votes.insert(from);
        if state.votes.len() as u32 * 2 > self.cluster_size {
            state.role = Role::Leader;
            state.leader = Some(self.me);
            tracing::debug!(term, "won election");
            self.publish(&state, now_ns);
            return Some(ClusterEvent::BecameLeader(self.me));
        }
        None
    }

    /// A leader heartbeat arrived. Equal or higher terms assert
    /// leadership; higher terms also demote us.
    pub fn observe_leader(&self, term: u64, leader: NodeId, now_ns: u64) -> Option<ClusterEvent> {
        let mut state = self.lock();
        if term < state.term {
            return None;
        }

        let was = state.role;
        if term > state.term {
            Self::step_down(&mut state, term);
        }
        state.role = Role::Follower;
        state.leader = Some(leader);
        self.publish(&state, now_ns);

        if was == Role::Leader || was == Role::Candidate {
            tracing::debug!(term, leader = %leader, "stepping down");
            Some(ClusterEvent::BecameFollower(self.me))
        } else {
            None
        }
    }

    /// The settled leader, or `ElectionInFlight` while none is known.
    pub fn leader(&self) -> Result<NodeId, ClusterError> {
        let state = self.lock();
        match state.leader {
            Some(leader) => Ok(leader),
            None => Err(ClusterError::ElectionInFlight { term: state.term }),
        }
    }

    /// Current term (reads the writer state, not the snapshot).
    pub fn current_term(&self) -> u64 {
        self.lock().term
    }

    /// True when this node currently leads.
    pub fn is_leader(&self) -> bool {
        self.lock().role == Role::Leader
    }

    fn step_down(state: &mut ElectionState, term: u64) {
        state.term = term;
        state.role = Role::Follower;
        state.votes.clear();
    }

    fn publish(&self, state: &ElectionState, now_ns: u64) {
        self.view.publish(
            ClusterView {
                term: state.term,
                role: state.role,
                leader: state.leader,
                healthy_count: state.healthy_count,
                quorum_size: self.quorum_size,
                partitioned: state.partitioned,
            },
            now_ns,
        );
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ElectionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(cluster: u32, quorum: u32) -> ClusterConfig {
        ClusterConfig {
            cluster_size: cluster,
            quorum_size: quorum,
            ..ClusterConfig::default()
        }
    }

    #[test]
    fn test_majority_elects_leader() {
        let c = Coordinator::new(NodeId(1), &config(5, 3));
        c.observe_health(5, 0);
        let term = c.start_election(0).unwrap();

        assert_eq!(c.record_vote(term, NodeId(2), 0), None); // 2 of 5
        let event = c.record_vote(term, NodeId(3), 0); // 3 of 5: majority
        assert_eq!(event, Some(ClusterEvent::BecameLeader(NodeId(1))));
        assert!(c.is_leader());
        assert_eq!(c.view().leader, Some(NodeId(1)));
    }

    #[test]
    fn test_one_vote_per_term() {
        let c = Coordinator::new(NodeId(1), &config(5, 3));
        assert!(c.handle_vote_request(1, NodeId(2), 0));
        assert!(!c.handle_vote_request(1, NodeId(3), 0), "second grant in one term");
        // Re-request from the same candidate is idempotent.
        assert!(c.handle_vote_request(1, NodeId(2), 0));
        // A later term opens a fresh vote.
        assert!(c.handle_vote_request(2, NodeId(3), 0));
    }

    #[test]
    fn test_higher_term_demotes_leader() {
        let c = Coordinator::new(NodeId(1), &config(3, 2));
        c.observe_health(3, 0);
        let term = c.start_election(0).unwrap();
        c.record_vote(term, NodeId(2), 0);
        assert!(c.is_leader());

        let event = c.observe_leader(term + 1, NodeId(3), 0);
        assert_eq!(event, Some(ClusterEvent::BecameFollower(NodeId(1))));
        assert!(!c.is_leader());
        assert_eq!(c.view().leader, Some(NodeId(3)));
    }

    #[test]
    fn test_leader_lookup_during_election() {
        let c = Coordinator::new(NodeId(1), &config(3, 2));
        c.observe_health(3, 0);
        assert!(matches!(
            c.leader(),
            Err(ClusterError::ElectionInFlight { term: 0 })
        ));

        let term = c.start_election(0).unwrap();
        assert!(matches!(c.leader(), Err(ClusterError::ElectionInFlight { .. })));
        c.record_vote(term, NodeId(2), 0);
        assert_eq!(c.leader(), Ok(NodeId(1)));
    }

    #[test]
    fn test_partition_events_are_edge_triggered() {
        let c = Coordinator::new(NodeId(1), &config(5, 3));
        assert_eq!(c.observe_health(5, 0), vec![]);
        assert_eq!(c.observe_health(2, 0), vec![ClusterEvent::PartitionDetected]);
        // Still partitioned: no repeat.
        assert_eq!(c.observe_health(1, 0), vec![]);
        assert_eq!(c.observe_health(3, 0), vec![ClusterEvent::PartitionRecovered]);
        assert_eq!(c.observe_health(4, 0), vec![]);
    }

    #[test]
    fn test_partition_refuses_elections() {
        let c = Coordinator::new(NodeId(1), &config(5, 3));
        c.observe_health(2, 0);
        assert!(matches!(
            c.start_election(0),
            Err(ClusterError::PartitionDetected { healthy: 2, quorum: 3 })
        ));
        assert!(c.require_quorum().is_err());
    }

    #[test]
    fn test_single_node_cluster_never_partitions() {
        let c = Coordinator::new(NodeId(1), &config(1, 1));
        assert_eq!(c.observe_health(1, 0), vec![]);
        let term = c.start_election(0).unwrap();
        // Self-vote alone is a majority of one.
        assert_eq!(
            c.record_vote(term, NodeId(1), 0),
            Some(ClusterEvent::BecameLeader(NodeId(1)))
        );
        assert_eq!(c.observe_health(1, 0), vec![]);
    }

    #[test]
    fn test_probation_caps_traffic_share() {
        let cfg = ClusterConfig {
            probation_ms: 1,
            probation_share: 0.25,
            ..config(3, 2)
        };
        let c = Coordinator::new(NodeId(1), &cfg);
        c.node_recovered(NodeId(2), 0);
        assert!((c.traffic_share(NodeId(2), 0) - 0.25).abs() < 1e-9);
        assert!((c.traffic_share(NodeId(3), 0) - 1.0).abs() < 1e-9);

        // Window passed: full share again.
        assert!((c.traffic_share(NodeId(2), 2_000_000) - 1.0).abs() < 1e-9);
        c.probe_tick(2_000_000);
        assert!((c.traffic_share(NodeId(2), 0) - 1.0).abs() < 1e-9);
    }
}
