//! Agents: the fabric's unit of business logic.
//!
//! An agent is anything implementing the small capability set below; the
//! fabric holds boxed handles keyed by agent id and never knows what kind
//! of agent sits behind one.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError, RwLock};

/// Agent identifier, unique per node.
pub type AgentId = u16;

/// Capability set every agent implements.
pub trait Agent: Send {
    /// A verified envelope payload addressed to this agent arrived.
    /// Runs on a dispatcher worker.
    fn on_message(&mut self, source: AgentId, message_type: u8, payload: &[u8]);

    /// Periodic maintenance tick.
    fn on_tick(&mut self, _now_ns: u64) {}

    /// The fabric is shutting down.
    fn on_shutdown(&mut self) {}
}

/// Registry of boxed agents.
///
/// Delivery locks one agent at a time, so two agents process messages
/// concurrently while a single agent sees messages serially.
#[derive(Default)]
pub struct AgentRegistry {
    agents: RwLock<HashMap<AgentId, Mutex<Box<dyn Agent>>>>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `agent` under `id`, replacing any previous holder.
    pub fn register(&self, id: AgentId, agent: Box<dyn Agent>) {
        let mut agents = self.agents.write().unwrap_or_else(PoisonError::into_inner);
        agents.insert(id, Mutex::new(agent));
    }

    /// Remove the agent under `id`, invoking its shutdown hook.
    pub fn deregister(&self, id: AgentId) -> bool {
        let removed = {
            let mut agents = self.agents.write().unwrap_or_else(PoisonError::into_inner);
            agents.remove(&id)
        };
        match removed {
            Some(agent) => {
                agent
                    .into_inner()
                    .unwrap_or_else(PoisonError::into_inner)
                    .on_shutdown();
                true
            }
            None => false,
        }
    }

    /// True when `id` is registered.
    pub fn contains(&self, id: AgentId) -> bool {
        let agents = self.agents.read().unwrap_or_else(PoisonError::into_inner);
        agents.contains_key(&id)
    }

    /// Deliver to one agent. Returns false when the id is unknown.
    pub fn deliver(&self, id: AgentId, source: AgentId, message_type: u8, payload: &[u8]) -> bool {
        let agents = self.agents.read().unwrap_or_else(PoisonError::into_inner);
        match agents.get(&id) {
            Some(agent) => {
                agent
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .on_message(source, message_type, payload);
                true
            }
            None => false,
        }
    }

    /// Deliver to every agent (broadcast target).
    pub fn deliver_all(&self, source: AgentId, message_type: u8, payload: &[u8]) -> usize {
        let agents = self.agents.read().unwrap_or_else(PoisonError::into_inner);
        for agent in agents.values() {
            agent
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .on_message(source, message_type, payload);
        }
        agents.len()
    }

    /// Tick every agent.
    pub fn tick_all(&self, now_ns: u64) {
        let agents = self.agents.read().unwrap_or_else(PoisonError::into_inner);
        for agent in agents.values() {
            agent
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .on_tick(now_ns);
        }
    }

    /// Shut every agent down and clear the registry.
    pub fn shutdown_all(&self) {
        let mut agents = self.agents.write().unwrap_or_else(PoisonError::into_inner);
        for (_, agent) in agents.drain() {
            agent
                .into_inner()
                .unwrap_or_else(PoisonError::into_inner)
                .on_shutdown();
        }
    }

    /// Registered agent count.
    pub fn len(&self) -> usize {
        let agents = self.agents.read().unwrap_or_else(PoisonError::into_inner);
        agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
