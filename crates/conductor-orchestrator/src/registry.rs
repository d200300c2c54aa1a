use crate::agent::Agent;
use conductor_core::{ConductorError, ConductorResult};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

/// Live agents of this process, keyed by run id.
///
/// Agents are inserted when started and removed when deleted. The registry
/// is an ordinary value owned by whoever hosts the agents.
#[derive(Default)]
pub struct AgentRegistry {
    agents: RwLock<HashMap<Uuid, Arc<Agent>>>,
}

impl AgentRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a started agent and returns the shared handle.
    pub fn insert(&self, agent: Agent) -> Arc<Agent> {
        let agent = Arc::new(agent);
        self.agents.write().insert(agent.id(), agent.clone());
        info!(agent_id = %agent.id(), "Agent registered");
        agent
    }

    /// The agent with `id`.
    pub fn get(&self, id: Uuid) -> Option<Arc<Agent>> {
        self.agents.read().get(&id).cloned()
    }

    /// Unregisters without tearing the agent down.
    pub fn remove(&self, id: Uuid) -> Option<Arc<Agent>> {
        self.agents.write().remove(&id)
    }

    /// Every agent, oldest first.
    pub fn list(&self) -> Vec<Arc<Agent>> {
        let mut agents: Vec<Arc<Agent>> = self.agents.read().values().cloned().collect();
        agents.sort_by_key(|agent| agent.created_at());
        agents
    }

    /// Number of registered agents.
    pub fn len(&self) -> usize {
        self.agents.read().len()
    }

    /// True when nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Unregisters and deletes the agent with `id`.
    pub async fn delete(&self, id: Uuid) -> ConductorResult<()> {
        let agent = self
            .remove(id)
            .ok_or_else(|| ConductorError::Orchestrator(format!("Unknown agent {id}")))?;
        agent.delete().await;
        Ok(())
    }
}
