use crate::events::EventBus;
use crate::types::{Node, NodeCounts, NodeSpec, NodeStatus};
use chrono::Utc;
use conductor_core::{ConductorError, ConductorResult};
use parking_lot::Mutex;
use serde_json::json;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

const RESTART_ERROR: &str = "interrupted by restart";

#[derive(Default)]
struct BoardState {
    nodes: Vec<Node>,
    index: HashMap<Uuid, usize>,
    version: u64,
}

impl BoardState {
    fn node(&self, id: Uuid) -> ConductorResult<&Node> {
        self.index
            .get(&id)
            .map(|&i| &self.nodes[i])
            .ok_or(ConductorError::UnknownNode(id))
    }

    fn node_mut(&mut self, id: Uuid) -> ConductorResult<&mut Node> {
        match self.index.get(&id) {
            Some(&i) => Ok(&mut self.nodes[i]),
            None => Err(ConductorError::UnknownNode(id)),
        }
    }

    fn deps_completed(&self, node: &Node) -> bool {
        node.dependencies.iter().all(|dep| {
            self.index
                .get(dep)
                .is_some_and(|&i| self.nodes[i].status == NodeStatus::Completed)
        })
    }

    /// True if `to` is reachable from `from` along dependency edges.
    fn reaches(&self, from: Uuid, to: Uuid) -> bool {
        let mut stack = vec![from];
        let mut seen = HashSet::new();
        while let Some(id) = stack.pop() {
            if id == to {
                return true;
            }
            if !seen.insert(id) {
                continue;
            }
            if let Some(&i) = self.index.get(&id) {
                stack.extend(self.nodes[i].dependencies.iter().copied());
            }
        }
        false
    }

    fn counts(&self) -> NodeCounts {
        let mut counts = NodeCounts::default();
        for node in &self.nodes {
            match node.status {
                NodeStatus::Pending => counts.pending += 1,
                NodeStatus::Ready => counts.ready += 1,
                NodeStatus::Running => counts.running += 1,
                NodeStatus::Completed => counts.completed += 1,
                NodeStatus::Failed => counts.failed += 1,
            }
        }
        counts
    }
}

/// The task graph for one run.
///
/// Every mutation happens under a single lock and publishes its events while
/// still holding it, so subscribers observe transitions in the order they
/// were applied.
pub struct Board {
    state: Mutex<BoardState>,
    events: Arc<EventBus>,
}

impl Board {
    /// An empty board publishing to `events`.
    pub fn new(events: Arc<EventBus>) -> Self {
        Self {
            state: Mutex::new(BoardState::default()),
            events,
        }
    }

    /// Adds a node. It starts ready if every dependency is already completed.
    pub fn create_node(&self, spec: NodeSpec, dependencies: Vec<Uuid>) -> ConductorResult<Node> {
        let mut state = self.state.lock();
        let id = spec.id.unwrap_or_else(Uuid::new_v4);
        if state.index.contains_key(&id) {
            return Err(ConductorError::Orchestrator(format!(
                "Node {id} already exists"
            )));
        }

        let mut deps: Vec<Uuid> = Vec::with_capacity(dependencies.len());
        for dep in dependencies {
            if dep == id {
                return Err(ConductorError::Cycle {
                    node: id,
                    dependency: dep,
                });
            }
            state.node(dep)?;
            if !deps.contains(&dep) {
                deps.push(dep);
            }
        }

        let mut node = Node {
            id,
            name: spec.name,
            description: spec.description,
            dependencies: deps,
            status: NodeStatus::Pending,
            assigned_worker: None,
            result: None,
            error: None,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
        };
        if state.deps_completed(&node) {
            node.status = NodeStatus::Ready;
        }

        let position = state.nodes.len();
        state.index.insert(id, position);
        state.nodes.push(node.clone());
        state.version += 1;

        info!(node_id = %id, name = %node.name, status = %node.status, "Node created");
        self.events.publish(
            "node.created",
            json!({
                "node_id": id,
                "name": node.name,
                "description": node.description,
                "dependencies": node.dependencies,
                "status": node.status,
            }),
        );
        if node.status == NodeStatus::Ready {
            self.events
                .publish("node.ready", json!({ "node_id": id, "name": node.name }));
        }
        Ok(node)
    }

    /// Adds an edge `node -> dependency` after the fact.
    ///
    /// Allowed on pending nodes, and on ready nodes only when `dependency`
    /// is already completed (a ready node never moves back to pending).
    pub fn add_dependency(&self, node_id: Uuid, dependency: Uuid) -> ConductorResult<()> {
        let mut state = self.state.lock();
        let dep_status = state.node(dependency)?.status;
        let node = state.node(node_id)?;

        if node.dependencies.contains(&dependency) {
            return Ok(());
        }
        match node.status {
            NodeStatus::Pending => {}
            NodeStatus::Ready if dep_status == NodeStatus::Completed => {}
            NodeStatus::Ready => {
                return Err(ConductorError::InvalidTransition {
                    node: node_id,
                    from: NodeStatus::Ready.to_string(),
                    to: NodeStatus::Pending.to_string(),
                })
            }
            other => {
                return Err(ConductorError::InvalidTransition {
                    node: node_id,
                    from: other.to_string(),
                    to: "dependency added".into(),
                })
            }
        }
        // The new edge closes a cycle iff node is already reachable from dependency.
        if node_id == dependency || state.reaches(dependency, node_id) {
            return Err(ConductorError::Cycle {
                node: node_id,
                dependency,
            });
        }

        state.node_mut(node_id)?.dependencies.push(dependency);
        state.version += 1;
        self.events.publish(
            "node.dependency_added",
            json!({ "node_id": node_id, "dependency": dependency }),
        );
        Ok(())
    }

    /// Hands a ready node to `worker`. A second assign on the same node fails.
    pub fn assign(&self, node_id: Uuid, worker: Uuid) -> ConductorResult<Node> {
        let mut state = self.state.lock();
        let node = state.node_mut(node_id)?;
        if node.status != NodeStatus::Ready {
            return Err(ConductorError::InvalidTransition {
                node: node_id,
                from: node.status.to_string(),
                to: NodeStatus::Running.to_string(),
            });
        }
        node.status = NodeStatus::Running;
        node.assigned_worker = Some(worker);
        node.started_at = Some(Utc::now());
        let node = node.clone();
        state.version += 1;

        info!(node_id = %node_id, worker_id = %worker, "Node assigned");
        self.events.publish(
            "node.assigned",
            json!({ "node_id": node_id, "name": node.name, "worker_id": worker }),
        );
        Ok(node)
    }

    /// Records a result. Returns the nodes that became ready as a consequence.
    pub fn complete(
        &self,
        node_id: Uuid,
        worker: Uuid,
        result: impl Into<String>,
    ) -> ConductorResult<Vec<Uuid>> {
        let mut state = self.state.lock();
        let node = Self::finishing(&mut state, node_id, worker, NodeStatus::Completed)?;
        let result = result.into();
        node.status = NodeStatus::Completed;
        node.result = Some(result.clone());
        node.finished_at = Some(Utc::now());
        let name = node.name.clone();
        state.version += 1;

        info!(node_id = %node_id, name = %name, "Node completed");
        self.events.publish(
            "node.completed",
            json!({ "node_id": node_id, "name": name, "worker_id": worker, "result": result }),
        );

        let newly_ready = Self::promote_ready(&mut state);
        for (id, name) in &newly_ready {
            self.events
                .publish("node.ready", json!({ "node_id": id, "name": name }));
        }
        Ok(newly_ready.into_iter().map(|(id, _)| id).collect())
    }

    /// Records a failure. Dependents stay pending.
    pub fn fail(&self, node_id: Uuid, worker: Uuid, error: impl Into<String>) -> ConductorResult<()> {
        let mut state = self.state.lock();
        let node = Self::finishing(&mut state, node_id, worker, NodeStatus::Failed)?;
        let error = error.into();
        node.status = NodeStatus::Failed;
        node.error = Some(error.clone());
        node.finished_at = Some(Utc::now());
        let name = node.name.clone();
        state.version += 1;

        warn!(node_id = %node_id, name = %name, error = %error, "Node failed");
        self.events.publish(
            "node.failed",
            json!({ "node_id": node_id, "name": name, "worker_id": worker, "error": error }),
        );
        Ok(())
    }

    fn finishing(
        state: &mut BoardState,
        node_id: Uuid,
        worker: Uuid,
        to: NodeStatus,
    ) -> ConductorResult<&mut Node> {
        let node = state.node_mut(node_id)?;
        if node.status != NodeStatus::Running {
            return Err(ConductorError::InvalidTransition {
                node: node_id,
                from: node.status.to_string(),
                to: to.to_string(),
            });
        }
        if node.assigned_worker != Some(worker) {
            return Err(ConductorError::NotAssignee {
                node: node_id,
                worker,
            });
        }
        Ok(node)
    }

    fn promote_ready(state: &mut BoardState) -> Vec<(Uuid, String)> {
        let ready: Vec<usize> = state
            .nodes
            .iter()
            .enumerate()
            .filter(|(_, n)| n.status == NodeStatus::Pending && state.deps_completed(n))
            .map(|(i, _)| i)
            .collect();
        ready
            .into_iter()
            .map(|i| {
                let node = &mut state.nodes[i];
                node.status = NodeStatus::Ready;
                (node.id, node.name.clone())
            })
            .collect()
    }

    /// Every node in creation order.
    pub fn snapshot(&self) -> Vec<Node> {
        self.state.lock().nodes.clone()
    }

    /// A single node.
    pub fn get(&self, node_id: Uuid) -> Option<Node> {
        self.state.lock().node(node_id).ok().cloned()
    }

    /// Looks a node up by id, or by name (the most recent node with it).
    pub fn resolve(&self, reference: &str) -> Option<Node> {
        let state = self.state.lock();
        if let Ok(id) = Uuid::parse_str(reference.trim()) {
            return state.node(id).ok().cloned();
        }
        state
            .nodes
            .iter()
            .rev()
            .find(|n| n.name == reference.trim())
            .cloned()
    }

    /// Nodes waiting for a worker.
    pub fn ready_nodes(&self) -> Vec<Node> {
        self.state
            .lock()
            .nodes
            .iter()
            .filter(|n| n.status == NodeStatus::Ready)
            .cloned()
            .collect()
    }

    /// Totals by status.
    pub fn counts(&self) -> NodeCounts {
        self.state.lock().counts()
    }

    /// True when no node is pending, ready or running.
    pub fn is_settled(&self) -> bool {
        let counts = self.counts();
        counts.pending + counts.ready + counts.running == 0
    }

    /// Number of nodes.
    pub fn len(&self) -> usize {
        self.state.lock().nodes.len()
    }

    /// True for an empty board.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Monotonic counter bumped on every mutation.
    pub fn version(&self) -> u64 {
        self.state.lock().version
    }

    /// Loads persisted nodes. Nodes that were running when the process died
    /// have no live worker, so they are marked failed.
    pub fn restore(&self, nodes: Vec<Node>) {
        let mut state = self.state.lock();
        for mut node in nodes {
            if node.status == NodeStatus::Running {
                node.status = NodeStatus::Failed;
                node.error = Some(RESTART_ERROR.into());
                node.finished_at = Some(Utc::now());
                warn!(node_id = %node.id, "Running node interrupted by restart");
                self.events.publish(
                    "node.failed",
                    json!({ "node_id": node.id, "name": node.name, "error": RESTART_ERROR }),
                );
            }
            let position = state.nodes.len();
            state.index.insert(node.id, position);
            state.nodes.push(node);
        }
        state.version += 1;
    }
}
