use crate::events::EventBus;
use crate::types::{WorkerInfo, WorkerKind, WorkerStatus};
use chrono::Utc;
use conductor_core::{ConductorError, ConductorResult};
use serde_json::json;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};
use uuid::Uuid;

/// What the coordinator asks for when it hands out a node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerRequest {
    /// Worker name; an idle worker with this name is reused.
    pub name: String,
    /// Role description.
    pub role: String,
    /// Execution mode.
    pub kind: WorkerKind,
    /// Model override.
    pub model: Option<String>,
}

/// Roster of named workers for one run, with a cap on how many may be busy.
pub struct WorkerPool {
    workers: RwLock<Vec<WorkerInfo>>,
    max_busy: usize,
    events: Arc<EventBus>,
}

impl WorkerPool {
    /// An empty pool allowing `max_busy` concurrently busy workers.
    pub fn new(max_busy: usize, events: Arc<EventBus>) -> Self {
        Self {
            workers: RwLock::new(Vec::new()),
            max_busy: max_busy.max(1),
            events,
        }
    }

    /// Marks a worker busy on `node_id`, reusing an idle worker with the
    /// requested name or creating a new one.
    pub async fn acquire(&self, request: WorkerRequest, node_id: Uuid) -> ConductorResult<WorkerInfo> {
        let mut workers = self.workers.write().await;

        let existing = workers.iter().position(|w| w.name == request.name);
        if let Some(i) = existing {
            match workers[i].status {
                WorkerStatus::Busy => {
                    return Err(ConductorError::Orchestrator(format!(
                        "Worker '{}' is busy on node {}",
                        request.name,
                        workers[i]
                            .current_node
                            .map(|id| id.to_string())
                            .unwrap_or_default()
                    )))
                }
                WorkerStatus::Failed => {
                    return Err(ConductorError::Orchestrator(format!(
                        "Worker '{}' has failed and cannot be reused; pick another name",
                        request.name
                    )))
                }
                WorkerStatus::Idle => {}
            }
        }

        let busy = workers
            .iter()
            .filter(|w| w.status == WorkerStatus::Busy)
            .count();
        if busy >= self.max_busy {
            return Err(ConductorError::Orchestrator(format!(
                "All {} worker slots are busy; wait for a worker to finish before assigning more",
                self.max_busy
            )));
        }

        let index = match existing {
            Some(i) => {
                let worker = &mut workers[i];
                worker.role = request.role;
                worker.kind = request.kind;
                worker.model = request.model;
                i
            }
            None => {
                let worker = WorkerInfo {
                    id: Uuid::new_v4(),
                    name: request.name,
                    role: request.role,
                    kind: request.kind,
                    model: request.model,
                    status: WorkerStatus::Idle,
                    current_node: None,
                    tool_calls: 0,
                    nodes_completed: 0,
                    nodes_failed: 0,
                    created_at: Utc::now(),
                };
                info!(worker = %worker.name, worker_id = %worker.id, kind = worker.kind.as_str(), "Worker spawned");
                self.events.publish(
                    "worker.spawned",
                    json!({
                        "worker_id": worker.id,
                        "name": worker.name,
                        "role": worker.role,
                        "kind": worker.kind,
                        "model": worker.model,
                    }),
                );
                workers.push(worker);
                workers.len() - 1
            }
        };

        let worker = &mut workers[index];
        worker.status = WorkerStatus::Busy;
        worker.current_node = Some(node_id);
        self.events.publish(
            "worker.busy",
            json!({ "worker_id": worker.id, "name": worker.name, "node_id": node_id }),
        );
        Ok(worker.clone())
    }

    /// Returns a busy worker to idle after its node finished.
    pub async fn release(&self, worker_id: Uuid, success: bool) -> ConductorResult<()> {
        let mut workers = self.workers.write().await;
        let worker = workers
            .iter_mut()
            .find(|w| w.id == worker_id)
            .ok_or_else(|| ConductorError::UnknownWorker(worker_id.to_string()))?;
        if success {
            worker.nodes_completed += 1;
        } else {
            worker.nodes_failed += 1;
        }
        let node_id = worker.current_node.take();
        if worker.status == WorkerStatus::Busy {
            worker.status = WorkerStatus::Idle;
        }
        self.events.publish(
            "worker.idle",
            json!({
                "worker_id": worker.id,
                "name": worker.name,
                "node_id": node_id,
                "success": success,
            }),
        );
        Ok(())
    }

    /// Returns a worker to idle without recording an outcome. Used when the
    /// assignment it was acquired for fell through.
    pub async fn unassign(&self, worker_id: Uuid) {
        let mut workers = self.workers.write().await;
        if let Some(worker) = workers.iter_mut().find(|w| w.id == worker_id) {
            if worker.status == WorkerStatus::Busy {
                worker.status = WorkerStatus::Idle;
            }
            worker.current_node = None;
        }
    }

    /// Takes a worker out of rotation after its task panicked.
    pub async fn mark_failed(&self, worker_id: Uuid, reason: &str) {
        let mut workers = self.workers.write().await;
        if let Some(worker) = workers.iter_mut().find(|w| w.id == worker_id) {
            worker.status = WorkerStatus::Failed;
            worker.current_node = None;
            worker.nodes_failed += 1;
            warn!(worker = %worker.name, reason, "Worker marked failed");
            self.events.publish(
                "worker.failed",
                json!({ "worker_id": worker.id, "name": worker.name, "reason": reason }),
            );
        }
    }

    /// Bumps the worker's tool-call counter.
    pub async fn record_tool_call(&self, worker_id: Uuid) {
        let mut workers = self.workers.write().await;
        if let Some(worker) = workers.iter_mut().find(|w| w.id == worker_id) {
            worker.tool_calls += 1;
        }
    }

    /// A worker by id.
    pub async fn get(&self, worker_id: Uuid) -> Option<WorkerInfo> {
        let workers = self.workers.read().await;
        workers.iter().find(|w| w.id == worker_id).cloned()
    }

    /// A worker by name.
    pub async fn get_by_name(&self, name: &str) -> Option<WorkerInfo> {
        let workers = self.workers.read().await;
        workers.iter().find(|w| w.name == name).cloned()
    }

    /// The roster in creation order.
    pub async fn snapshot(&self) -> Vec<WorkerInfo> {
        self.workers.read().await.clone()
    }

    /// Number of busy workers.
    pub async fn busy_count(&self) -> usize {
        let workers = self.workers.read().await;
        workers
            .iter()
            .filter(|w| w.status == WorkerStatus::Busy)
            .count()
    }

    /// Loads a persisted roster. Workers that were busy have no live task
    /// after a restart and come back idle.
    pub async fn restore(&self, roster: Vec<WorkerInfo>) {
        let mut workers = self.workers.write().await;
        for mut worker in roster {
            if worker.status == WorkerStatus::Busy {
                worker.status = WorkerStatus::Idle;
                worker.current_node = None;
            }
            workers.push(worker);
        }
    }

    /// Retires every worker. Used when the agent is deleted.
    pub async fn retire_all(&self) -> usize {
        let mut workers = self.workers.write().await;
        let retired = workers.len();
        for worker in workers.drain(..) {
            self.events.publish(
                "worker.retired",
                json!({ "worker_id": worker.id, "name": worker.name }),
            );
        }
        retired
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn request(name: &str) -> WorkerRequest {
        WorkerRequest {
            name: name.into(),
            role: "researcher".into(),
            kind: WorkerKind::Harnessed,
            model: None,
        }
    }

    fn pool(max: usize) -> WorkerPool {
        WorkerPool::new(max, Arc::new(EventBus::new(Uuid::new_v4())))
    }

    #[tokio::test]
    async fn test_idle_worker_is_reused_by_name() {
        let pool = pool(2);
        let first = pool.acquire(request("alice"), Uuid::new_v4()).await.unwrap();
        pool.release(first.id, true).await.unwrap();
        let again = pool.acquire(request("alice"), Uuid::new_v4()).await.unwrap();

        assert_eq!(first.id, again.id);
        assert_eq!(pool.snapshot().await.len(), 1);
        assert_eq!(pool.get(first.id).await.unwrap().nodes_completed, 1);
    }

    #[tokio::test]
    async fn test_busy_name_rejected() {
        let pool = pool(4);
        pool.acquire(request("alice"), Uuid::new_v4()).await.unwrap();
        let err = pool
            .acquire(request("alice"), Uuid::new_v4())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("busy"));
    }

    #[tokio::test]
    async fn test_cap_on_busy_workers() {
        let pool = pool(1);
        let alice = pool.acquire(request("alice"), Uuid::new_v4()).await.unwrap();
        let err = pool
            .acquire(request("bob"), Uuid::new_v4())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("All 1 worker slots are busy"));

        pool.release(alice.id, false).await.unwrap();
        pool.acquire(request("bob"), Uuid::new_v4()).await.unwrap();
        assert_eq!(pool.busy_count().await, 1);
    }

    #[tokio::test]
    async fn test_restore_idles_busy_workers() {
        let source = pool(2);
        source.acquire(request("alice"), Uuid::new_v4()).await.unwrap();

        let restored = pool(2);
        restored.restore(source.snapshot().await).await;
        let alice = restored.get_by_name("alice").await.unwrap();
        assert_eq!(alice.status, WorkerStatus::Idle);
        assert!(alice.current_node.is_none());
    }

    #[tokio::test]
    async fn test_failed_worker_not_reused() {
        let pool = pool(2);
        let alice = pool.acquire(request("alice"), Uuid::new_v4()).await.unwrap();
        pool.mark_failed(alice.id, "panicked").await;
        assert!(pool.acquire(request("alice"), Uuid::new_v4()).await.is_err());
        assert_eq!(pool.retire_all().await, 1);
        assert!(pool.snapshot().await.is_empty());
    }
}
