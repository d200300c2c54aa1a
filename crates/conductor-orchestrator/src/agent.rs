use crate::config::{AgentMode, OrchestratorConfig};
use crate::coordinator::{Control, Coordinator};
use crate::events::{EventBus, EventStream};
use crate::mailbox::{Envelope, MessageBus, COORDINATOR, HUMAN};
use crate::runtime::AgentRuntime;
use crate::types::{AgentSummary, ChatEntry, CoordinatorState, Node, RunSnapshot, WorkerInfo};
use chrono::{DateTime, Utc};
use conductor_agent::{BackendFactory, ExternalExecutor, LlmBackend};
use conductor_builtins::register_builtins;
use conductor_core::{ConductorError, ConductorResult, Event, Message};
use conductor_session::{CompactionPolicy, Compactor, Journal, SnapshotStore};
use conductor_skills::SkillRegistry;
use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::info;
use uuid::Uuid;

/// Event journal file inside a run directory.
pub const EVENTS_FILE: &str = "events.jsonl";
/// Envelope journal file inside a run directory.
pub const MESSAGES_FILE: &str = "messages.jsonl";

/// Configures and starts an [`Agent`].
pub struct AgentBuilder {
    goal: String,
    backend: Arc<dyn LlmBackend>,
    workers: Option<Arc<dyn BackendFactory>>,
    executor: Option<Arc<dyn ExternalExecutor>>,
    skills: Option<Arc<SkillRegistry>>,
    compactor: Option<(Arc<dyn Compactor>, CompactionPolicy)>,
    config: OrchestratorConfig,
    data_dir: PathBuf,
    store: Option<Arc<dyn SnapshotStore<RunSnapshot>>>,
    restore: Option<RunSnapshot>,
}

impl AgentBuilder {
    /// A run toward `goal` whose coordinator talks to `backend`. Workers use
    /// the same backend unless [`worker_backends`](Self::worker_backends) is set.
    pub fn new(goal: impl Into<String>, backend: Arc<dyn LlmBackend>) -> Self {
        Self {
            goal: goal.into(),
            backend,
            workers: None,
            executor: None,
            skills: None,
            compactor: None,
            config: OrchestratorConfig::default(),
            data_dir: PathBuf::from("data"),
            store: None,
            restore: None,
        }
    }

    /// Run limits and mode.
    pub fn config(mut self, config: OrchestratorConfig) -> Self {
        self.config = config;
        self
    }

    /// Shortcut for the run mode.
    pub fn mode(mut self, mode: AgentMode) -> Self {
        self.config.mode = mode;
        self
    }

    /// Produces worker backends, per requested model.
    pub fn worker_backends(mut self, factory: Arc<dyn BackendFactory>) -> Self {
        self.workers = Some(factory);
        self
    }

    /// Executor used for `claude-code` worker models.
    pub fn executor(mut self, executor: Arc<dyn ExternalExecutor>) -> Self {
        self.executor = Some(executor);
        self
    }

    /// Worker tools. Defaults to the workspace file skills.
    pub fn skills(mut self, skills: Arc<SkillRegistry>) -> Self {
        self.skills = Some(skills);
        self
    }

    /// Compacts the coordinator conversation past the policy thresholds.
    pub fn compactor(mut self, compactor: Arc<dyn Compactor>, policy: CompactionPolicy) -> Self {
        self.compactor = Some((compactor, policy));
        self
    }

    /// Root directory for run directories and node workspaces.
    pub fn data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.data_dir = dir.into();
        self
    }

    /// Where run snapshots are saved.
    pub fn store(mut self, store: Arc<dyn SnapshotStore<RunSnapshot>>) -> Self {
        self.store = Some(store);
        self
    }

    /// Continues a persisted run instead of starting a new one. The goal and
    /// mode come from the snapshot.
    pub fn resume_from(mut self, snapshot: RunSnapshot) -> Self {
        self.restore = Some(snapshot);
        self
    }

    /// Wires the buses, restores state if requested and spawns the
    /// coordinator. A restored run that had already ended gets no
    /// coordinator but stays inspectable.
    pub async fn start(self) -> ConductorResult<Agent> {
        let (id, goal, mode) = match &self.restore {
            Some(snapshot) => (
                snapshot.summary.id,
                snapshot.summary.goal.clone(),
                snapshot.summary.mode,
            ),
            None => (Uuid::new_v4(), self.goal, self.config.mode),
        };
        let run_dir = self.data_dir.join(id.to_string());
        tokio::fs::create_dir_all(&run_dir).await?;

        let event_journal = Journal::<Event>::new(run_dir.join(EVENTS_FILE));
        let prior_events = if self.restore.is_some() {
            event_journal.read_all().await?
        } else {
            Vec::new()
        };
        let events = Arc::new(EventBus::with_journal(id, event_journal.into_background()));
        events.replay(prior_events);
        let mailbox = Arc::new(MessageBus::with_journal(
            Journal::<Envelope>::new(run_dir.join(MESSAGES_FILE)).into_background(),
        ));

        let skills = self.skills.unwrap_or_else(|| {
            let mut registry = SkillRegistry::new();
            register_builtins(&mut registry);
            Arc::new(registry)
        });
        let mut runtime = AgentRuntime::new(
            id,
            goal,
            mode,
            self.config.max_workers,
            run_dir,
            events,
            mailbox,
        )
        .with_skills(skills);
        if let Some(store) = self.store {
            runtime = runtime.with_store(store);
        }
        if let Some(snapshot) = &self.restore {
            runtime = runtime.with_restored(snapshot);
        }
        let runtime = Arc::new(runtime);
        if let Some(snapshot) = self.restore {
            runtime.board.restore(snapshot.nodes);
            runtime.pool.restore(snapshot.workers).await;
        }

        let (control, control_rx) = mpsc::unbounded_channel();
        let task = if runtime.state().is_terminal() {
            info!(agent_id = %id, state = %runtime.state(), "Restored run already ended");
            None
        } else {
            let backend = self.backend;
            let workers: Arc<dyn BackendFactory> = match self.workers {
                Some(factory) => factory,
                None => {
                    let shared = backend.clone();
                    Arc::new(move |_: Option<&str>| shared.clone())
                }
            };
            let mut coordinator = Coordinator::new(
                runtime.clone(),
                backend,
                workers,
                self.config,
                control_rx,
            )
            .with_executor(self.executor);
            if let Some((compactor, policy)) = self.compactor {
                coordinator = coordinator.with_compactor(compactor, policy);
            }
            Some(tokio::spawn(coordinator.run()))
        };

        Ok(Agent {
            runtime,
            control,
            task: Mutex::new(task),
        })
    }
}

/// Handle to one running (or finished) agent.
///
/// All interaction with the coordinator goes through its mailbox and a
/// control channel; nothing here blocks on the planning loop.
pub struct Agent {
    runtime: Arc<AgentRuntime>,
    control: mpsc::UnboundedSender<Control>,
    task: Mutex<Option<JoinHandle<CoordinatorState>>>,
}

impl Agent {
    /// Run id.
    pub fn id(&self) -> Uuid {
        self.runtime.id
    }

    /// The human goal.
    pub fn goal(&self) -> &str {
        &self.runtime.goal
    }

    /// Run mode.
    pub fn mode(&self) -> AgentMode {
        self.runtime.mode
    }

    /// Creation time.
    pub fn created_at(&self) -> DateTime<Utc> {
        self.runtime.created_at
    }

    /// Shared run state.
    pub fn runtime(&self) -> &Arc<AgentRuntime> {
        &self.runtime
    }

    /// Sends a human message, to the coordinator unless `to` names a
    /// worker. The chat log records it here and only here.
    pub fn send_message(&self, body: impl Into<String>, to: Option<&str>) -> Envelope {
        let body = body.into();
        self.runtime
            .log_chat(HUMAN, Some(to.unwrap_or(COORDINATOR)), body.clone());
        self.runtime.send(HUMAN, to, body)
    }

    /// Halts every worker and parks the coordinator until the next human
    /// message.
    pub fn stop(&self) {
        info!(agent_id = %self.runtime.id, "Stop requested");
        self.runtime.cancel_workers();
        // The coordinator may already have exited; stopping is then a no-op.
        let _ = self.control.send(Control::Stop);
    }

    /// Ends a finite run from outside.
    pub fn finish(&self, summary: Option<String>) -> ConductorResult<()> {
        if self.runtime.mode != AgentMode::Finite {
            return Err(ConductorError::Orchestrator(
                "finish is only available in finite mode".into(),
            ));
        }
        let _ = self.control.send(Control::Finish { summary });
        Ok(())
    }

    /// Tears the run down: cancels workers, ends the coordinator, retires
    /// the roster, flushes the journals and removes the snapshot.
    pub async fn delete(&self) {
        self.runtime.cancel_workers();
        if let Some(task) = self.task.lock().take() {
            task.abort();
        }
        let retired = self.runtime.pool.retire_all().await;
        self.runtime
            .events
            .publish("agent.deleted", serde_json::json!({ "workers_retired": retired }));
        self.runtime.events.flush().await;
        self.runtime.mailbox.flush().await;
        self.runtime.forget().await;
        info!(agent_id = %self.runtime.id, retired, "Agent deleted");
    }

    /// Every node in creation order.
    pub fn board(&self) -> Vec<Node> {
        self.runtime.board.snapshot()
    }

    /// The worker roster.
    pub async fn workers(&self) -> Vec<WorkerInfo> {
        self.runtime.pool.snapshot().await
    }

    /// Event history, the last `limit` events when given.
    pub fn events(&self, limit: Option<usize>) -> Vec<Event> {
        self.runtime.events.history(limit)
    }

    /// Live events from now on.
    pub fn subscribe(&self) -> EventStream {
        self.runtime.events.subscribe()
    }

    /// Backfill plus live stream, with no gap between them.
    pub fn subscribe_with_history(&self, limit: Option<usize>) -> (Vec<Event>, EventStream) {
        self.runtime.events.subscribe_with_history(limit)
    }

    /// Human-facing chat log, paged from the most recent entry.
    pub fn chat_log(&self, limit: Option<usize>, offset: usize) -> Vec<ChatEntry> {
        self.runtime.chat_log(limit, offset)
    }

    /// Coordinator conversation as of its last turn.
    pub fn conversation(&self) -> Vec<Message> {
        self.runtime.conversation()
    }

    /// Run overview.
    pub async fn summary(&self) -> AgentSummary {
        self.runtime.summary().await
    }

    /// Full persisted form of the run.
    pub async fn snapshot(&self) -> RunSnapshot {
        self.runtime.snapshot().await
    }

    /// Current coordinator state.
    pub fn state(&self) -> CoordinatorState {
        self.runtime.state()
    }

    /// Receiver that observes coordinator state changes.
    pub fn state_watch(&self) -> watch::Receiver<CoordinatorState> {
        self.runtime.state_watch()
    }

    /// Waits until the coordinator state satisfies `predicate`.
    pub async fn wait_for(&self, predicate: impl Fn(CoordinatorState) -> bool) -> CoordinatorState {
        let mut states = self.runtime.state_watch();
        let reached = match states.wait_for(|state| predicate(*state)).await {
            Ok(state) => *state,
            Err(_) => self.runtime.state(),
        };
        reached
    }

    /// Waits for the run to finish or fail.
    pub async fn wait(&self) -> CoordinatorState {
        self.wait_for(|state| state.is_terminal()).await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use conductor_agent::LlmResponse;
    use conductor_skills::SkillDescriptor;
    use tempfile::TempDir;

    struct Silent;

    #[async_trait]
    impl LlmBackend for Silent {
        async fn chat(
            &self,
            _system: Option<&str>,
            _messages: &[Message],
            _tools: &[SkillDescriptor],
        ) -> ConductorResult<LlmResponse> {
            Ok(LlmResponse::Done("Understood.".into()))
        }
    }

    #[tokio::test]
    async fn test_human_message_logged_once() {
        let tmp = TempDir::new().unwrap();
        let agent = AgentBuilder::new("say hi", Arc::new(Silent))
            .data_dir(tmp.path())
            .start()
            .await
            .unwrap();
        agent
            .wait_for(|s| s == CoordinatorState::WaitingForActivity)
            .await;

        agent.send_message("hello", None);
        let human: Vec<_> = agent
            .chat_log(None, 0)
            .into_iter()
            .filter(|e| e.role == HUMAN)
            .collect();
        assert_eq!(human.len(), 1);
        assert_eq!(human[0].to.as_deref(), Some(COORDINATOR));
        agent.delete().await;
    }

    #[tokio::test]
    async fn test_finish_rejected_in_infinite_mode() {
        let tmp = TempDir::new().unwrap();
        let agent = AgentBuilder::new("watch", Arc::new(Silent))
            .mode(AgentMode::Infinite)
            .data_dir(tmp.path())
            .start()
            .await
            .unwrap();
        assert!(agent.finish(None).is_err());
        agent.delete().await;
    }

    #[tokio::test]
    async fn test_external_finish_ends_finite_run() {
        let tmp = TempDir::new().unwrap();
        let agent = AgentBuilder::new("say hi", Arc::new(Silent))
            .data_dir(tmp.path())
            .start()
            .await
            .unwrap();
        agent.finish(Some("wrapped up".into())).unwrap();
        assert_eq!(agent.wait().await, CoordinatorState::Finished);
        assert!(agent
            .events(None)
            .iter()
            .any(|e| e.event_type == "agent.finished"));
    }
}
