use crate::board::Board;
use crate::config::AgentMode;
use crate::events::EventBus;
use crate::mailbox::{Envelope, MessageBus, COORDINATOR};
use crate::pool::WorkerPool;
use crate::prompts::truncate_chars;
use crate::types::{AgentSummary, ChatEntry, CoordinatorState, RunSnapshot};
use chrono::{DateTime, Utc};
use conductor_core::Message;
use conductor_session::SnapshotStore;
use conductor_skills::SkillRegistry;
use parking_lot::{Mutex, RwLock};
use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tokio::sync::{watch, Notify};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

/// State shared by the coordinator, its workers and the [`Agent`](crate::Agent)
/// façade of one run.
pub struct AgentRuntime {
    /// Run id.
    pub id: Uuid,
    /// The human goal.
    pub goal: String,
    /// Run mode.
    pub mode: AgentMode,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Task graph.
    pub board: Arc<Board>,
    /// Worker roster.
    pub pool: Arc<WorkerPool>,
    /// Entity mailboxes.
    pub mailbox: Arc<MessageBus>,
    /// Event log.
    pub events: Arc<EventBus>,
    /// Tools available to harnessed workers.
    pub skills: Arc<SkillRegistry>,
    /// Signalled on coordinator mail and on every worker outcome.
    pub wakeup: Arc<Notify>,
    data_dir: PathBuf,
    store: Option<Arc<dyn SnapshotStore<RunSnapshot>>>,
    chat_log: Mutex<Vec<ChatEntry>>,
    conversation: RwLock<Vec<Message>>,
    state: watch::Sender<CoordinatorState>,
    failure_reason: Mutex<Option<String>>,
    cancel: Mutex<CancellationToken>,
    turns_used: AtomicU32,
    updated_at: Mutex<DateTime<Utc>>,
}

impl AgentRuntime {
    /// Wires a runtime around the given buses. `data_dir` is this run's own
    /// directory; node workspaces live under `data_dir/nodes`.
    pub fn new(
        id: Uuid,
        goal: impl Into<String>,
        mode: AgentMode,
        max_workers: usize,
        data_dir: PathBuf,
        events: Arc<EventBus>,
        mailbox: Arc<MessageBus>,
    ) -> Self {
        let wakeup = Arc::new(Notify::new());
        mailbox.watch(COORDINATOR, wakeup.clone());
        let (state, _) = watch::channel(CoordinatorState::Planning);
        let now = Utc::now();
        Self {
            id,
            goal: goal.into(),
            mode,
            created_at: now,
            board: Arc::new(Board::new(events.clone())),
            pool: Arc::new(WorkerPool::new(max_workers, events.clone())),
            mailbox,
            events,
            skills: Arc::new(SkillRegistry::new()),
            wakeup,
            data_dir,
            store: None,
            chat_log: Mutex::new(Vec::new()),
            conversation: RwLock::new(Vec::new()),
            state,
            failure_reason: Mutex::new(None),
            cancel: Mutex::new(CancellationToken::new()),
            turns_used: AtomicU32::new(0),
            updated_at: Mutex::new(now),
        }
    }

    /// Replaces the worker tool registry.
    pub fn with_skills(mut self, skills: Arc<SkillRegistry>) -> Self {
        self.skills = skills;
        self
    }

    /// Persists snapshots to `store`.
    pub fn with_store(mut self, store: Arc<dyn SnapshotStore<RunSnapshot>>) -> Self {
        self.store = Some(store);
        self
    }

    /// Loads the non-graph parts of a persisted run: timestamps, chat log,
    /// conversation view, turn count and coordinator state.
    pub fn with_restored(mut self, snapshot: &RunSnapshot) -> Self {
        self.created_at = snapshot.summary.created_at;
        *self.updated_at.get_mut() = snapshot.summary.updated_at;
        *self.chat_log.get_mut() = snapshot.chat_log.clone();
        *self.conversation.get_mut() = snapshot.conversation.clone();
        *self.failure_reason.get_mut() = snapshot.summary.failure_reason.clone();
        self.turns_used = AtomicU32::new(snapshot.summary.turns_used);
        self.state.send_replace(snapshot.summary.state);
        self
    }

    /// This run's directory.
    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Parent directory of every node workspace.
    pub fn nodes_dir(&self) -> PathBuf {
        self.data_dir.join("nodes")
    }

    /// Directory of `worker`'s own files, such as its memory.
    pub fn worker_dir(&self, worker: &str) -> PathBuf {
        self.data_dir.join("workers").join(worker)
    }

    /// Appends to the human-facing chat log.
    pub fn log_chat(&self, role: &str, to: Option<&str>, content: impl Into<String>) {
        let entry = ChatEntry::new(role, to, content);
        self.events.publish(
            "chat.message",
            json!({ "role": entry.role, "to": entry.to, "content": entry.content }),
        );
        self.chat_log.lock().push(entry);
        self.touch();
    }

    /// Chat entries, newest last. `offset` skips that many of the most
    /// recent entries and `limit` caps how many are returned.
    pub fn chat_log(&self, limit: Option<usize>, offset: usize) -> Vec<ChatEntry> {
        let log = self.chat_log.lock();
        let end = log.len().saturating_sub(offset);
        let start = limit.map_or(0, |n| end.saturating_sub(n));
        log[start..end].to_vec()
    }

    /// Sends through the message bus and records it on the event log.
    pub fn send(&self, from: &str, to: Option<&str>, body: impl Into<String>) -> Envelope {
        let envelope = self.mailbox.send(from, to, body);
        self.events.publish(
            "message.sent",
            json!({
                "from": envelope.from,
                "to": envelope.to,
                "body": truncate_chars(&envelope.body, 200),
            }),
        );
        envelope
    }

    /// Publishes the coordinator's conversation for observers.
    pub fn set_conversation(&self, turns: &[Message]) {
        *self.conversation.write() = turns.to_vec();
    }

    /// The coordinator's conversation as of its last turn.
    pub fn conversation(&self) -> Vec<Message> {
        self.conversation.read().clone()
    }

    /// Current coordinator state.
    pub fn state(&self) -> CoordinatorState {
        *self.state.borrow()
    }

    /// Receiver that observes every state change.
    pub fn state_watch(&self) -> watch::Receiver<CoordinatorState> {
        self.state.subscribe()
    }

    /// Moves the coordinator to `next`, publishing `coordinator.state` if it
    /// actually changed.
    pub fn set_state(&self, next: CoordinatorState) {
        let previous = self.state.send_replace(next);
        if previous != next {
            info!(agent_id = %self.id, from = %previous, to = %next, "Coordinator state changed");
            self.events.publish(
                "coordinator.state",
                json!({ "from": previous, "to": next }),
            );
            self.touch();
        }
    }

    /// Records why the run failed.
    pub fn set_failure(&self, reason: impl Into<String>) {
        *self.failure_reason.lock() = Some(reason.into());
    }

    /// Token for a worker launched now. Cancelled by the next stop.
    pub fn worker_token(&self) -> CancellationToken {
        self.cancel.lock().child_token()
    }

    /// Cancels every in-flight worker and installs a fresh token for work
    /// launched afterwards.
    pub fn cancel_workers(&self) {
        let mut token = self.cancel.lock();
        token.cancel();
        *token = CancellationToken::new();
        info!(agent_id = %self.id, "Worker cancellation requested");
    }

    /// Planning turns used so far.
    pub fn turns_used(&self) -> u32 {
        self.turns_used.load(Ordering::SeqCst)
    }

    /// Counts one planning turn; returns the new total.
    pub fn record_turn(&self) -> u32 {
        self.turns_used.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn touch(&self) {
        *self.updated_at.lock() = Utc::now();
    }

    /// Run overview.
    pub async fn summary(&self) -> AgentSummary {
        let workers = self.pool.snapshot().await.len();
        AgentSummary {
            id: self.id,
            goal: self.goal.clone(),
            mode: self.mode,
            state: self.state(),
            failure_reason: self.failure_reason.lock().clone(),
            nodes: self.board.counts(),
            workers,
            turns_used: self.turns_used(),
            created_at: self.created_at,
            updated_at: *self.updated_at.lock(),
        }
    }

    /// Everything needed to restore this run.
    pub async fn snapshot(&self) -> RunSnapshot {
        let summary = self.summary().await;
        let workers = self.pool.snapshot().await;
        let chat_log = self.chat_log.lock().clone();
        RunSnapshot {
            summary,
            nodes: self.board.snapshot(),
            conversation: self.conversation(),
            chat_log,
            workers,
        }
    }

    /// Saves a snapshot if a store is attached. Failures are logged, not
    /// propagated.
    pub async fn persist(&self) {
        let Some(store) = &self.store else {
            return;
        };
        let snapshot = self.snapshot().await;
        if let Err(e) = store.save(self.id, &snapshot).await {
            warn!(agent_id = %self.id, error = %e, "Failed to persist run snapshot");
        }
    }

    /// Removes the persisted snapshot, if any.
    pub async fn forget(&self) {
        if let Some(store) = &self.store {
            if let Err(e) = store.delete(self.id).await {
                warn!(agent_id = %self.id, error = %e, "Failed to delete run snapshot");
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::mailbox::HUMAN;

    fn runtime() -> AgentRuntime {
        let id = Uuid::new_v4();
        AgentRuntime::new(
            id,
            "goal",
            AgentMode::Finite,
            2,
            std::env::temp_dir().join(id.to_string()),
            Arc::new(EventBus::new(id)),
            Arc::new(MessageBus::new()),
        )
    }

    #[test]
    fn test_chat_log_paging_from_the_end() {
        let rt = runtime();
        for i in 0..5 {
            rt.log_chat(HUMAN, None, format!("m{i}"));
        }
        let page: Vec<_> = rt
            .chat_log(Some(2), 1)
            .into_iter()
            .map(|e| e.content)
            .collect();
        assert_eq!(page, vec!["m2", "m3"]);
        assert_eq!(rt.chat_log(None, 0).len(), 5);
        assert!(rt.chat_log(Some(3), 10).is_empty());
    }

    #[test]
    fn test_state_change_published_once() {
        let rt = runtime();
        rt.set_state(CoordinatorState::WaitingForActivity);
        rt.set_state(CoordinatorState::WaitingForActivity);
        let changes = rt
            .events
            .history(None)
            .into_iter()
            .filter(|e| e.event_type == "coordinator.state")
            .count();
        assert_eq!(changes, 1);
    }

    #[test]
    fn test_cancel_only_hits_earlier_tokens() {
        let rt = runtime();
        let before = rt.worker_token();
        rt.cancel_workers();
        let after = rt.worker_token();
        assert!(before.is_cancelled());
        assert!(!after.is_cancelled());
    }

    #[tokio::test]
    async fn test_send_to_coordinator_wakes() {
        let rt = runtime();
        rt.send("Alice", None, "done");
        tokio::time::timeout(std::time::Duration::from_secs(1), rt.wakeup.notified())
            .await
            .unwrap();
        assert_eq!(rt.mailbox.pending_count(COORDINATOR), 1);
    }

    #[tokio::test]
    async fn test_snapshot_runs_on_spawned_task() {
        let rt = Arc::new(runtime());
        rt.log_chat(HUMAN, None, "hi");
        let snapshot = tokio::spawn({
            let rt = rt.clone();
            async move { rt.snapshot().await }
        })
        .await
        .unwrap();
        assert_eq!(snapshot.chat_log.len(), 1);
        assert_eq!(snapshot.summary.goal, "goal");
    }
}
