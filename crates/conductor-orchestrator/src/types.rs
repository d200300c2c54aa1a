use crate::config::AgentMode;
use chrono::{DateTime, Utc};
use conductor_core::Message;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Lifecycle status of a board node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeStatus {
    /// Waiting on at least one dependency.
    Pending,
    /// Every dependency completed; can be assigned.
    Ready,
    /// A worker is executing it.
    Running,
    /// Finished with a result.
    Completed,
    /// Finished with an error.
    Failed,
}

impl NodeStatus {
    /// Lowercase name.
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeStatus::Pending => "pending",
            NodeStatus::Ready => "ready",
            NodeStatus::Running => "running",
            NodeStatus::Completed => "completed",
            NodeStatus::Failed => "failed",
        }
    }

    /// True for completed and failed.
    pub fn is_terminal(&self) -> bool {
        matches!(self, NodeStatus::Completed | NodeStatus::Failed)
    }

    /// One-character marker used in board views.
    pub fn icon(&self) -> char {
        match self {
            NodeStatus::Completed => '+',
            NodeStatus::Failed => 'X',
            NodeStatus::Running => '~',
            NodeStatus::Pending => '.',
            NodeStatus::Ready => '>',
        }
    }
}

impl fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A unit of work on the board.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    /// Unique id.
    pub id: Uuid,
    /// Short name.
    pub name: String,
    /// Task text handed to the worker.
    pub description: String,
    /// Nodes that must complete first.
    pub dependencies: Vec<Uuid>,
    /// Current status.
    pub status: NodeStatus,
    /// Worker holding (or last holding) the node.
    pub assigned_worker: Option<Uuid>,
    /// Result text, set on completion.
    pub result: Option<String>,
    /// Error text, set on failure.
    pub error: Option<String>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Time the node started running.
    pub started_at: Option<DateTime<Utc>>,
    /// Time the node reached a terminal status.
    pub finished_at: Option<DateTime<Utc>>,
}

/// What the coordinator supplies when creating a node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeSpec {
    /// Explicit id; a fresh one is generated when `None`.
    pub id: Option<Uuid>,
    /// Short name.
    pub name: String,
    /// Task text.
    pub description: String,
}

impl NodeSpec {
    /// A spec with a generated id.
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            id: None,
            name: name.into(),
            description: description.into(),
        }
    }

    /// Pins the node id.
    pub fn with_id(mut self, id: Uuid) -> Self {
        self.id = Some(id);
        self
    }
}

/// Node totals by status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeCounts {
    /// Pending nodes.
    pub pending: usize,
    /// Ready nodes.
    pub ready: usize,
    /// Running nodes.
    pub running: usize,
    /// Completed nodes.
    pub completed: usize,
    /// Failed nodes.
    pub failed: usize,
}

impl NodeCounts {
    /// All nodes.
    pub fn total(&self) -> usize {
        self.pending + self.ready + self.running + self.completed + self.failed
    }
}

/// How a worker executes its node.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerKind {
    /// Plan/act loop driven by this process.
    #[default]
    Harnessed,
    /// Delegated to an external autonomous executor.
    External,
}

impl WorkerKind {
    /// Lowercase name.
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkerKind::Harnessed => "harnessed",
            WorkerKind::External => "external",
        }
    }
}

/// Availability of a worker slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerStatus {
    /// Free for assignment.
    Idle,
    /// Executing a node.
    Busy,
    /// Crashed; not reused.
    Failed,
}

impl WorkerStatus {
    /// Lowercase name.
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkerStatus::Idle => "idle",
            WorkerStatus::Busy => "busy",
            WorkerStatus::Failed => "failed",
        }
    }
}

/// A named execution slot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerInfo {
    /// Unique id.
    pub id: Uuid,
    /// Mailbox address and display name.
    pub name: String,
    /// Human-facing role.
    pub role: String,
    /// Execution mode.
    pub kind: WorkerKind,
    /// Model override, if the coordinator picked one.
    pub model: Option<String>,
    /// Availability.
    pub status: WorkerStatus,
    /// Node currently being executed.
    pub current_node: Option<Uuid>,
    /// Tool calls made over the worker's lifetime.
    pub tool_calls: u32,
    /// Nodes completed.
    pub nodes_completed: u32,
    /// Nodes failed.
    pub nodes_failed: u32,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

/// Coordinator control-loop state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CoordinatorState {
    /// Running a plan/act turn.
    Planning,
    /// Suspended until a message, a worker outcome, a stop or the poll tick.
    WaitingForActivity,
    /// Paused by the human; resumes on the next human message.
    Stopped,
    /// Goal declared done.
    Finished,
    /// Terminated by the turn budget.
    Failed,
}

impl CoordinatorState {
    /// Snake-case name.
    pub fn as_str(&self) -> &'static str {
        match self {
            CoordinatorState::Planning => "planning",
            CoordinatorState::WaitingForActivity => "waiting_for_activity",
            CoordinatorState::Stopped => "stopped",
            CoordinatorState::Finished => "finished",
            CoordinatorState::Failed => "failed",
        }
    }

    /// True once no further planning will happen.
    pub fn is_terminal(&self) -> bool {
        matches!(self, CoordinatorState::Finished | CoordinatorState::Failed)
    }
}

impl fmt::Display for CoordinatorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One line of the human-facing conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatEntry {
    /// Author (`human`, `coordinator`, or a worker name).
    pub role: String,
    /// Recipient, when directed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,
    /// Text.
    pub content: String,
    /// Time written.
    #[serde(rename = "ts")]
    pub timestamp: DateTime<Utc>,
}

impl ChatEntry {
    /// An entry stamped now.
    pub fn new(role: impl Into<String>, to: Option<&str>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            to: to.map(str::to_string),
            content: content.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Overview of one agent run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentSummary {
    /// Run id.
    pub id: Uuid,
    /// The human goal.
    pub goal: String,
    /// Run mode.
    pub mode: AgentMode,
    /// Coordinator state.
    pub state: CoordinatorState,
    /// Why the run failed, if it did.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
    /// Node totals.
    pub nodes: NodeCounts,
    /// Workers in the roster.
    pub workers: usize,
    /// Planning turns used.
    pub turns_used: u32,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last persisted change.
    pub updated_at: DateTime<Utc>,
}

/// Everything needed to bring a run back after a restart.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSnapshot {
    /// Run overview.
    pub summary: AgentSummary,
    /// Board nodes in creation order.
    pub nodes: Vec<Node>,
    /// Coordinator conversation.
    pub conversation: Vec<Message>,
    /// Human-facing chat log.
    pub chat_log: Vec<ChatEntry>,
    /// Worker roster.
    pub workers: Vec<WorkerInfo>,
}
