//! Agent orchestration engine: one coordinator decomposes a goal into a
//! dependency graph of work nodes, delegates nodes to workers and reacts to
//! their results until the goal is met or a human intervenes.
//!
//! # Main types
//!
//! - [`Agent`] / [`AgentBuilder`]: Façade for one run (messages, stop/finish, inspection).
//! - [`AgentRegistry`]: Live agents of a process, keyed by id.
//! - [`Board`]: The task DAG and its status transitions.
//! - [`Coordinator`]: Plan/act loop with stop and resume.
//! - [`WorkerRun`]: Executes one node, natively or through an external executor.
//! - [`MessageBus`]: Per-entity FIFO mailboxes.
//! - [`EventBus`]: Append-only event history with live subscriptions.

/// Coordinator actions and their interpretation from backend responses.
pub mod actions;
/// Agent façade and builder.
pub mod agent;
/// Task DAG.
pub mod board;
/// Run configuration.
pub mod config;
/// The coordinator control loop.
pub mod coordinator;
/// Event history and live subscriptions.
pub mod events;
/// Inter-entity mailboxes.
pub mod mailbox;
/// Worker roster.
pub mod pool;
/// Prompt and report rendering.
pub mod prompts;
/// Process-wide agent registry.
pub mod registry;
/// State shared by the entities of one run.
pub mod runtime;
/// Shared data types.
pub mod types;
/// Worker execution.
pub mod worker;

pub use actions::{coordinator_tools, ActionInterpreter, CoordinatorAction, PlannedAction};
pub use agent::{Agent, AgentBuilder, EVENTS_FILE, MESSAGES_FILE};
pub use board::Board;
pub use config::{AgentMode, OrchestratorConfig};
pub use coordinator::{Control, Coordinator};
pub use events::{EventBus, EventStream};
pub use mailbox::{Envelope, MessageBus, COORDINATOR, HUMAN};
pub use pool::{WorkerPool, WorkerRequest};
pub use registry::AgentRegistry;
pub use runtime::AgentRuntime;
pub use types::{
    AgentSummary, ChatEntry, CoordinatorState, Node, NodeCounts, NodeSpec, NodeStatus,
    RunSnapshot, WorkerInfo, WorkerKind, WorkerStatus,
};
pub use worker::{
    spawn_worker, NodeOutcome, WorkerEngine, WorkerRun, EXTERNAL_RESULT_FILE, EXTERNAL_TASK_FILE,
};
