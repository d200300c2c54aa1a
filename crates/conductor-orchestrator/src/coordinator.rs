use crate::actions::{coordinator_tools, ActionInterpreter, CoordinatorAction};
use crate::config::{AgentMode, OrchestratorConfig};
use crate::mailbox::{COORDINATOR, HUMAN};
use crate::pool::WorkerRequest;
use crate::prompts::{board_view, coordinator_system_prompt, stop_summary, truncate_chars};
use crate::runtime::AgentRuntime;
use crate::types::{CoordinatorState, NodeSpec, NodeStatus, WorkerInfo, WorkerKind};
use crate::worker::{spawn_worker, WorkerEngine, WorkerRun};
use conductor_agent::{
    executor_model, with_retry, BackendFactory, ExternalExecutor, LlmBackend, LlmResponse,
};
use conductor_core::{ConductorError, ConductorResult, Message, ToolResult};
use conductor_session::{CompactionPolicy, Compactor, Conversation};
use serde_json::json;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

const DEFAULT_ROLE: &str = "general worker";

/// Requests delivered to a running coordinator from outside its loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Control {
    /// Halt planning until the human speaks again.
    Stop,
    /// Declare the goal achieved (finite mode).
    Finish {
        /// Closing summary for the chat log.
        summary: Option<String>,
    },
}

/// An assignment to a node that was still waiting on dependencies.
#[derive(Debug, Clone)]
struct DeferredAssignment {
    node: Uuid,
    worker: String,
    role: Option<String>,
    model: Option<String>,
}

/// The planning loop of one agent run.
///
/// Each state handler returns the next state; the loop in [`run`](Self::run)
/// records it and persists the run whenever it moves.
pub struct Coordinator {
    runtime: Arc<AgentRuntime>,
    backend: Arc<dyn LlmBackend>,
    workers: Arc<dyn BackendFactory>,
    executor: Option<Arc<dyn ExternalExecutor>>,
    config: OrchestratorConfig,
    control: mpsc::UnboundedReceiver<Control>,
    conversation: Conversation,
    deferred: Vec<DeferredAssignment>,
    last_seen_version: u64,
    summary_injected: bool,
}

impl Coordinator {
    /// Builds a coordinator for `runtime`. The conversation starts from
    /// whatever the runtime already holds, so restored runs keep context.
    pub fn new(
        runtime: Arc<AgentRuntime>,
        backend: Arc<dyn LlmBackend>,
        workers: Arc<dyn BackendFactory>,
        config: OrchestratorConfig,
        control: mpsc::UnboundedReceiver<Control>,
    ) -> Self {
        let conversation = Conversation::from_turns(runtime.conversation());
        Self {
            runtime,
            backend,
            workers,
            executor: None,
            config,
            control,
            conversation,
            deferred: Vec::new(),
            last_seen_version: 0,
            summary_injected: false,
        }
    }

    /// Enables `claude-code` worker models.
    pub fn with_executor(mut self, executor: Option<Arc<dyn ExternalExecutor>>) -> Self {
        self.executor = executor;
        self
    }

    /// Installs a compaction hook on the conversation.
    pub fn with_compactor(mut self, compactor: Arc<dyn Compactor>, policy: CompactionPolicy) -> Self {
        self.conversation = self.conversation.with_compactor(compactor, policy);
        self
    }

    /// Drives the run until it finishes or fails. Returns the terminal state.
    pub async fn run(mut self) -> CoordinatorState {
        let agent_id = self.runtime.id;
        let mut state = self.runtime.state();

        if self.conversation.is_empty() {
            self.conversation
                .push(Message::user(format!("Your goal:\n\n{}", self.runtime.goal)));
            info!(agent_id = %agent_id, mode = self.runtime.mode.as_str(), "Agent started");
            self.runtime.events.publish(
                "agent.started",
                json!({ "goal": self.runtime.goal, "mode": self.runtime.mode }),
            );
        } else {
            info!(agent_id = %agent_id, state = %state, turns = self.conversation.len(), "Agent resumed from snapshot");
            self.runtime
                .events
                .publish("agent.resumed", json!({ "state": state }));
            match state {
                CoordinatorState::Stopped => self.summary_injected = true,
                CoordinatorState::WaitingForActivity => {
                    // The board may have changed while the process was down.
                    state = CoordinatorState::Planning;
                    self.runtime.set_state(state);
                }
                _ => {}
            }
        }

        while !state.is_terminal() {
            let next = match state {
                CoordinatorState::Planning => self.plan_turn().await,
                CoordinatorState::WaitingForActivity => self.wait_for_activity().await,
                CoordinatorState::Stopped => self.stopped().await,
                CoordinatorState::Finished | CoordinatorState::Failed => break,
            };
            let moved = state == CoordinatorState::Planning || next != state;
            if moved {
                self.runtime.set_conversation(self.conversation.turns());
            }
            self.runtime.set_state(next);
            if moved {
                self.runtime.persist().await;
            }
            state = next;
        }

        info!(agent_id = %agent_id, state = %state, turns = self.runtime.turns_used(), "Coordinator exited");
        state
    }

    /// One plan/act turn.
    async fn plan_turn(&mut self) -> CoordinatorState {
        if let Ok(control) = self.control.try_recv() {
            return self.apply_control(control).await;
        }
        if self.runtime.turns_used() >= self.config.max_turns {
            return self.exhaust_budget();
        }
        let turn = self.runtime.record_turn();

        // Yield point: everything queued for the coordinator enters the
        // conversation here.
        self.drain_mailbox();
        let mut launched = self.launch_deferred().await;
        if let Err(e) = self.conversation.maybe_compact().await {
            warn!(agent_id = %self.runtime.id, error = %e, "Conversation compaction failed");
        }
        self.runtime.set_conversation(self.conversation.turns());

        // Anything that changes the board after this point warrants another
        // look once the turn is over.
        self.last_seen_version = self.runtime.board.version();
        let nodes = self.runtime.board.snapshot();
        let roster = self.runtime.pool.snapshot().await;
        let system = coordinator_system_prompt(&self.runtime.goal, self.runtime.mode, &nodes, &roster);
        let tools = coordinator_tools(self.runtime.mode);
        debug!(agent_id = %self.runtime.id, turn, turns = self.conversation.len(), "Planning turn");

        let backend = self.backend.as_ref();
        let system_ref = system.as_str();
        let tools_ref = tools.as_slice();
        let turns = self.conversation.turns();
        let outcome = tokio::select! {
            biased;
            Some(control) = self.control.recv() => Err(control),
            result = with_retry(&self.config.retry, COORDINATOR, move || {
                backend.chat(Some(system_ref), turns, tools_ref)
            }) => Ok(result),
        };

        let response = match outcome {
            Err(control) => return self.apply_control(control).await,
            Ok(Err(e)) => return self.inference_failed(&e),
            Ok(Ok(response)) => response,
        };

        self.conversation.push(match &response {
            LlmResponse::ToolUse {
                content,
                tool_calls,
            } => Message::assistant_with_tools(content.clone(), tool_calls.clone()),
            LlmResponse::Text(text) | LlmResponse::Done(text) => Message::assistant(text.clone()),
        });

        let mut tool_calls = 0usize;
        let mut finish = None;
        for planned in ActionInterpreter::interpret(&response) {
            let Some(call_id) = planned.call_id else {
                if let Ok(CoordinatorAction::Respond { text }) = planned.action {
                    self.runtime.log_chat(COORDINATOR, Some(HUMAN), text);
                }
                continue;
            };
            tool_calls += 1;
            let tool = planned.tool.unwrap_or_default();
            let result = match planned.action {
                Ok(action) => self.apply(action, &mut launched, &mut finish).await,
                Err(reason) => Err(ConductorError::Orchestrator(reason)),
            };
            let result = match result {
                Ok(content) => ToolResult::success(call_id, content),
                Err(e) => ToolResult::error(call_id, e.to_string()),
            };
            self.runtime.events.publish(
                "coordinator.action",
                json!({
                    "tool": tool,
                    "is_error": result.is_error,
                    "result": truncate_chars(&result.content, 200),
                }),
            );
            self.conversation.push(Message::tool_result(&result));
        }

        if let Some(summary) = finish {
            return self.finish(Some(summary));
        }

        if tool_calls > 0 {
            debug!(agent_id = %self.runtime.id, tool_calls, launched, "Continuing after tool calls");
            CoordinatorState::Planning
        } else {
            CoordinatorState::WaitingForActivity
        }
    }

    fn drain_mailbox(&mut self) {
        for envelope in self.runtime.mailbox.drain(COORDINATOR) {
            if envelope.from == HUMAN {
                // Already in the chat log, written by the agent when sent.
                self.conversation.push(Message::user(envelope.body));
            } else {
                self.runtime
                    .log_chat(&envelope.from, Some(COORDINATOR), envelope.body.clone());
                self.conversation.push(Message::user(format!(
                    "[Message from {}]: {}",
                    envelope.from, envelope.body
                )));
            }
        }
    }

    /// Starts deferred assignments whose nodes became ready. Returns how
    /// many were launched.
    async fn launch_deferred(&mut self) -> usize {
        let mut launched = 0;
        let pending = std::mem::take(&mut self.deferred);
        for deferred in pending {
            let status = self.runtime.board.get(deferred.node).map(|n| n.status);
            match status {
                Some(NodeStatus::Pending) => self.deferred.push(deferred),
                Some(NodeStatus::Ready) => {
                    match self
                        .launch(
                            deferred.node,
                            &deferred.worker,
                            deferred.role.clone(),
                            deferred.model.clone(),
                        )
                        .await
                    {
                        Ok(_) => {
                            launched += 1;
                            self.conversation.push(Message::user(format!(
                                "[System] Node {} is ready; worker '{}' started on it.",
                                deferred.node, deferred.worker
                            )));
                        }
                        Err(e) => self.conversation.push(Message::user(format!(
                            "[System] Could not start '{}' on node {}: {e}",
                            deferred.worker, deferred.node
                        ))),
                    }
                }
                other => {
                    let status = other.as_ref().map_or("missing", NodeStatus::as_str);
                    self.conversation.push(Message::user(format!(
                        "[System] Dropped the assignment of '{}' to node {}: the node is {status}.",
                        deferred.worker, deferred.node
                    )));
                }
            }
        }
        launched
    }

    async fn apply(
        &mut self,
        action: CoordinatorAction,
        launched: &mut usize,
        finish: &mut Option<String>,
    ) -> ConductorResult<String> {
        match action {
            CoordinatorAction::CreateNode {
                name,
                description,
                dependencies,
            } => {
                let mut deps = Vec::with_capacity(dependencies.len());
                for reference in &dependencies {
                    let node = self.runtime.board.resolve(reference).ok_or_else(|| {
                        ConductorError::Orchestrator(format!("Unknown dependency '{reference}'"))
                    })?;
                    deps.push(node.id);
                }
                let name = name.unwrap_or_else(|| derive_name(&description));
                let node = self
                    .runtime
                    .board
                    .create_node(NodeSpec::new(name, description), deps)?;
                Ok(format!(
                    "Created node {} ({}), status: {}",
                    node.id, node.name, node.status
                ))
            }
            CoordinatorAction::AddDependency { node, dependencies } => {
                let target = self.runtime.board.resolve(&node).ok_or_else(|| {
                    ConductorError::Orchestrator(format!("Unknown node '{node}'"))
                })?;
                let mut added = Vec::with_capacity(dependencies.len());
                for reference in &dependencies {
                    let dep = self.runtime.board.resolve(reference).ok_or_else(|| {
                        ConductorError::Orchestrator(format!("Unknown dependency '{reference}'"))
                    })?;
                    self.runtime.board.add_dependency(target.id, dep.id)?;
                    added.push(dep.name);
                }
                Ok(format!(
                    "Node {} ({}) now also waits on: {}",
                    target.id,
                    target.name,
                    added.join(", ")
                ))
            }
            CoordinatorAction::AssignWorker {
                node,
                worker,
                role,
                model,
            } => {
                let target = self.runtime.board.resolve(&node).ok_or_else(|| {
                    ConductorError::Orchestrator(format!("Unknown node '{node}'"))
                })?;
                match target.status {
                    NodeStatus::Ready => {
                        self.launch(target.id, &worker, role, model).await?;
                        *launched += 1;
                        Ok(format!(
                            "Worker '{worker}' assigned to node {}. It is running now.",
                            target.id
                        ))
                    }
                    NodeStatus::Pending => {
                        self.deferred.retain(|d| d.node != target.id);
                        self.deferred.push(DeferredAssignment {
                            node: target.id,
                            worker: worker.clone(),
                            role,
                            model,
                        });
                        Ok(format!(
                            "Node {} is waiting on its dependencies; '{worker}' will start once they complete.",
                            target.id
                        ))
                    }
                    other => Err(ConductorError::InvalidTransition {
                        node: target.id,
                        from: other.as_str().into(),
                        to: NodeStatus::Running.as_str().into(),
                    }),
                }
            }
            CoordinatorAction::SendMessage { to, content } => {
                if to.eq_ignore_ascii_case(HUMAN) {
                    self.runtime.log_chat(COORDINATOR, Some(HUMAN), content);
                    return Ok("Message delivered to the human.".into());
                }
                if self.runtime.pool.get_by_name(&to).await.is_none() {
                    return Err(ConductorError::UnknownWorker(to));
                }
                self.runtime.send(COORDINATOR, Some(&to), content);
                Ok(format!("Message sent to {to}."))
            }
            CoordinatorAction::CheckBoard => Ok(board_view(&self.runtime.board.snapshot())),
            CoordinatorAction::Respond { text } => {
                self.runtime.log_chat(COORDINATOR, Some(HUMAN), text);
                Ok("Delivered.".into())
            }
            CoordinatorAction::Finish { summary } => {
                if self.runtime.mode == AgentMode::Infinite {
                    return Err(ConductorError::Orchestrator(
                        "finish is not available in infinite mode".into(),
                    ));
                }
                *finish = Some(summary);
                Ok("Finishing.".into())
            }
        }
    }

    /// Acquires a worker, assigns it to the ready node and spawns its run.
    async fn launch(
        &self,
        node_id: Uuid,
        worker: &str,
        role: Option<String>,
        model: Option<String>,
    ) -> ConductorResult<WorkerInfo> {
        let engine = match model.as_deref().and_then(executor_model) {
            Some(sub_model) => {
                let executor = self.executor.clone().ok_or_else(|| {
                    ConductorError::Config("No external executor is configured".into())
                })?;
                WorkerEngine::External {
                    executor,
                    model: sub_model,
                }
            }
            None => WorkerEngine::Harnessed(self.workers.create(model.as_deref())),
        };
        let kind = match &engine {
            WorkerEngine::Harnessed(_) => WorkerKind::Harnessed,
            WorkerEngine::External { .. } => WorkerKind::External,
        };

        let request = WorkerRequest {
            name: worker.to_string(),
            role: role.unwrap_or_else(|| DEFAULT_ROLE.into()),
            kind,
            model,
        };
        let info = self.runtime.pool.acquire(request, node_id).await?;
        let node = match self.runtime.board.assign(node_id, info.id) {
            Ok(node) => node,
            Err(e) => {
                self.runtime.pool.unassign(info.id).await;
                return Err(e);
            }
        };

        info!(agent_id = %self.runtime.id, node_id = %node_id, worker = %info.name, kind = kind.as_str(), "Launching worker");
        let run = WorkerRun::new(self.runtime.clone(), info.clone(), node, engine)
            .with_retry(self.config.retry.clone())
            .with_max_iterations(self.config.worker_max_iterations);
        spawn_worker(run);
        Ok(info)
    }

    fn inference_failed(&mut self, error: &ConductorError) -> CoordinatorState {
        error!(agent_id = %self.runtime.id, error = %error, "Coordinator inference failed");
        self.runtime
            .events
            .publish("coordinator.error", json!({ "error": error.to_string() }));
        self.runtime.log_chat(
            "system",
            Some(HUMAN),
            format!("[Error] Coordinator inference failed: {error}"),
        );
        CoordinatorState::WaitingForActivity
    }

    fn exhaust_budget(&mut self) -> CoordinatorState {
        let reason = format!(
            "Turn budget exhausted after {} planning turns",
            self.config.max_turns
        );
        error!(agent_id = %self.runtime.id, max_turns = self.config.max_turns, "Turn budget exhausted");
        self.runtime.cancel_workers();
        self.runtime
            .log_chat("system", Some(HUMAN), format!("[Error] {reason}"));
        self.runtime
            .events
            .publish("agent.failed", json!({ "reason": reason }));
        self.runtime.set_failure(reason);
        CoordinatorState::Failed
    }

    fn finish(&mut self, summary: Option<String>) -> CoordinatorState {
        self.runtime.cancel_workers();
        let summary = summary.filter(|s| !s.trim().is_empty());
        if let Some(text) = &summary {
            self.runtime.log_chat(COORDINATOR, Some(HUMAN), text.clone());
        }
        info!(agent_id = %self.runtime.id, "Agent finished");
        self.runtime
            .events
            .publish("agent.finished", json!({ "summary": summary }));
        CoordinatorState::Finished
    }

    async fn apply_control(&mut self, control: Control) -> CoordinatorState {
        match control {
            Control::Stop => {
                self.runtime.cancel_workers();
                CoordinatorState::Stopped
            }
            Control::Finish { summary } => {
                if self.runtime.mode == AgentMode::Infinite {
                    warn!(agent_id = %self.runtime.id, "Ignoring finish request in infinite mode");
                    return self.runtime.state();
                }
                self.finish(summary)
            }
        }
    }

    /// The single suspension point of an active run.
    async fn wait_for_activity(&mut self) -> CoordinatorState {
        loop {
            if self.runtime.mailbox.has_messages(COORDINATOR)
                || self.runtime.board.version() != self.last_seen_version
            {
                return CoordinatorState::Planning;
            }

            let poll = tokio::time::sleep(self.config.poll_interval());
            tokio::select! {
                biased;
                Some(control) = self.control.recv() => return self.apply_control(control).await,
                () = self.runtime.wakeup.notified() => {
                    debug!(agent_id = %self.runtime.id, "Coordinator woken");
                }
                () = poll => {
                    if self.runtime.mode == AgentMode::Infinite {
                        return CoordinatorState::Planning;
                    }
                }
            }
        }
    }

    /// Parked after an explicit stop until the human speaks.
    async fn stopped(&mut self) -> CoordinatorState {
        if !self.summary_injected {
            // Mail queued before the stop is context, not a resume request.
            self.drain_mailbox();
            let nodes = self.runtime.board.snapshot();
            let roster = self.runtime.pool.snapshot().await;
            self.conversation
                .push(Message::user(stop_summary(&nodes, &roster)));
            self.summary_injected = true;
            info!(agent_id = %self.runtime.id, turns = self.conversation.len(), "Coordinator stopped");
            self.runtime.events.publish(
                "coordinator.stopped",
                json!({ "turns": self.conversation.len() }),
            );
            self.runtime.set_conversation(self.conversation.turns());
            self.runtime.persist().await;
        }

        loop {
            if self.runtime.mailbox.has_messages_from(COORDINATOR, HUMAN) {
                self.summary_injected = false;
                info!(agent_id = %self.runtime.id, "Coordinator resumed by human message");
                self.runtime.events.publish(
                    "coordinator.resumed",
                    json!({ "turns": self.conversation.len() }),
                );
                return CoordinatorState::Planning;
            }

            tokio::select! {
                biased;
                Some(control) = self.control.recv() => {
                    if let Control::Finish { summary } = control {
                        if self.runtime.mode == AgentMode::Finite {
                            return self.finish(summary);
                        }
                    }
                }
                () = self.runtime.wakeup.notified() => {}
            }
        }
    }
}

/// Short node name from the first words of a task.
fn derive_name(description: &str) -> String {
    let name = description
        .split_whitespace()
        .take(4)
        .map(|word| {
            word.chars()
                .filter(|c| c.is_alphanumeric())
                .collect::<String>()
                .to_lowercase()
        })
        .filter(|word| !word.is_empty())
        .collect::<Vec<_>>()
        .join("-");
    if name.is_empty() {
        "node".into()
    } else {
        truncate_chars(&name, 40).to_string()
    }
}
