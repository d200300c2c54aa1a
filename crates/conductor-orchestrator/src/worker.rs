use crate::mailbox::{COORDINATOR, HUMAN};
use crate::prompts::{
    external_system_prompt, failure_notes, truncate_chars, worker_assignment,
    worker_failed_message, worker_system_prompt,
};
use crate::runtime::AgentRuntime;
use crate::types::{Node, WorkerInfo};
use conductor_agent::{
    with_retry, ExecutorEvent, ExecutorRequest, ExternalExecutor, LlmBackend, LlmResponse,
    RetryPolicy,
};
use conductor_builtins::{NodeWorkspace, WorkerMemory};
use conductor_core::{ConductorError, ConductorResult, Message, ToolCall, ToolResult};
use conductor_skills::{SkillContext, SkillDescriptor};
use serde_json::json;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// File an external executor may write to override its final message.
pub const EXTERNAL_RESULT_FILE: &str = "_result.md";
/// Copy of the task written into the scratch area for external executors.
pub const EXTERNAL_TASK_FILE: &str = "_task.md";

const CANCELLED: &str = "cancelled";

/// How a worker gets its node done.
#[derive(Clone)]
pub enum WorkerEngine {
    /// Plan/act loop against an inference backend.
    Harnessed(Arc<dyn LlmBackend>),
    /// Delegation to an autonomous child process.
    External {
        /// The executor.
        executor: Arc<dyn ExternalExecutor>,
        /// Executor sub-model (e.g. `sonnet`).
        model: String,
    },
}

/// Terminal result of one worker run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeOutcome {
    /// The node completed with this result.
    Completed(String),
    /// The node failed with this error.
    Failed(String),
    /// The run was cancelled; the node is marked failed.
    Cancelled,
}

/// One worker executing one node.
pub struct WorkerRun {
    runtime: Arc<AgentRuntime>,
    worker: WorkerInfo,
    node: Node,
    engine: WorkerEngine,
    cancel: CancellationToken,
    retry: RetryPolicy,
    max_iterations: u32,
}

impl WorkerRun {
    /// A run for `node`, which must already be assigned to `worker`.
    pub fn new(runtime: Arc<AgentRuntime>, worker: WorkerInfo, node: Node, engine: WorkerEngine) -> Self {
        let cancel = runtime.worker_token();
        Self {
            runtime,
            worker,
            node,
            engine,
            cancel,
            retry: RetryPolicy::default(),
            max_iterations: 20,
        }
    }

    /// Retry policy for inference calls.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Cap on plan/act iterations.
    pub fn with_max_iterations(mut self, max_iterations: u32) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    /// Overrides the cancellation token.
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Executes the node until it is completed, failed or cancelled, then
    /// releases the worker.
    pub async fn run(self) -> NodeOutcome {
        let workspace = match NodeWorkspace::create(&self.runtime.nodes_dir(), self.node.id).await {
            Ok(workspace) => workspace,
            Err(e) => {
                let fallback = NodeWorkspace::at(self.runtime.nodes_dir().join(self.node.id.to_string()));
                return self.report_failure(&fallback, &[], &e.to_string()).await;
            }
        };

        info!(worker = %self.worker.name, node_id = %self.node.id, kind = self.worker.kind.as_str(), "Worker started node");
        self.runtime.events.publish(
            "node.started",
            json!({
                "node_id": self.node.id,
                "worker_id": self.worker.id,
                "worker": self.worker.name,
            }),
        );

        let mut transcript = Vec::new();
        let outcome = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => None,
            result = self.execute(&workspace, &mut transcript) => Some(result),
        };

        match outcome {
            None => self.report_cancelled(&workspace, &transcript).await,
            Some(Ok(result)) => self.report_success(&workspace, result).await,
            Some(Err(e)) => self.report_failure(&workspace, &transcript, &e.to_string()).await,
        }
    }

    async fn execute(
        &self,
        workspace: &NodeWorkspace,
        transcript: &mut Vec<Message>,
    ) -> ConductorResult<String> {
        match &self.engine {
            WorkerEngine::Harnessed(backend) => {
                self.run_harnessed(backend.as_ref(), workspace, transcript).await
            }
            WorkerEngine::External { executor, model } => {
                self.run_external(executor.as_ref(), model, workspace, transcript)
                    .await
            }
        }
    }

    async fn run_harnessed(
        &self,
        backend: &dyn LlmBackend,
        workspace: &NodeWorkspace,
        transcript: &mut Vec<Message>,
    ) -> ConductorResult<String> {
        let memory = match self.memory().read().await {
            Ok(memory) => memory,
            Err(e) => {
                warn!(worker = %self.worker.name, error = %e, "Failed to read worker memory");
                None
            }
        };
        let system = worker_system_prompt(&self.worker, memory.as_deref());
        let tools = self.tools();
        let upstream = self.upstream();
        let nodes_dir = self.runtime.nodes_dir();
        transcript.push(Message::user(worker_assignment(&self.node, &upstream, &nodes_dir)));

        let mut ctx = SkillContext::new(workspace.scratch(), self.worker.name.clone());
        for dep in &upstream {
            let published = NodeWorkspace::at(nodes_dir.join(dep.id.to_string())).published();
            ctx = ctx
                .with_upstream(dep.name.clone(), published.clone())
                .with_upstream(dep.id.to_string(), published);
        }

        for iteration in 0..self.max_iterations {
            // Yield point: fold in anything sent to this worker.
            transcript.extend(self.inbox());

            let system_ref = system.as_str();
            let tools_ref = tools.as_slice();
            let turns = transcript.as_slice();
            let response = with_retry(&self.retry, &self.worker.name, move || {
                backend.chat(Some(system_ref), turns, tools_ref)
            })
            .await?;

            match response {
                LlmResponse::Done(text) if !text.trim().is_empty() => {
                    transcript.push(Message::assistant(text.clone()));
                    return Ok(text);
                }
                LlmResponse::Text(text) if !text.trim().is_empty() => {
                    transcript.push(Message::assistant(text));
                }
                LlmResponse::Done(_) | LlmResponse::Text(_) => {
                    return Err(ConductorError::Agent(format!(
                        "Empty response at iteration {iteration}"
                    )));
                }
                LlmResponse::ToolUse {
                    content,
                    tool_calls,
                } => {
                    transcript.push(Message::assistant_with_tools(content, tool_calls.clone()));
                    // Mail drained between calls lands after the batch's tool
                    // results, which must directly follow the tool calls.
                    let mut mail = Vec::new();
                    let mut published = None;
                    for call in tool_calls {
                        mail.extend(self.inbox());
                        let (result, summary) = self.dispatch(call, &ctx).await;
                        transcript.push(Message::tool_result(&result));
                        if summary.is_some() {
                            published = summary;
                            break;
                        }
                    }
                    transcript.extend(mail);
                    if let Some(summary) = published {
                        return Ok(summary);
                    }
                }
            }
        }

        Err(ConductorError::Agent(format!(
            "Max iterations ({}) reached without publishing",
            self.max_iterations
        )))
    }

    /// Drains this worker's mailbox into user turns.
    fn inbox(&self) -> Vec<Message> {
        self.runtime
            .mailbox
            .drain(&self.worker.name)
            .into_iter()
            .map(|envelope| {
                Message::user(format!("[Message from {}]: {}", envelope.from, envelope.body))
            })
            .collect()
    }

    fn upstream(&self) -> Vec<Node> {
        self.node
            .dependencies
            .iter()
            .filter_map(|id| self.runtime.board.get(*id))
            .collect()
    }

    fn memory(&self) -> WorkerMemory {
        WorkerMemory::at(&self.runtime.worker_dir(&self.worker.name))
    }

    fn tools(&self) -> Vec<SkillDescriptor> {
        let mut tools: Vec<SkillDescriptor> = self
            .runtime
            .skills
            .list_descriptors()
            .into_iter()
            .cloned()
            .collect();
        tools.push(SkillDescriptor {
            name: "publish".into(),
            description: "Finalize your work on this node. The summary becomes the node's result.".into(),
            parameters_schema: json!({
                "type": "object",
                "properties": {
                    "summary": {"type": "string", "description": "Summary of what you produced"}
                },
                "required": ["summary"]
            }),
        });
        tools.push(SkillDescriptor {
            name: "send_message".into(),
            description: "Send a message to the coordinator, another worker, or the human by name.".into(),
            parameters_schema: json!({
                "type": "object",
                "properties": {
                    "to": {"type": "string", "description": "Recipient name (default 'coordinator')"},
                    "content": {"type": "string", "description": "Message content"}
                },
                "required": ["content"]
            }),
        });
        tools
    }

    /// Runs one tool call. Returns the result turn and, for `publish`, the
    /// node result.
    async fn dispatch(&self, call: ToolCall, ctx: &SkillContext) -> (ToolResult, Option<String>) {
        self.runtime.pool.record_tool_call(self.worker.id).await;
        let args = call.arguments.to_string();
        self.runtime.events.publish(
            "tool.called",
            json!({
                "worker": self.worker.name,
                "node_id": self.node.id,
                "tool": call.name,
                "args": truncate_chars(&args, 100),
            }),
        );

        let mut published = None;
        let result = match call.name.as_str() {
            "publish" => match call.arguments.get("summary").and_then(|v| v.as_str()) {
                Some(summary) if !summary.trim().is_empty() => {
                    published = Some(summary.to_string());
                    ToolResult::success(&call.id, "Published.")
                }
                _ => ToolResult::error(&call.id, "Missing required argument 'summary' for 'publish'"),
            },
            "send_message" => self.send_message(&call),
            _ => match self.runtime.skills.execute(call.clone(), ctx).await {
                Ok(result) => result,
                Err(e) => ToolResult::error(&call.id, format!("Tool error: {e}")),
            },
        };

        self.runtime.events.publish(
            "tool.result",
            json!({
                "worker": self.worker.name,
                "node_id": self.node.id,
                "tool": call.name,
                "is_error": result.is_error,
                "result": truncate_chars(&result.content, 200),
            }),
        );
        (result, published)
    }

    fn send_message(&self, call: &ToolCall) -> ToolResult {
        let Some(content) = call
            .arguments
            .get("content")
            .and_then(|v| v.as_str())
            .filter(|s| !s.trim().is_empty())
        else {
            return ToolResult::error(&call.id, "Missing required argument 'content' for 'send_message'");
        };
        let to = call
            .arguments
            .get("to")
            .and_then(|v| v.as_str())
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .unwrap_or(COORDINATOR);

        if to.eq_ignore_ascii_case(HUMAN) {
            self.runtime.log_chat(&self.worker.name, Some(HUMAN), content);
        } else {
            self.runtime.send(&self.worker.name, Some(to), content);
        }
        ToolResult::success(&call.id, format!("Message sent to {to}."))
    }

    async fn run_external(
        &self,
        executor: &dyn ExternalExecutor,
        model: &str,
        workspace: &NodeWorkspace,
        transcript: &mut Vec<Message>,
    ) -> ConductorResult<String> {
        let scratch = workspace.scratch();
        tokio::fs::write(scratch.join(EXTERNAL_TASK_FILE), &self.node.description).await?;

        let prompt = worker_assignment(&self.node, &self.upstream(), &self.runtime.nodes_dir());
        transcript.push(Message::user(prompt.clone()));

        let request = ExecutorRequest {
            prompt,
            system_prompt: Some(external_system_prompt(&self.worker)),
            working_dir: scratch.clone(),
            model: Some(model.to_string()),
        };
        info!(worker = %self.worker.name, node_id = %self.node.id, model, "Launching external executor");

        let (tx, mut rx) = mpsc::unbounded_channel();
        let translate = async {
            while let Some(event) = rx.recv().await {
                self.on_executor_event(event, transcript).await;
            }
        };
        let (outcome, ()) = tokio::join!(executor.execute(request, tx), translate);
        let outcome = outcome?;

        let mut result = outcome.result;
        if let Ok(written) = tokio::fs::read_to_string(scratch.join(EXTERNAL_RESULT_FILE)).await {
            if !written.trim().is_empty() {
                result = written;
            }
        }

        if outcome.is_error {
            return Err(ConductorError::Executor(format!(
                "Executor reported an error: {}",
                truncate_chars(&result, 500)
            )));
        }
        if result.trim().is_empty() {
            return Err(ConductorError::Executor(
                "Executor completed but produced no result.".into(),
            ));
        }
        Ok(result)
    }

    async fn on_executor_event(&self, event: ExecutorEvent, transcript: &mut Vec<Message>) {
        match event {
            ExecutorEvent::Init {
                session_id,
                model,
                tools,
            } => {
                self.runtime.events.publish(
                    "executor.init",
                    json!({
                        "worker": self.worker.name,
                        "node_id": self.node.id,
                        "session_id": session_id,
                        "model": model,
                        "tools": tools.len(),
                    }),
                );
            }
            ExecutorEvent::Turn { text, tool_uses } => {
                let calls: Vec<ToolCall> = tool_uses
                    .into_iter()
                    .map(|tu| ToolCall {
                        id: tu.id,
                        name: tu.name,
                        arguments: tu.input,
                    })
                    .collect();
                for call in &calls {
                    self.runtime.pool.record_tool_call(self.worker.id).await;
                    let args = call.arguments.to_string();
                    self.runtime.events.publish(
                        "tool.called",
                        json!({
                            "worker": self.worker.name,
                            "node_id": self.node.id,
                            "tool": format!("cc:{}", call.name),
                            "args": truncate_chars(&args, 100),
                        }),
                    );
                }
                if text.is_some() || !calls.is_empty() {
                    transcript.push(Message::assistant_with_tools(text, calls));
                }
            }
            ExecutorEvent::Result(outcome) => {
                info!(
                    worker = %self.worker.name,
                    cost_usd = outcome.cost_usd,
                    duration_ms = outcome.duration_ms,
                    "External executor finished"
                );
                self.runtime.events.publish(
                    "executor.result",
                    json!({
                        "worker": self.worker.name,
                        "node_id": self.node.id,
                        "is_error": outcome.is_error,
                        "cost_usd": outcome.cost_usd,
                        "duration_ms": outcome.duration_ms,
                        "num_turns": outcome.num_turns,
                    }),
                );
            }
        }
    }

    async fn report_success(&self, workspace: &NodeWorkspace, result: String) -> NodeOutcome {
        if let Err(e) = workspace.publish().await {
            warn!(node_id = %self.node.id, error = %e, "Failed to publish node files");
        }
        if let Err(e) = workspace.write_result(&result).await {
            warn!(node_id = %self.node.id, error = %e, "Failed to write node result");
        }
        if let Err(e) = self.memory().append(self.node.id, &result).await {
            warn!(worker = %self.worker.name, error = %e, "Failed to update worker memory");
        }
        if let Err(e) = self.runtime.board.complete(self.node.id, self.worker.id, result.clone()) {
            warn!(node_id = %self.node.id, error = %e, "Board rejected completion");
        }
        if let Err(e) = self.runtime.pool.release(self.worker.id, true).await {
            warn!(worker = %self.worker.name, error = %e, "Failed to release worker");
        }
        self.runtime.wakeup.notify_one();
        NodeOutcome::Completed(result)
    }

    async fn report_failure(
        &self,
        workspace: &NodeWorkspace,
        transcript: &[Message],
        error: &str,
    ) -> NodeOutcome {
        warn!(worker = %self.worker.name, node_id = %self.node.id, error, "Worker failed node");
        let notes = failure_notes(&self.worker.name, &self.node, error, transcript);
        if let Err(e) = workspace.write_failure_notes(&notes).await {
            warn!(node_id = %self.node.id, error = %e, "Failed to write failure notes");
        }
        if let Err(e) = self.runtime.board.fail(self.node.id, self.worker.id, error) {
            warn!(node_id = %self.node.id, error = %e, "Board rejected failure");
        }
        if let Err(e) = self.runtime.pool.release(self.worker.id, false).await {
            warn!(worker = %self.worker.name, error = %e, "Failed to release worker");
        }
        // Delivery to the coordinator's mailbox also wakes it.
        self.runtime.send(
            &self.worker.name,
            Some(COORDINATOR),
            worker_failed_message(&self.worker.name, &self.node, error, &notes),
        );
        NodeOutcome::Failed(error.to_string())
    }

    async fn report_cancelled(&self, workspace: &NodeWorkspace, transcript: &[Message]) -> NodeOutcome {
        info!(worker = %self.worker.name, node_id = %self.node.id, "Worker cancelled");
        let notes = failure_notes(&self.worker.name, &self.node, CANCELLED, transcript);
        if let Err(e) = workspace.write_failure_notes(&notes).await {
            warn!(node_id = %self.node.id, error = %e, "Failed to write failure notes");
        }
        if let Err(e) = self.runtime.board.fail(self.node.id, self.worker.id, CANCELLED) {
            warn!(node_id = %self.node.id, error = %e, "Board rejected cancellation");
        }
        if let Err(e) = self.runtime.pool.release(self.worker.id, false).await {
            warn!(worker = %self.worker.name, error = %e, "Failed to release worker");
        }
        NodeOutcome::Cancelled
    }
}

/// Runs `run` on its own task. If the task panics, the worker is taken out
/// of rotation, its node is failed and the coordinator is woken.
pub fn spawn_worker(run: WorkerRun) -> JoinHandle<()> {
    let runtime = run.runtime.clone();
    let worker_id = run.worker.id;
    let worker_name = run.worker.name.clone();
    let node_id = run.node.id;

    let task = tokio::spawn(run.run());
    tokio::spawn(async move {
        match task.await {
            Ok(outcome) => {
                info!(worker = %worker_name, node_id = %node_id, outcome = ?outcome, "Worker run finished");
            }
            Err(e) if e.is_panic() => {
                error!(worker = %worker_name, node_id = %node_id, "Worker task panicked");
                runtime.pool.mark_failed(worker_id, "worker panicked").await;
                if let Err(e) = runtime.board.fail(node_id, worker_id, "worker panicked") {
                    warn!(node_id = %node_id, error = %e, "Board rejected failure");
                }
                runtime.wakeup.notify_one();
            }
            Err(_) => {}
        }
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::config::AgentMode;
    use crate::events::EventBus;
    use crate::mailbox::MessageBus;
    use crate::pool::WorkerRequest;
    use crate::types::{NodeSpec, NodeStatus, WorkerKind, WorkerStatus};
    use async_trait::async_trait;
    use conductor_builtins::register_builtins;
    use conductor_skills::SkillRegistry;
    use parking_lot::Mutex;
    use std::collections::VecDeque;
    use tempfile::TempDir;
    use uuid::Uuid;

    struct Scripted {
        replies: Mutex<VecDeque<ConductorResult<LlmResponse>>>,
        systems: Mutex<Vec<String>>,
        seen: Mutex<Vec<Vec<Message>>>,
    }

    impl Scripted {
        fn new(replies: Vec<ConductorResult<LlmResponse>>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.into()),
                systems: Mutex::new(Vec::new()),
                seen: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl LlmBackend for Scripted {
        async fn chat(
            &self,
            system: Option<&str>,
            messages: &[Message],
            _tools: &[SkillDescriptor],
        ) -> ConductorResult<LlmResponse> {
            self.systems.lock().push(system.unwrap_or_default().to_string());
            self.seen.lock().push(messages.to_vec());
            self.replies
                .lock()
                .pop_front()
                .unwrap_or_else(|| Ok(LlmResponse::Text("thinking".into())))
        }
    }

    async fn setup(tmp: &TempDir) -> (Arc<AgentRuntime>, WorkerInfo, Node) {
        let id = Uuid::new_v4();
        let mut skills = SkillRegistry::new();
        register_builtins(&mut skills);
        let runtime = Arc::new(
            AgentRuntime::new(
                id,
                "goal",
                AgentMode::Finite,
                2,
                tmp.path().join(id.to_string()),
                Arc::new(EventBus::new(id)),
                Arc::new(MessageBus::new()),
            )
            .with_skills(Arc::new(skills)),
        );
        let node = runtime
            .board
            .create_node(NodeSpec::new("write", "Write notes.md"), vec![])
            .unwrap();
        let worker = runtime
            .pool
            .acquire(
                WorkerRequest {
                    name: "Alice".into(),
                    role: "writer".into(),
                    kind: WorkerKind::Harnessed,
                    model: None,
                },
                node.id,
            )
            .await
            .unwrap();
        let node = runtime.board.assign(node.id, worker.id).unwrap();
        (runtime, worker, node)
    }

    fn call(id: &str, name: &str, arguments: serde_json::Value) -> ToolCall {
        ToolCall {
            id: id.into(),
            name: name.into(),
            arguments,
        }
    }

    #[tokio::test]
    async fn test_tools_then_publish_completes() {
        let tmp = TempDir::new().unwrap();
        let (runtime, worker, node) = setup(&tmp).await;
        let backend = Scripted::new(vec![
            Ok(LlmResponse::ToolUse {
                content: None,
                tool_calls: vec![
                    call("c1", "write_file", json!({"path": "notes.md", "content": "hi"})),
                    call("c2", "no_such_tool", json!({})),
                ],
            }),
            Ok(LlmResponse::ToolUse {
                content: Some("Done.".into()),
                tool_calls: vec![call("c3", "publish", json!({"summary": "notes written"}))],
            }),
        ]);

        let outcome = WorkerRun::new(runtime.clone(), worker.clone(), node.clone(), WorkerEngine::Harnessed(backend))
            .run()
            .await;

        assert_eq!(outcome, NodeOutcome::Completed("notes written".into()));
        let node = runtime.board.get(node.id).unwrap();
        assert_eq!(node.status, NodeStatus::Completed);
        let worker = runtime.pool.get(worker.id).await.unwrap();
        assert_eq!(worker.status, WorkerStatus::Idle);
        assert_eq!(worker.tool_calls, 3);

        let scratch = runtime.nodes_dir().join(node.id.to_string()).join("scratch");
        assert_eq!(std::fs::read_to_string(scratch.join("notes.md")).unwrap(), "hi");
        let errors: Vec<_> = runtime
            .events
            .history(None)
            .into_iter()
            .filter(|e| e.event_type == "tool.result" && e.payload["is_error"] == true)
            .collect();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].payload["tool"], "no_such_tool");
    }

    #[tokio::test]
    async fn test_iteration_cap_fails_once() {
        let tmp = TempDir::new().unwrap();
        let (runtime, worker, node) = setup(&tmp).await;
        let backend = Scripted::new(vec![]);

        let outcome = WorkerRun::new(runtime.clone(), worker, node.clone(), WorkerEngine::Harnessed(backend))
            .with_max_iterations(3)
            .run()
            .await;

        assert!(matches!(outcome, NodeOutcome::Failed(ref e) if e.contains("Max iterations (3)")));
        let mail = runtime.mailbox.drain(COORDINATOR);
        assert_eq!(mail.len(), 1);
        assert!(mail[0].body.starts_with("[WORKER FAILED] Alice"));
        let notes = NodeWorkspace::at(runtime.nodes_dir().join(node.id.to_string()))
            .read_failure_notes()
            .await
            .unwrap()
            .unwrap();
        assert!(notes.contains("## Conversation (4 messages)"));
    }

    #[tokio::test]
    async fn test_worker_inbox_is_folded_in() {
        let tmp = TempDir::new().unwrap();
        let (runtime, worker, node) = setup(&tmp).await;
        runtime.send(COORDINATOR, Some("Alice"), "use bullet points");
        let backend = Scripted::new(vec![Ok(LlmResponse::Done("- done".into()))]);

        let outcome = WorkerRun::new(runtime.clone(), worker, node, WorkerEngine::Harnessed(backend))
            .run()
            .await;
        assert_eq!(outcome, NodeOutcome::Completed("- done".into()));
        assert!(!runtime.mailbox.has_messages("Alice"));
    }

    #[tokio::test]
    async fn test_precancelled_run_fails_node_without_mail() {
        let tmp = TempDir::new().unwrap();
        let (runtime, worker, node) = setup(&tmp).await;
        let token = CancellationToken::new();
        token.cancel();

        let outcome = WorkerRun::new(runtime.clone(), worker.clone(), node.clone(), WorkerEngine::Harnessed(Scripted::new(vec![])))
            .with_cancel(token)
            .run()
            .await;

        assert_eq!(outcome, NodeOutcome::Cancelled);
        let node = runtime.board.get(node.id).unwrap();
        assert_eq!(node.status, NodeStatus::Failed);
        assert_eq!(node.error.as_deref(), Some("cancelled"));
        assert_eq!(runtime.pool.get(worker.id).await.unwrap().status, WorkerStatus::Idle);
        assert_eq!(runtime.mailbox.pending_count(COORDINATOR), 0);
    }

    #[tokio::test]
    async fn test_mail_between_tool_calls_follows_results() {
        let tmp = TempDir::new().unwrap();
        let (runtime, worker, node) = setup(&tmp).await;
        let backend = Scripted::new(vec![
            Ok(LlmResponse::ToolUse {
                content: None,
                tool_calls: vec![
                    call("c1", "send_message", json!({"to": "Alice", "content": "reminder"})),
                    call("c2", "list_files", json!({})),
                ],
            }),
            Ok(LlmResponse::Done("listed".into())),
        ]);

        let outcome = WorkerRun::new(runtime.clone(), worker, node, WorkerEngine::Harnessed(backend.clone()))
            .run()
            .await;
        assert_eq!(outcome, NodeOutcome::Completed("listed".into()));

        let seen = backend.seen.lock();
        let second = &seen[1];
        let tail: Vec<_> = second[second.len() - 3..].iter().map(|m| m.role).collect();
        assert_eq!(tail, vec![conductor_core::Role::Tool, conductor_core::Role::Tool, conductor_core::Role::User]);
        assert_eq!(second.last().unwrap().content, "[Message from Alice]: reminder");
    }

    #[tokio::test]
    async fn test_mail_before_publish_is_consumed() {
        let tmp = TempDir::new().unwrap();
        let (runtime, worker, node) = setup(&tmp).await;
        let backend = Scripted::new(vec![Ok(LlmResponse::ToolUse {
            content: None,
            tool_calls: vec![
                call("c1", "send_message", json!({"to": "Alice", "content": "late note"})),
                call("c2", "publish", json!({"summary": "done"})),
                call("c3", "write_file", json!({"path": "never.md", "content": "x"})),
            ],
        })]);

        let outcome = WorkerRun::new(runtime.clone(), worker.clone(), node.clone(), WorkerEngine::Harnessed(backend))
            .run()
            .await;
        assert_eq!(outcome, NodeOutcome::Completed("done".into()));
        assert!(!runtime.mailbox.has_messages("Alice"));
        // Calls after publish are not dispatched.
        assert_eq!(runtime.pool.get(worker.id).await.unwrap().tool_calls, 2);
        let scratch = runtime.nodes_dir().join(node.id.to_string()).join("scratch");
        assert!(!scratch.join("never.md").exists());
    }

    #[tokio::test]
    async fn test_success_publishes_scratch_and_records_memory() {
        let tmp = TempDir::new().unwrap();
        let (runtime, worker, node) = setup(&tmp).await;
        let backend = Scripted::new(vec![Ok(LlmResponse::ToolUse {
            content: None,
            tool_calls: vec![
                call("c1", "write_file", json!({"path": "notes.md", "content": "hi"})),
                call("c2", "publish", json!({"summary": "notes written"})),
            ],
        })]);

        WorkerRun::new(runtime.clone(), worker.clone(), node.clone(), WorkerEngine::Harnessed(backend))
            .run()
            .await;

        let root = runtime.nodes_dir().join(node.id.to_string());
        assert_eq!(std::fs::read_to_string(root.join("published/notes.md")).unwrap(), "hi");
        assert_eq!(std::fs::read_to_string(root.join("result.md")).unwrap(), "notes written");
        let memory = WorkerMemory::at(&runtime.worker_dir("Alice")).read().await.unwrap().unwrap();
        assert_eq!(memory, format!("## Node: {}\nnotes written", node.id));

        // The next run of the same worker sees its memory.
        let next = runtime
            .board
            .create_node(NodeSpec::new("again", "Summarize notes"), vec![node.id])
            .unwrap();
        let worker = runtime
            .pool
            .acquire(
                WorkerRequest {
                    name: "Alice".into(),
                    role: "writer".into(),
                    kind: WorkerKind::Harnessed,
                    model: None,
                },
                next.id,
            )
            .await
            .unwrap();
        let next = runtime.board.assign(next.id, worker.id).unwrap();
        let backend = Scripted::new(vec![
            Ok(LlmResponse::ToolUse {
                content: None,
                tool_calls: vec![call("c1", "read_upstream", json!({"node": "write", "path": "notes.md"}))],
            }),
            Ok(LlmResponse::Done("summarized".into())),
        ]);
        WorkerRun::new(runtime.clone(), worker, next, WorkerEngine::Harnessed(backend.clone()))
            .run()
            .await;

        assert!(backend.systems.lock()[0].contains("notes written"));
        let seen = backend.seen.lock();
        let read = seen[1].last().unwrap();
        assert!(!read.is_error, "{}", read.content);
        assert_eq!(read.content, "hi");
    }
}
