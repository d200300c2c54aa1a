use async_trait::async_trait;
use conductor_core::{ConductorError, ConductorResult};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::process::Stdio;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Model prefix that routes a worker to the external executor.
pub const EXECUTOR_MODEL_PREFIX: &str = "claude-code";

/// Extracts the executor sub-model from a `claude-code/<model>` string.
///
/// `claude-code` alone maps to `sonnet`. Returns `None` for models that are
/// not executor models.
pub fn executor_model(model: &str) -> Option<String> {
    if model == EXECUTOR_MODEL_PREFIX {
        return Some("sonnet".to_string());
    }
    let sub = model.strip_prefix(EXECUTOR_MODEL_PREFIX)?.strip_prefix('/')?;
    Some(if sub.is_empty() { "sonnet" } else { sub }.to_string())
}

/// One invocation of an external executor.
#[derive(Debug, Clone)]
pub struct ExecutorRequest {
    /// Task prompt.
    pub prompt: String,
    /// Extra system prompt appended to the executor's own.
    pub system_prompt: Option<String>,
    /// Working directory of the child process.
    pub working_dir: PathBuf,
    /// Executor model (e.g. `opus`, `sonnet`).
    pub model: Option<String>,
}

/// A tool invocation reported by the executor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutorToolUse {
    /// Tool-use identifier.
    pub id: String,
    /// Tool name.
    pub name: String,
    /// Tool input.
    pub input: serde_json::Value,
}

/// Final summary of an executor run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutorOutcome {
    /// Final result text.
    pub result: String,
    /// Whether the executor reported failure.
    pub is_error: bool,
    /// Total cost in USD.
    pub cost_usd: f64,
    /// Wall-clock duration.
    pub duration_ms: u64,
    /// Number of turns the executor took.
    pub num_turns: u32,
}

/// Structured events streamed by an executor.
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutorEvent {
    /// Session started.
    Init {
        /// Executor session id.
        session_id: String,
        /// Model actually used.
        model: String,
        /// Tools available to the executor.
        tools: Vec<String>,
    },
    /// One assistant turn.
    Turn {
        /// Text output of the turn, if any.
        text: Option<String>,
        /// Tools invoked during the turn.
        tool_uses: Vec<ExecutorToolUse>,
    },
    /// Final result.
    Result(ExecutorOutcome),
}

/// An autonomous agent run as a child process.
///
/// Implementations stream [`ExecutorEvent`]s into `events` while running and
/// return the final outcome. Dropping the returned future must stop the
/// child.
#[async_trait]
pub trait ExternalExecutor: Send + Sync {
    /// Runs `request` to completion.
    async fn execute(
        &self,
        request: ExecutorRequest,
        events: mpsc::UnboundedSender<ExecutorEvent>,
    ) -> ConductorResult<ExecutorOutcome>;
}

/// Runs the `claude` CLI in print mode with `stream-json` output.
#[derive(Debug, Clone)]
pub struct ClaudeCodeExecutor {
    program: String,
    base_args: Vec<String>,
    skip_permissions: bool,
}

impl Default for ClaudeCodeExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl ClaudeCodeExecutor {
    /// The stock `claude -p --output-format stream-json --verbose` command.
    pub fn new() -> Self {
        Self {
            program: "claude".to_string(),
            base_args: ["-p", "--output-format", "stream-json", "--verbose"]
                .iter()
                .map(|s| (*s).to_string())
                .collect(),
            skip_permissions: true,
        }
    }

    /// A custom command line.
    ///
    /// Without `stream-json` and `--verbose` the CLI prints no structured
    /// turns, so such argument lists are rejected.
    pub fn with_command(
        program: impl Into<String>,
        args: Vec<String>,
    ) -> ConductorResult<Self> {
        for required in ["stream-json", "--verbose"] {
            if !args.iter().any(|a| a == required) {
                return Err(ConductorError::Config(format!(
                    "Executor command must include '{required}' for structured output"
                )));
            }
        }
        Ok(Self {
            program: program.into(),
            base_args: args,
            skip_permissions: false,
        })
    }

    /// Toggles `--dangerously-skip-permissions`.
    pub fn skip_permissions(mut self, skip: bool) -> Self {
        self.skip_permissions = skip;
        self
    }

    /// Full argument list for `request`.
    pub fn build_args(&self, request: &ExecutorRequest) -> Vec<String> {
        let mut args = self.base_args.clone();
        if let Some(model) = &request.model {
            args.push("--model".into());
            args.push(model.clone());
        }
        if self.skip_permissions {
            args.push("--dangerously-skip-permissions".into());
        }
        if let Some(system) = &request.system_prompt {
            args.push("--append-system-prompt".into());
            args.push(system.clone());
        }
        args.push(request.prompt.clone());
        args
    }
}

#[async_trait]
impl ExternalExecutor for ClaudeCodeExecutor {
    async fn execute(
        &self,
        request: ExecutorRequest,
        events: mpsc::UnboundedSender<ExecutorEvent>,
    ) -> ConductorResult<ExecutorOutcome> {
        let args = self.build_args(&request);
        info!(
            program = %self.program,
            model = request.model.as_deref().unwrap_or("default"),
            cwd = %request.working_dir.display(),
            "Starting external executor"
        );

        let mut child = Command::new(&self.program)
            .args(&args)
            .current_dir(&request.working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                ConductorError::Executor(format!("Failed to spawn '{}': {e}", self.program))
            })?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ConductorError::Executor("Failed to capture stdout".into()))?;

        // Drain stderr concurrently so a full pipe never blocks the child.
        let stderr_task = child.stderr.take().map(|mut stderr| {
            tokio::spawn(async move {
                let mut buf = String::new();
                let _ = stderr.read_to_string(&mut buf).await;
                buf
            })
        });

        let outcome = consume_stream(BufReader::new(stdout), &events).await;
        let status = child.wait().await?;

        if let Some(task) = stderr_task {
            if let Ok(stderr) = task.await {
                let stderr = stderr.trim();
                if !stderr.is_empty() {
                    let head: String = stderr.chars().take(500).collect();
                    warn!(stderr = %head, "External executor wrote to stderr");
                }
            }
        }

        if !status.success() {
            warn!(%status, "External executor exited with failure status");
        }

        outcome
    }
}

/// Reads `stream-json` lines until EOF, forwarding parsed events.
///
/// Returns the outcome carried by the `result` event; a stream that ends
/// without one is an error.
pub async fn consume_stream<R>(
    reader: R,
    events: &mpsc::UnboundedSender<ExecutorEvent>,
) -> ConductorResult<ExecutorOutcome>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    let mut outcome = None;

    while let Some(line) = lines.next_line().await? {
        let Some(event) = parse_stream_line(&line) else {
            continue;
        };
        if let ExecutorEvent::Result(ref result) = event {
            outcome = Some(result.clone());
        }
        // A closed receiver only means nobody is watching.
        let _ = events.send(event);
    }

    outcome.ok_or_else(|| {
        ConductorError::Executor("Executor exited without a result event".into())
    })
}

/// Parses one line of `stream-json` output.
///
/// Blank lines, non-JSON noise and event types without a structured
/// counterpart yield `None`.
pub fn parse_stream_line(line: &str) -> Option<ExecutorEvent> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }

    let data: serde_json::Value = match serde_json::from_str(line) {
        Ok(v) => v,
        Err(_) => {
            let head: String = line.chars().take(200).collect();
            warn!(line = %head, "Non-JSON executor output");
            return None;
        }
    };

    match data["type"].as_str() {
        Some("system") if data["subtype"].as_str().unwrap_or("init") == "init" => {
            Some(ExecutorEvent::Init {
                session_id: data["session_id"].as_str().unwrap_or_default().to_string(),
                model: data["model"].as_str().unwrap_or_default().to_string(),
                tools: data["tools"]
                    .as_array()
                    .map(|tools| {
                        tools
                            .iter()
                            .filter_map(|t| t.as_str().map(str::to_string))
                            .collect()
                    })
                    .unwrap_or_default(),
            })
        }
        Some("assistant") => {
            let blocks = data["message"]["content"]
                .as_array()
                .cloned()
                .unwrap_or_default();
            let texts: Vec<&str> = blocks
                .iter()
                .filter(|b| b["type"] == "text")
                .filter_map(|b| b["text"].as_str())
                .collect();
            let tool_uses = blocks
                .iter()
                .filter(|b| b["type"] == "tool_use")
                .map(|b| ExecutorToolUse {
                    id: b["id"].as_str().unwrap_or_default().to_string(),
                    name: b["name"].as_str().unwrap_or_default().to_string(),
                    input: b["input"].clone(),
                })
                .collect();
            Some(ExecutorEvent::Turn {
                text: if texts.is_empty() {
                    None
                } else {
                    Some(texts.join("\n"))
                },
                tool_uses,
            })
        }
        Some("result") => Some(ExecutorEvent::Result(ExecutorOutcome {
            result: data["result"].as_str().unwrap_or_default().to_string(),
            is_error: data["is_error"].as_bool().unwrap_or(false),
            cost_usd: data["total_cost_usd"].as_f64().unwrap_or(0.0),
            duration_ms: data["duration_ms"].as_u64().unwrap_or(0),
            num_turns: data["num_turns"]
                .as_u64()
                .and_then(|n| u32::try_from(n).ok())
                .unwrap_or(0),
        })),
        other => {
            debug!(event_type = ?other, "Ignoring executor event");
            None
        }
    }
}
