use conductor_core::{ConductorResult, ToolCall, ToolResult};
use conductor_skills::{Skill, SkillContext, SkillDescriptor};
use async_trait::async_trait;
use std::time::Duration;
use tracing::{info, warn};

const DEFAULT_TIMEOUT_SECS: u64 = 120;
const MAX_TIMEOUT_SECS: u64 = 600;
const MAX_OUTPUT_CHARS: usize = 10_000;
const TRUNCATED: &str = "\n\n[... truncated ...]";

/// Runs a shell command with the caller's workspace as working directory.
pub struct ShellSkill {
    descriptor: SkillDescriptor,
}

impl ShellSkill {
    /// Creates the skill.
    pub fn new() -> Self {
        Self {
            descriptor: SkillDescriptor {
                name: "bash".to_string(),
                description: "Run a shell command in your scratch directory. \
                              Returns combined stdout and stderr."
                    .to_string(),
                parameters_schema: serde_json::json!({
                    "type": "object",
                    "properties": {
                        "command": {
                            "type": "string",
                            "description": "The shell command to execute"
                        },
                        "timeout": {
                            "type": "integer",
                            "description": "Timeout in seconds (default: 120, max: 600)",
                            "default": DEFAULT_TIMEOUT_SECS
                        }
                    },
                    "required": ["command"]
                }),
            },
        }
    }
}

impl Default for ShellSkill {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Skill for ShellSkill {
    fn descriptor(&self) -> &SkillDescriptor {
        &self.descriptor
    }

    async fn execute(&self, call: ToolCall, ctx: &SkillContext) -> ConductorResult<ToolResult> {
        let command = call.arguments["command"].as_str().unwrap_or_default();
        if command.trim().is_empty() {
            return Ok(ToolResult::error(&call.id, "Empty command"));
        }

        let timeout_secs = call.arguments["timeout"]
            .as_u64()
            .unwrap_or(DEFAULT_TIMEOUT_SECS)
            .clamp(1, MAX_TIMEOUT_SECS);

        // Block obviously destructive patterns.
        let dangerous = ["rm -rf /", "mkfs", "dd if=", ":(){ :|:& };:"];
        if let Some(pattern) = dangerous.iter().find(|p| command.contains(*p)) {
            warn!(caller = %ctx.caller, command, "Blocked dangerous command");
            return Ok(ToolResult::error(
                &call.id,
                format!("Command blocked: contains dangerous pattern '{pattern}'"),
            ));
        }

        info!(caller = %ctx.caller, command, timeout = timeout_secs, "Executing shell command");

        let result = tokio::time::timeout(
            Duration::from_secs(timeout_secs),
            tokio::process::Command::new("sh")
                .arg("-c")
                .arg(command)
                .current_dir(&ctx.workspace)
                .kill_on_drop(true)
                .output(),
        )
        .await;

        match result {
            Ok(Ok(output)) => {
                let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
                combined.push_str(&String::from_utf8_lossy(&output.stderr));
                let mut text = clip(combined.trim());
                if text.is_empty() {
                    text = "(no output)".to_string();
                }
                if output.status.success() {
                    Ok(ToolResult::success(&call.id, text))
                } else {
                    let code = output.status.code().unwrap_or(-1);
                    Ok(ToolResult::error(&call.id, format!("{text}\n[exit code {code}]")))
                }
            }
            Ok(Err(e)) => Ok(ToolResult::error(
                &call.id,
                format!("Failed to execute command: {e}"),
            )),
            Err(_) => Ok(ToolResult::error(
                &call.id,
                format!("Command timed out after {timeout_secs}s"),
            )),
        }
    }
}

fn clip(output: &str) -> String {
    match output.char_indices().nth(MAX_OUTPUT_CHARS) {
        Some((i, _)) => format!("{}{TRUNCATED}", &output[..i]),
        None => output.to_string(),
    }
}
