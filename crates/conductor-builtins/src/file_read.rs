use crate::workspace::resolve_within;
use conductor_core::{ConductorResult, ToolCall, ToolResult};
use conductor_skills::{Skill, SkillContext, SkillDescriptor};
use async_trait::async_trait;
use tracing::info;

const MAX_FILE_SIZE: u64 = 1024 * 1024; // 1MB

/// Reads a UTF-8 file from the caller's workspace.
pub struct FileReadSkill {
    descriptor: SkillDescriptor,
}

impl FileReadSkill {
    /// Creates the skill.
    pub fn new() -> Self {
        Self {
            descriptor: SkillDescriptor {
                name: "read_file".to_string(),
                description: "Read a text file from your workspace.".to_string(),
                parameters_schema: serde_json::json!({
                    "type": "object",
                    "properties": {
                        "path": {
                            "type": "string",
                            "description": "Workspace-relative path of the file"
                        }
                    },
                    "required": ["path"]
                }),
            },
        }
    }
}

impl Default for FileReadSkill {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Skill for FileReadSkill {
    fn descriptor(&self) -> &SkillDescriptor {
        &self.descriptor
    }

    async fn execute(&self, call: ToolCall, ctx: &SkillContext) -> ConductorResult<ToolResult> {
        let path_str = call.arguments["path"].as_str().unwrap_or_default();
        if path_str.is_empty() {
            return Ok(ToolResult::error(&call.id, "Empty path"));
        }

        let path = match resolve_within(&ctx.workspace, path_str) {
            Ok(p) => p,
            Err(e) => return Ok(ToolResult::error(&call.id, e.to_string())),
        };

        let metadata = match tokio::fs::metadata(&path).await {
            Ok(m) => m,
            Err(e) => {
                return Ok(ToolResult::error(
                    &call.id,
                    format!("Cannot read '{path_str}': {e}"),
                ));
            }
        };

        if !metadata.is_file() {
            return Ok(ToolResult::error(
                &call.id,
                format!("'{path_str}' is not a file"),
            ));
        }

        if metadata.len() > MAX_FILE_SIZE {
            return Ok(ToolResult::error(
                &call.id,
                format!(
                    "File too large: {} bytes (max: {MAX_FILE_SIZE} bytes)",
                    metadata.len()
                ),
            ));
        }

        info!(caller = %ctx.caller, path = %path.display(), "Reading file");

        match tokio::fs::read_to_string(&path).await {
            Ok(content) => Ok(ToolResult::success(&call.id, content)),
            Err(e) => Ok(ToolResult::error(
                &call.id,
                format!("Cannot read '{path_str}' as text: {e}"),
            )),
        }
    }
}
