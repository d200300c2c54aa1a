use crate::workspace::resolve_within;
use conductor_core::{ConductorResult, ToolCall, ToolResult};
use conductor_skills::{Skill, SkillContext, SkillDescriptor};
use async_trait::async_trait;
use tracing::info;

/// Writes (creates or overwrites) a file in the caller's workspace.
pub struct FileWriteSkill {
    descriptor: SkillDescriptor,
}

impl FileWriteSkill {
    /// Creates the skill.
    pub fn new() -> Self {
        Self {
            descriptor: SkillDescriptor {
                name: "write_file".to_string(),
                description: "Write a text file in your workspace. Parent directories are created."
                    .to_string(),
                parameters_schema: serde_json::json!({
                    "type": "object",
                    "properties": {
                        "path": {
                            "type": "string",
                            "description": "Workspace-relative path of the file"
                        },
                        "content": {
                            "type": "string",
                            "description": "Full file content"
                        }
                    },
                    "required": ["path", "content"]
                }),
            },
        }
    }
}

impl Default for FileWriteSkill {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Skill for FileWriteSkill {
    fn descriptor(&self) -> &SkillDescriptor {
        &self.descriptor
    }

    async fn execute(&self, call: ToolCall, ctx: &SkillContext) -> ConductorResult<ToolResult> {
        let path_str = call.arguments["path"].as_str().unwrap_or_default();
        let Some(content) = call.arguments["content"].as_str() else {
            return Ok(ToolResult::error(&call.id, "'content' must be a string"));
        };

        if path_str.is_empty() {
            return Ok(ToolResult::error(&call.id, "Empty path"));
        }

        let path = match resolve_within(&ctx.workspace, path_str) {
            Ok(p) => p,
            Err(e) => return Ok(ToolResult::error(&call.id, e.to_string())),
        };

        if let Some(parent) = path.parent() {
            if let Err(e) = tokio::fs::create_dir_all(parent).await {
                return Ok(ToolResult::error(
                    &call.id,
                    format!("Cannot create directory for '{path_str}': {e}"),
                ));
            }
        }

        info!(caller = %ctx.caller, path = %path.display(), bytes = content.len(), "Writing file");

        match tokio::fs::write(&path, content).await {
            Ok(()) => Ok(ToolResult::success(
                &call.id,
                format!("Wrote {} bytes to {path_str}", content.len()),
            )),
            Err(e) => Ok(ToolResult::error(
                &call.id,
                format!("Cannot write '{path_str}': {e}"),
            )),
        }
    }
}
