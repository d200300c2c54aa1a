use crate::workspace::resolve_within;
use conductor_core::{ConductorResult, ToolCall, ToolResult};
use conductor_skills::{Skill, SkillContext, SkillDescriptor};
use async_trait::async_trait;

/// Lists a directory in the caller's workspace.
pub struct FileListSkill {
    descriptor: SkillDescriptor,
}

impl FileListSkill {
    /// Creates the skill.
    pub fn new() -> Self {
        Self {
            descriptor: SkillDescriptor {
                name: "list_files".to_string(),
                description: "List files in a workspace directory. Directories end with '/'."
                    .to_string(),
                parameters_schema: serde_json::json!({
                    "type": "object",
                    "properties": {
                        "path": {
                            "type": "string",
                            "description": "Workspace-relative directory (default: workspace root)"
                        }
                    }
                }),
            },
        }
    }
}

impl Default for FileListSkill {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Skill for FileListSkill {
    fn descriptor(&self) -> &SkillDescriptor {
        &self.descriptor
    }

    async fn execute(&self, call: ToolCall, ctx: &SkillContext) -> ConductorResult<ToolResult> {
        let path_str = call.arguments["path"].as_str().unwrap_or_default();
        let dir = match resolve_within(&ctx.workspace, path_str) {
            Ok(p) => p,
            Err(e) => return Ok(ToolResult::error(&call.id, e.to_string())),
        };

        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) => {
                return Ok(ToolResult::error(
                    &call.id,
                    format!("Cannot list '{path_str}': {e}"),
                ));
            }
        };

        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let mut name = entry.file_name().to_string_lossy().into_owned();
            if entry.file_type().await?.is_dir() {
                name.push('/');
            }
            names.push(name);
        }
        names.sort();

        if names.is_empty() {
            return Ok(ToolResult::success(&call.id, "(empty)"));
        }
        Ok(ToolResult::success(&call.id, names.join("\n")))
    }
}
