use crate::workspace::resolve_within;
use conductor_core::{ConductorResult, ToolCall, ToolResult};
use conductor_skills::{Skill, SkillContext, SkillDescriptor};
use async_trait::async_trait;
use tracing::info;

/// Longest upstream file returned inline, in characters.
pub const MAX_UPSTREAM_CHARS: usize = 50_000;
const TRUNCATED: &str = "\n\n[... truncated ...]";

/// Reads the published output of a node this node depends on.
///
/// Upstream directories come from [`SkillContext::upstream`]; nothing outside
/// them is reachable and nothing is ever written.
pub struct UpstreamReadSkill {
    descriptor: SkillDescriptor,
}

impl UpstreamReadSkill {
    /// Creates the skill.
    pub fn new() -> Self {
        Self {
            descriptor: SkillDescriptor {
                name: "read_upstream".to_string(),
                description: "Read files published by a node your task depends on. \
                              Omit path to list what it published."
                    .to_string(),
                parameters_schema: serde_json::json!({
                    "type": "object",
                    "properties": {
                        "node": {
                            "type": "string",
                            "description": "Name or id of the upstream node"
                        },
                        "path": {
                            "type": "string",
                            "description": "Path inside the node's published files"
                        }
                    },
                    "required": ["node"]
                }),
            },
        }
    }
}

impl Default for UpstreamReadSkill {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Skill for UpstreamReadSkill {
    fn descriptor(&self) -> &SkillDescriptor {
        &self.descriptor
    }

    async fn execute(&self, call: ToolCall, ctx: &SkillContext) -> ConductorResult<ToolResult> {
        let node = call.arguments["node"].as_str().unwrap_or_default().trim();
        let Some(root) = ctx.upstream.get(node) else {
            let known: Vec<&str> = ctx.upstream.keys().map(String::as_str).collect();
            let known = if known.is_empty() {
                "none".to_string()
            } else {
                known.join(", ")
            };
            return Ok(ToolResult::error(
                &call.id,
                format!("'{node}' is not an upstream node of this task (available: {known})"),
            ));
        };

        let path_str = call.arguments["path"].as_str().unwrap_or_default();
        let path = match resolve_within(root, path_str) {
            Ok(p) => p,
            Err(e) => return Ok(ToolResult::error(&call.id, e.to_string())),
        };

        let metadata = match tokio::fs::metadata(&path).await {
            Ok(m) => m,
            Err(e) => {
                return Ok(ToolResult::error(
                    &call.id,
                    format!("Cannot read '{path_str}' from '{node}': {e}"),
                ));
            }
        };

        if metadata.is_dir() {
            let mut entries = tokio::fs::read_dir(&path).await?;
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
            return Ok(ToolResult::success(&call.id, names.join("\n")));
        }

        info!(caller = %ctx.caller, node, path = %path.display(), "Reading upstream file");

        match tokio::fs::read_to_string(&path).await {
            Ok(content) => Ok(ToolResult::success(&call.id, clip(content))),
            Err(e) => Ok(ToolResult::error(
                &call.id,
                format!("Cannot read '{path_str}' from '{node}' as text: {e}"),
            )),
        }
    }
}

fn clip(content: String) -> String {
    match content.char_indices().nth(MAX_UPSTREAM_CHARS) {
        Some((i, _)) => format!("{}{TRUNCATED}", &content[..i]),
        None => content,
    }
}
