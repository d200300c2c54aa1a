use conductor_core::{ConductorResult, ToolCall, ToolResult};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Metadata describing a skill's interface.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkillDescriptor {
    /// Tool name the model uses to call the skill.
    pub name: String,
    /// Human-readable description shown to the model.
    pub description: String,
    /// JSON schema of the arguments object.
    pub parameters_schema: serde_json::Value,
}

impl SkillDescriptor {
    /// Names listed in the schema's `required` array.
    pub fn required_arguments(&self) -> Vec<&str> {
        self.parameters_schema["required"]
            .as_array()
            .map(|req| req.iter().filter_map(|v| v.as_str()).collect())
            .unwrap_or_default()
    }
}

/// Execution context handed to a skill.
#[derive(Debug, Clone)]
pub struct SkillContext {
    /// Directory the skill may read and write. Paths resolve inside it.
    pub workspace: PathBuf,
    /// Mailbox name of the entity invoking the skill.
    pub caller: String,
    /// Read-only directories of upstream nodes, keyed by node name and id.
    pub upstream: BTreeMap<String, PathBuf>,
}

impl SkillContext {
    /// Creates a context for `caller` scoped to `workspace`.
    pub fn new(workspace: impl Into<PathBuf>, caller: impl Into<String>) -> Self {
        Self {
            workspace: workspace.into(),
            caller: caller.into(),
            upstream: BTreeMap::new(),
        }
    }

    /// Makes `dir` readable under `key`.
    pub fn with_upstream(mut self, key: impl Into<String>, dir: impl Into<PathBuf>) -> Self {
        self.upstream.insert(key.into(), dir.into());
        self
    }
}

/// Trait that all skills implement.
#[async_trait]
pub trait Skill: Send + Sync {
    /// Interface description.
    fn descriptor(&self) -> &SkillDescriptor;

    /// Runs the tool call. Expected failures are returned as
    /// [`ToolResult::error`]; `Err` is reserved for unexpected faults.
    async fn execute(&self, call: ToolCall, ctx: &SkillContext) -> ConductorResult<ToolResult>;
}
