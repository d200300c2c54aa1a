use crate::skill::{Skill, SkillContext, SkillDescriptor};
use conductor_core::{ConductorError, ConductorResult, ToolCall, ToolResult};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, warn};

/// Central registry for all available skills.
pub struct SkillRegistry {
    skills: BTreeMap<String, Arc<dyn Skill>>,
}

impl SkillRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self {
            skills: BTreeMap::new(),
        }
    }

    /// Registers a skill, replacing any previous skill with the same name.
    pub fn register(&mut self, skill: Arc<dyn Skill>) {
        let name = skill.descriptor().name.clone();
        info!(skill = %name, "Registered skill");
        self.skills.insert(name, skill);
    }

    /// Looks up a skill by name.
    pub fn get(&self, name: &str) -> Option<&Arc<dyn Skill>> {
        self.skills.get(name)
    }

    /// Descriptors of every registered skill, ordered by name.
    pub fn list_descriptors(&self) -> Vec<&SkillDescriptor> {
        self.skills.values().map(|s| s.descriptor()).collect()
    }

    /// Executes a tool call.
    ///
    /// Unknown tools are an `Err`; a call missing a required argument, or whose
    /// arguments are not an object, yields an error [`ToolResult`] without
    /// reaching the skill.
    pub async fn execute(&self, call: ToolCall, ctx: &SkillContext) -> ConductorResult<ToolResult> {
        let skill = self
            .skills
            .get(&call.name)
            .ok_or_else(|| ConductorError::Skill(format!("Unknown skill: {}", call.name)))?;

        if !call.arguments.is_object() {
            warn!(skill = %call.name, "Tool arguments are not a JSON object");
            return Ok(ToolResult::error(
                &call.id,
                format!("Malformed arguments for '{}': expected a JSON object", call.name),
            ));
        }

        let missing: Vec<&str> = skill
            .descriptor()
            .required_arguments()
            .into_iter()
            .filter(|arg| call.arguments.get(*arg).map_or(true, |v| v.is_null()))
            .collect();
        if !missing.is_empty() {
            warn!(skill = %call.name, missing = ?missing, "Missing required tool arguments");
            return Ok(ToolResult::error(
                &call.id,
                format!(
                    "Missing required argument(s) for '{}': {}",
                    call.name,
                    missing.join(", ")
                ),
            ));
        }

        skill.execute(call, ctx).await
    }

    /// Number of registered skills.
    pub fn skill_count(&self) -> usize {
        self.skills.len()
    }
}

impl Default for SkillRegistry {
    fn default() -> Self {
        Self::new()
    }
}
