//! Tool (skill) abstraction and dispatch for Conductor workers.
//!
//! A [`Skill`] is a named tool with a JSON-schema interface. The
//! [`SkillRegistry`] resolves tool calls by name, validates required
//! arguments, and runs the skill inside a [`SkillContext`] scoped to the
//! caller's node workspace.

/// Skill registry and dispatch.
pub mod registry;
/// Skill trait and descriptor types.
pub mod skill;

pub use registry::SkillRegistry;
pub use skill::{Skill, SkillContext, SkillDescriptor};
