//! Built-in skills and node workspaces for Conductor workers.
//!
//! Every board node gets a [`NodeWorkspace`] directory. Workers run their file
//! and shell tools inside the workspace's `scratch/` area and leave durable
//! artifacts (`result.md`, `failure_notes.md`) at its root. Completing a node
//! copies `scratch/` to `published/`, which downstream nodes read through
//! [`UpstreamReadSkill`].
//!
//! # Main entry points
//!
//! - [`register_builtins()`]: Register the workspace skills.
//! - [`NodeWorkspace`]: Scoped per-node directory.
//! - [`WorkerMemory`]: Per-worker notes carried across nodes.

/// Workspace file read skill.
pub mod file_read;
/// Workspace directory listing skill.
pub mod file_list;
/// Workspace file write skill.
pub mod file_write;
/// Per-worker memory file.
pub mod memory;
/// Shell command skill.
pub mod shell;
/// Upstream published-output reader.
pub mod upstream;
/// Per-node workspace directories.
pub mod workspace;

pub use file_list::FileListSkill;
pub use file_read::FileReadSkill;
pub use file_write::FileWriteSkill;
pub use memory::WorkerMemory;
pub use shell::ShellSkill;
pub use upstream::UpstreamReadSkill;
pub use workspace::{resolve_within, NodeWorkspace};

use conductor_skills::SkillRegistry;
use std::sync::Arc;

/// Register the built-in workspace skills.
pub fn register_builtins(registry: &mut SkillRegistry) {
    registry.register(Arc::new(FileReadSkill::new()));
    registry.register(Arc::new(FileWriteSkill::new()));
    registry.register(Arc::new(FileListSkill::new()));
    registry.register(Arc::new(UpstreamReadSkill::new()));
    registry.register(Arc::new(ShellSkill::new()));
}
