//! Core types and error definitions for the Conductor orchestration engine.
//!
//! This crate provides the foundational types shared across all Conductor crates,
//! including error handling, conversation turns, tool call abstractions and the
//! event record published on an agent's event bus.
//!
//! # Main types
//!
//! - [`ConductorError`]: Unified error enum for all Conductor subsystems.
//! - [`ConductorResult`]: Convenience alias for `Result<T, ConductorError>`.
//! - [`Role`]: Turn role (user, assistant, system, tool).
//! - [`Message`]: A single turn within a conversation.
//! - [`ToolCall`]: Represents an LLM-initiated tool invocation request.
//! - [`ToolResult`]: The result returned after executing a tool call.
//! - [`Event`]: Immutable record of a state transition.

/// Error types.
pub mod error;
/// Event records.
pub mod event;
/// Conversation turns.
pub mod message;
/// Tool call request/result types.
pub mod tool;

pub use error::{ConductorError, ConductorResult};
pub use event::Event;
pub use message::{Message, Role};
pub use tool::{ToolCall, ToolResult};
