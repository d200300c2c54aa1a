//! Inference boundary for the Conductor engine.
//!
//! Everything that talks to a model lives here: provider configuration, the
//! [`LlmBackend`](backends::LlmBackend) trait and its HTTP implementations,
//! retry/failover, and the [`ExternalExecutor`] used when a worker delegates a
//! whole node to an autonomous CLI agent.

/// LLM provider backends.
pub mod backends;
/// Model and provider configuration.
pub mod config;
/// External autonomous executor (child-process agents).
pub mod executor;
/// Retry policy and multi-backend failover.
pub mod failover;
/// Client façade and backend factories.
pub mod llm;

pub use backends::LlmBackend;
pub use config::{LlmProvider, ModelConfig};
pub use executor::{
    executor_model, ClaudeCodeExecutor, ExecutorEvent, ExecutorOutcome, ExecutorRequest,
    ExecutorToolUse, ExternalExecutor, EXECUTOR_MODEL_PREFIX,
};
pub use failover::{compute_backoff, is_retryable, with_retry, FailoverBackend, RetryPolicy};
pub use llm::{BackendFactory, ConfigBackendFactory, LlmClient, LlmResponse};
