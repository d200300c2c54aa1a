use crate::backends::claude::ClaudeBackend;
use crate::backends::openai::OpenAiBackend;
use crate::backends::LlmBackend;
use crate::config::{LlmProvider, ModelConfig};
use crate::failover::FailoverBackend;
use async_trait::async_trait;
use conductor_core::{ConductorResult, Message, ToolCall};
use conductor_skills::SkillDescriptor;
use std::sync::Arc;

/// Response from the LLM: text, tool call requests, or a terminal answer.
#[derive(Debug, Clone)]
pub enum LlmResponse {
    /// Text produced without a terminal stop reason (e.g. truncated output).
    Text(String),
    /// One or more tool invocations, optionally with accompanying text.
    ToolUse {
        /// Text emitted alongside the calls.
        content: Option<String>,
        /// Requested calls, in order.
        tool_calls: Vec<ToolCall>,
    },
    /// The model ended its turn with this text.
    Done(String),
}

/// LLM client that dispatches to the correct provider backend.
///
/// When the config lists `fallback_models`, the client wraps the primary and
/// fallbacks in a [`FailoverBackend`] that tries each once per call. Retries
/// belong to the caller (see [`with_retry`](crate::with_retry)).
pub struct LlmClient {
    backend: Box<dyn LlmBackend>,
}

impl LlmClient {
    /// Builds the backend chain for `config`.
    pub fn new(config: ModelConfig) -> Self {
        if config.fallback_models.is_empty() {
            return Self {
                backend: Self::single(config),
            };
        }

        let mut chain = vec![Self::single(config.clone())];
        chain.extend(config.fallback_models.into_iter().map(Self::single));
        Self {
            backend: Box::new(FailoverBackend::single_attempt(chain)),
        }
    }

    /// Create from a pre-built backend (for custom/external providers).
    pub fn from_backend(backend: Box<dyn LlmBackend>) -> Self {
        Self { backend }
    }

    fn single(config: ModelConfig) -> Box<dyn LlmBackend> {
        match config.provider {
            LlmProvider::Claude => Box::new(ClaudeBackend::new(config)),
            LlmProvider::OpenAi | LlmProvider::OpenRouter | LlmProvider::Groq => {
                Box::new(OpenAiBackend::new(config))
            }
        }
    }
}

#[async_trait]
impl LlmBackend for LlmClient {
    async fn chat(
        &self,
        system_prompt: Option<&str>,
        messages: &[Message],
        tools: &[SkillDescriptor],
    ) -> ConductorResult<LlmResponse> {
        self.backend.chat(system_prompt, messages, tools).await
    }
}

/// Produces worker backends, optionally for a model the coordinator picked.
pub trait BackendFactory: Send + Sync {
    /// Backend for `model`, or the default model when `None`.
    fn create(&self, model: Option<&str>) -> Arc<dyn LlmBackend>;
}

impl<F> BackendFactory for F
where
    F: Fn(Option<&str>) -> Arc<dyn LlmBackend> + Send + Sync,
{
    fn create(&self, model: Option<&str>) -> Arc<dyn LlmBackend> {
        self(model)
    }
}

/// Factory that builds an [`LlmClient`] from a base config, swapping the
/// model id when one is requested.
pub struct ConfigBackendFactory {
    base: ModelConfig,
}

impl ConfigBackendFactory {
    /// Creates the factory.
    pub fn new(base: ModelConfig) -> Self {
        Self { base }
    }
}

impl BackendFactory for ConfigBackendFactory {
    fn create(&self, model: Option<&str>) -> Arc<dyn LlmBackend> {
        let config = match model {
            Some(model) if !model.is_empty() => self.base.with_model(model),
            _ => self.base.clone(),
        };
        Arc::new(LlmClient::new(config))
    }
}
