/// Anthropic messages API backend.
pub mod claude;
/// OpenAI-compatible chat completions backend.
pub mod openai;

use crate::llm::LlmResponse;
use async_trait::async_trait;
use conductor_core::{ConductorResult, Message};
use conductor_skills::SkillDescriptor;

/// Trait for LLM provider backends.
///
/// Each provider implements this trait to handle API communication. The
/// engine only ever sees [`LlmResponse`]; wire formats stay inside the
/// backend.
///
/// To add a new provider:
/// 1. Create a new module in `backends/`
/// 2. Implement `LlmBackend` for your struct
/// 3. Add the variant to `LlmProvider` in `config.rs`
/// 4. Wire it up in `LlmClient::new()` in `llm.rs`
#[async_trait]
pub trait LlmBackend: Send + Sync {
    /// Chat completion over the full conversation.
    async fn chat(
        &self,
        system_prompt: Option<&str>,
        messages: &[Message],
        tools: &[SkillDescriptor],
    ) -> ConductorResult<LlmResponse>;
}
