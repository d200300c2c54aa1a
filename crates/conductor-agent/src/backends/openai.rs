use super::LlmBackend;
use crate::config::{LlmProvider, ModelConfig};
use crate::llm::LlmResponse;
use async_trait::async_trait;
use conductor_core::{ConductorError, ConductorResult, Message, Role, ToolCall};
use conductor_skills::SkillDescriptor;
use tracing::{debug, warn};

/// OpenAI-compatible API backend.
///
/// Works with OpenAI, OpenRouter, Groq, Ollama, and any other provider
/// that implements the OpenAI chat completions API.
pub struct OpenAiBackend {
    config: ModelConfig,
    http: reqwest::Client,
}

impl OpenAiBackend {
    /// Creates the backend.
    pub fn new(config: ModelConfig) -> Self {
        Self {
            config,
            http: reqwest::Client::new(),
        }
    }

    fn build_tools(&self, tools: &[SkillDescriptor]) -> Vec<serde_json::Value> {
        tools
            .iter()
            .map(|t| {
                serde_json::json!({
                    "type": "function",
                    "function": {
                        "name": t.name,
                        "description": t.description,
                        "parameters": t.parameters_schema,
                    }
                })
            })
            .collect()
    }

    fn add_provider_headers(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        let request = request
            .header("Authorization", format!("Bearer {}", self.config.api_key))
            .header("Content-Type", "application/json");

        // OpenRouter wants an application title
        if matches!(self.config.provider, LlmProvider::OpenRouter) {
            request.header("X-Title", "Conductor")
        } else {
            request
        }
    }
}

/// Renders conversation turns as chat-completions messages.
pub fn build_openai_messages(
    system_prompt: Option<&str>,
    messages: &[Message],
) -> Vec<serde_json::Value> {
    let mut api_messages: Vec<serde_json::Value> = Vec::new();

    if let Some(sys) = system_prompt {
        api_messages.push(serde_json::json!({
            "role": "system",
            "content": sys
        }));
    }

    for m in messages {
        let rendered = match m.role {
            Role::System => serde_json::json!({"role": "system", "content": m.content}),
            Role::User => serde_json::json!({"role": "user", "content": m.content}),
            Role::Assistant if m.tool_calls.is_empty() => {
                serde_json::json!({"role": "assistant", "content": m.content})
            }
            Role::Assistant => {
                let calls: Vec<serde_json::Value> = m
                    .tool_calls
                    .iter()
                    .map(|call| {
                        serde_json::json!({
                            "id": call.id,
                            "type": "function",
                            "function": {
                                "name": call.name,
                                "arguments": call.arguments.to_string(),
                            }
                        })
                    })
                    .collect();
                let content = if m.content.is_empty() {
                    serde_json::Value::Null
                } else {
                    serde_json::json!(m.content)
                };
                serde_json::json!({"role": "assistant", "content": content, "tool_calls": calls})
            }
            Role::Tool => serde_json::json!({
                "role": "tool",
                "tool_call_id": m.tool_call_id.clone().unwrap_or_default(),
                "content": m.content,
            }),
        };
        api_messages.push(rendered);
    }

    api_messages
}

#[async_trait]
impl LlmBackend for OpenAiBackend {
    async fn chat(
        &self,
        system_prompt: Option<&str>,
        messages: &[Message],
        tools: &[SkillDescriptor],
    ) -> ConductorResult<LlmResponse> {
        let url = format!("{}/v1/chat/completions", self.config.base_url());
        let api_messages = build_openai_messages(system_prompt, messages);

        let mut body = serde_json::json!({
            "model": self.config.model_id,
            "max_tokens": self.config.max_tokens,
            "temperature": self.config.temperature,
            "messages": api_messages,
        });

        if !tools.is_empty() {
            body["tools"] = serde_json::json!(self.build_tools(tools));
        }

        debug!(model = %self.config.model_id, turns = messages.len(), "OpenAI request");

        let request = self.add_provider_headers(self.http.post(&url));

        let resp = request
            .json(&body)
            .send()
            .await
            .map_err(|e| ConductorError::Http(e.to_string()))?;

        let status = resp.status();
        let resp_body: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| ConductorError::Http(e.to_string()))?;

        if !status.is_success() {
            return Err(ConductorError::Http(format!(
                "OpenAI API error {status}: {resp_body}"
            )));
        }

        parse_openai_response(&resp_body)
    }
}

/// Parses a non-streaming chat completions response.
pub fn parse_openai_response(body: &serde_json::Value) -> ConductorResult<LlmResponse> {
    let choice = &body["choices"][0];
    if choice.is_null() {
        return Err(ConductorError::Agent(
            "Missing choices in OpenAI response".into(),
        ));
    }
    let message = &choice["message"];
    let content = message["content"].as_str().unwrap_or_default().to_string();

    if let Some(tool_calls_json) = message["tool_calls"].as_array() {
        let tool_calls: Vec<ToolCall> = tool_calls_json
            .iter()
            .filter_map(|tc| {
                let id = tc["id"].as_str()?.to_string();
                let name = tc["function"]["name"].as_str()?.to_string();
                let raw = tc["function"]["arguments"].as_str().unwrap_or("{}");
                let arguments = match serde_json::from_str::<serde_json::Value>(raw) {
                    Ok(v) => v,
                    Err(e) => {
                        warn!(tool = %name, error = %e, "Unparseable tool arguments");
                        serde_json::Value::String(raw.to_string())
                    }
                };
                Some(ToolCall {
                    id,
                    name,
                    arguments,
                })
            })
            .collect();

        if !tool_calls.is_empty() {
            return Ok(LlmResponse::ToolUse {
                content: if content.is_empty() {
                    None
                } else {
                    Some(content)
                },
                tool_calls,
            });
        }
    }

    let finish_reason = choice["finish_reason"].as_str().unwrap_or("stop");
    if finish_reason == "stop" {
        Ok(LlmResponse::Done(content))
    } else {
        Ok(LlmResponse::Text(content))
    }
}
