use serde::{Deserialize, Serialize};

/// Supported inference providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LlmProvider {
    /// Anthropic messages API.
    Claude,
    /// OpenAI chat completions.
    OpenAi,
    /// OpenRouter (OpenAI-compatible).
    OpenRouter,
    /// Groq cloud inference (OpenAI-compatible).
    Groq,
}

impl LlmProvider {
    /// Environment variable consulted when no API key is configured.
    pub fn api_key_env(&self) -> &'static str {
        match self {
            LlmProvider::Claude => "ANTHROPIC_API_KEY",
            LlmProvider::OpenAi => "OPENAI_API_KEY",
            LlmProvider::OpenRouter => "OPENROUTER_API_KEY",
            LlmProvider::Groq => "GROQ_API_KEY",
        }
    }
}

/// Connection and sampling settings for one model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Provider to talk to.
    pub provider: LlmProvider,
    /// Provider-specific model identifier.
    pub model_id: String,
    /// API key. Empty means "read from the provider's environment variable".
    #[serde(default)]
    pub api_key: String,
    /// Override for the provider's base URL.
    #[serde(default)]
    pub api_base_url: Option<String>,
    /// Sampling temperature.
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    /// Maximum tokens per response.
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    /// Models tried in order when this one keeps failing.
    #[serde(default)]
    pub fallback_models: Vec<ModelConfig>,
}

fn default_temperature() -> f32 {
    0.7
}

fn default_max_tokens() -> u32 {
    4096
}

impl ModelConfig {
    /// Creates a config with default sampling settings.
    pub fn new(provider: LlmProvider, model_id: impl Into<String>) -> Self {
        Self {
            provider,
            model_id: model_id.into(),
            api_key: String::new(),
            api_base_url: None,
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            fallback_models: Vec::new(),
        }
    }

    /// Base URL of the provider API.
    pub fn base_url(&self) -> &str {
        if let Some(url) = &self.api_base_url {
            url
        } else {
            match self.provider {
                LlmProvider::Claude => "https://api.anthropic.com",
                LlmProvider::OpenAi => "https://api.openai.com",
                LlmProvider::OpenRouter => "https://openrouter.ai/api",
                LlmProvider::Groq => "https://api.groq.com/openai",
            }
        }
    }

    /// Fills an empty `api_key` (here and in fallbacks) from the environment.
    pub fn resolve_api_key(mut self) -> Self {
        if self.api_key.is_empty() {
            if let Ok(key) = std::env::var(self.provider.api_key_env()) {
                self.api_key = key;
            }
        }
        self.fallback_models = self
            .fallback_models
            .into_iter()
            .map(ModelConfig::resolve_api_key)
            .collect();
        self
    }

    /// Same settings with another model identifier.
    pub fn with_model(&self, model_id: impl Into<String>) -> Self {
        let mut config = self.clone();
        config.model_id = model_id.into();
        config
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_serialization() {
        assert_eq!(serde_json::to_string(&LlmProvider::OpenAi).unwrap(), "\"openai\"");
        let parsed: LlmProvider = serde_json::from_str("\"openrouter\"").unwrap();
        assert_eq!(parsed, LlmProvider::OpenRouter);
    }

    #[test]
    fn test_defaults_from_toml() {
        let config: ModelConfig =
            toml::from_str("provider = \"claude\"\nmodel_id = \"claude-sonnet-4-5\"\n").unwrap();
        assert_eq!(config.max_tokens, 4096);
        assert!((config.temperature - 0.7).abs() < f32::EPSILON);
        assert!(config.api_key.is_empty());
        assert_eq!(config.base_url(), "https://api.anthropic.com");
    }

    #[test]
    fn test_base_url_override() {
        let mut config = ModelConfig::new(LlmProvider::Groq, "llama");
        assert_eq!(config.base_url(), "https://api.groq.com/openai");
        config.api_base_url = Some("http://localhost:9999".into());
        assert_eq!(config.base_url(), "http://localhost:9999");
    }

    #[test]
    fn test_with_model_keeps_provider() {
        let base = ModelConfig::new(LlmProvider::Claude, "a");
        let other = base.with_model("b");
        assert_eq!(other.model_id, "b");
        assert_eq!(other.provider, LlmProvider::Claude);
    }

    #[test]
    fn test_explicit_key_not_overwritten() {
        let mut config = ModelConfig::new(LlmProvider::OpenAi, "gpt");
        config.api_key = "sk-explicit".into();
        assert_eq!(config.resolve_api_key().api_key, "sk-explicit");
    }
}
