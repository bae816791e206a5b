//! Language-model provider selection
//!
//! Model names are resolved to a [`LlmProvider`] once, at configuration time.
//! Everything downstream matches on the provider variant instead of re-parsing
//! the name.

use std::fmt;

use serde::{Deserialize, Serialize, Serializer};

use crate::errors::AgentError;

pub const DEEPSEEK_BASE_URL: &str = "https://api.deepseek.com/v1";

/// Supported model vendors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LlmProvider {
    Gemini,
    OpenAi,
    Anthropic,
    DeepSeek,
}

impl LlmProvider {
    /// Resolve a model name: `gemini*` and `gpt*` by prefix, otherwise names
    /// containing `claude` or `deepseek` (case-insensitive).
    pub fn from_model(model: &str) -> Result<Self, AgentError> {
        let lowered = model.trim().to_ascii_lowercase();
        if lowered.starts_with("gemini") {
            Ok(LlmProvider::Gemini)
        } else if lowered.starts_with("gpt") {
            Ok(LlmProvider::OpenAi)
        } else if lowered.contains("claude") {
            Ok(LlmProvider::Anthropic)
        } else if lowered.contains("deepseek") {
            Ok(LlmProvider::DeepSeek)
        } else {
            Err(AgentError::UnsupportedModel(model.to_string()))
        }
    }

    /// Environment variable consulted when no key is supplied
    pub fn api_key_env(self) -> &'static str {
        match self {
            LlmProvider::Gemini => "GEMINI_API_KEY",
            LlmProvider::OpenAi => "OPENAI_API_KEY",
            LlmProvider::Anthropic => "ANTHROPIC_API_KEY",
            LlmProvider::DeepSeek => "DEEPSEEK_API_KEY",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            LlmProvider::Gemini => "gemini",
            LlmProvider::OpenAi => "openai",
            LlmProvider::Anthropic => "anthropic",
            LlmProvider::DeepSeek => "deepseek",
        }
    }
}

impl fmt::Display for LlmProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Credential that never shows up in logs or serialized output
#[derive(Clone, PartialEq, Eq, Deserialize)]
#[serde(transparent)]
pub struct ApiKey(String);

impl ApiKey {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ApiKey(***)")
    }
}

impl Serialize for ApiKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str("***")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeminiConfig {
    pub model: String,
    pub api_key: ApiKey,
    pub temperature: f32,
    pub top_p: f32,
    pub top_k: u32,
    pub max_output_tokens: u32,
    pub convert_system_message_to_human: bool,
}

impl GeminiConfig {
    pub fn new(model: impl Into<String>, api_key: ApiKey) -> Self {
        Self {
            model: model.into(),
            api_key,
            temperature: 0.7,
            top_p: 1.0,
            top_k: 32,
            max_output_tokens: 2048,
            convert_system_message_to_human: true,
        }
    }
}

/// OpenAI-compatible endpoint; DeepSeek reuses it with its own base URL
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenAiConfig {
    pub model: String,
    pub api_key: ApiKey,
    pub temperature: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
}

impl OpenAiConfig {
    pub fn new(model: impl Into<String>, api_key: ApiKey) -> Self {
        Self {
            model: model.into(),
            api_key,
            temperature: 0.7,
            base_url: None,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnthropicConfig {
    pub model: String,
    pub api_key: ApiKey,
    pub temperature: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

impl AnthropicConfig {
    pub fn new(model: impl Into<String>, api_key: ApiKey) -> Self {
        Self {
            model: model.into(),
            api_key,
            temperature: 0.7,
            max_tokens: None,
        }
    }
}

/// Fully resolved model client configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "provider", rename_all = "lowercase")]
pub enum LlmConfig {
    Gemini(GeminiConfig),
    OpenAi(OpenAiConfig),
    Anthropic(AnthropicConfig),
    DeepSeek(OpenAiConfig),
}

impl LlmConfig {
    pub fn provider(&self) -> LlmProvider {
        match self {
            LlmConfig::Gemini(_) => LlmProvider::Gemini,
            LlmConfig::OpenAi(_) => LlmProvider::OpenAi,
            LlmConfig::Anthropic(_) => LlmProvider::Anthropic,
            LlmConfig::DeepSeek(_) => LlmProvider::DeepSeek,
        }
    }

    pub fn model(&self) -> &str {
        match self {
            LlmConfig::Gemini(cfg) => &cfg.model,
            LlmConfig::OpenAi(cfg) | LlmConfig::DeepSeek(cfg) => &cfg.model,
            LlmConfig::Anthropic(cfg) => &cfg.model,
        }
    }

    pub fn api_key(&self) -> &ApiKey {
        match self {
            LlmConfig::Gemini(cfg) => &cfg.api_key,
            LlmConfig::OpenAi(cfg) | LlmConfig::DeepSeek(cfg) => &cfg.api_key,
            LlmConfig::Anthropic(cfg) => &cfg.api_key,
        }
    }
}

/// Build the provider-specific configuration for `model`.
pub fn create_llm_config(model: &str, api_key: ApiKey) -> Result<LlmConfig, AgentError> {
    let config = match LlmProvider::from_model(model)? {
        LlmProvider::Gemini => LlmConfig::Gemini(GeminiConfig::new(model, api_key)),
        LlmProvider::OpenAi => LlmConfig::OpenAi(OpenAiConfig::new(model, api_key)),
        LlmProvider::Anthropic => LlmConfig::Anthropic(AnthropicConfig::new(model, api_key)),
        LlmProvider::DeepSeek => LlmConfig::DeepSeek(
            OpenAiConfig::new(model, api_key).with_base_url(DEEPSEEK_BASE_URL),
        ),
    };
    Ok(config)
}

/// Pick the explicit key when present, otherwise the provider's environment variable.
pub fn resolve_api_key(model: &str, explicit: Option<&str>) -> Result<ApiKey, AgentError> {
    resolve_api_key_with(model, explicit, |name| std::env::var(name).ok())
}

pub fn resolve_api_key_with<F>(
    model: &str,
    explicit: Option<&str>,
    lookup: F,
) -> Result<ApiKey, AgentError>
where
    F: Fn(&str) -> Option<String>,
{
    let provider = LlmProvider::from_model(model)?;
    explicit
        .map(str::to_string)
        .or_else(|| lookup(provider.api_key_env()))
        .filter(|key| !key.trim().is_empty())
        .map(ApiKey)
        .ok_or_else(|| AgentError::MissingApiKey(model.to_string()))
}

/// Resolve provider, credential and configuration in one go.
pub fn resolve_llm_config(model: &str, explicit: Option<&str>) -> Result<LlmConfig, AgentError> {
    let key = resolve_api_key(model, explicit)?;
    create_llm_config(model, key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_selection_by_name() {
        assert_eq!(LlmProvider::from_model("gemini-2.0-flash").unwrap(), LlmProvider::Gemini);
        assert_eq!(LlmProvider::from_model("gpt-4o").unwrap(), LlmProvider::OpenAi);
        assert_eq!(
            LlmProvider::from_model("Claude 3.5 Sonnet").unwrap(),
            LlmProvider::Anthropic
        );
        assert_eq!(LlmProvider::from_model("DeepSeek").unwrap(), LlmProvider::DeepSeek);
        assert_eq!(
            LlmProvider::from_model("llama-3"),
            Err(AgentError::UnsupportedModel("llama-3".into()))
        );
    }

    #[test]
    fn deepseek_uses_openai_compatible_endpoint() {
        let config = create_llm_config("deepseek-chat", ApiKey::new("sk-test")).unwrap();
        match config {
            LlmConfig::DeepSeek(cfg) => {
                assert_eq!(cfg.base_url.as_deref(), Some(DEEPSEEK_BASE_URL))
            }
            other => panic!("unexpected config: {:?}", other),
        }
    }

    #[test]
    fn gemini_defaults() {
        let config = create_llm_config("gemini-pro", ApiKey::new("k")).unwrap();
        let LlmConfig::Gemini(cfg) = config else {
            panic!("expected gemini config");
        };
        assert_eq!(cfg.top_k, 32);
        assert_eq!(cfg.max_output_tokens, 2048);
        assert!(cfg.convert_system_message_to_human);
    }

    #[test]
    fn api_key_resolution_order() {
        let env = |name: &str| (name == "OPENAI_API_KEY").then(|| "from-env".to_string());

        let explicit = resolve_api_key_with("gpt-4o", Some("explicit"), env).unwrap();
        assert_eq!(explicit.expose(), "explicit");

        let fallback = resolve_api_key_with("gpt-4o", None, env).unwrap();
        assert_eq!(fallback.expose(), "from-env");

        let missing = resolve_api_key_with("claude-3", None, env);
        assert_eq!(missing, Err(AgentError::MissingApiKey("claude-3".into())));
    }

    #[test]
    fn api_key_is_redacted() {
        let config = create_llm_config("gpt-4o", ApiKey::new("sk-secret")).unwrap();
        assert!(!format!("{:?}", config).contains("sk-secret"));
        let json = serde_json::to_string(&config).unwrap();
        assert!(!json.contains("sk-secret"));
        assert!(json.contains("\"provider\":\"openai\""));
    }
}
