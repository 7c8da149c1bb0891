//! LLM API Providers
//!
//! OpenAI-compatible chat-completion clients (hosted OpenAI, or a local
//! server such as vLLM / Ollama in OpenAI mode).

use super::*;
use crate::config::ConfigError;
use reqwest::Client;
use std::time::Duration;

pub const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_OPENAI_MODEL: &str = "gpt-4o-mini";

// ============================================================================
// Configuration
// ============================================================================

#[derive(Debug, Clone)]
pub struct LLMConfig {
    pub provider: Provider,
    pub api_key: String,
    pub model: String,
    pub base_url: Option<String>,
    /// Per-request HTTP timeout; the validation loop applies its own on top.
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    OpenAI,
    Local,
}

impl LLMConfig {
    /// Load from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        if let Ok(key) = std::env::var("OPENAI_API_KEY") {
            if !key.trim().is_empty() {
                return Ok(Self {
                    provider: Provider::OpenAI,
                    api_key: key.trim().to_string(),
                    model: std::env::var("OPENAI_MODEL")
                        .unwrap_or_else(|_| DEFAULT_OPENAI_MODEL.to_string()),
                    base_url: std::env::var("OPENAI_BASE_URL").ok(),
                    timeout_secs: 60,
                });
            }
        }

        if let Ok(url) = std::env::var("LOCAL_LLM_URL") {
            return Ok(Self {
                provider: Provider::Local,
                api_key: String::new(),
                model: std::env::var("LOCAL_LLM_MODEL").unwrap_or_else(|_| "default".to_string()),
                base_url: Some(url),
                timeout_secs: 120,
            });
        }

        Err(ConfigError::NoProviderConfigured)
    }

    pub fn openai(api_key: &str, model: &str) -> Self {
        Self {
            provider: Provider::OpenAI,
            api_key: api_key.to_string(),
            model: model.to_string(),
            base_url: None,
            timeout_secs: 60,
        }
    }

    pub fn local(url: &str, model: &str) -> Self {
        Self {
            provider: Provider::Local,
            api_key: String::new(),
            model: model.to_string(),
            base_url: Some(url.to_string()),
            timeout_secs: 120,
        }
    }

    fn chat_url(&self) -> Result<String, LLMError> {
        match self.provider {
            Provider::OpenAI => Ok(format!(
                "{}/chat/completions",
                self.base_url
                    .as_deref()
                    .unwrap_or(DEFAULT_OPENAI_BASE_URL)
                    .trim_end_matches('/')
            )),
            Provider::Local => {
                let base = self
                    .base_url
                    .as_deref()
                    .ok_or_else(|| LLMError::Api("No base URL configured".to_string()))?;
                Ok(format!("{}/v1/chat/completions", base.trim_end_matches('/')))
            }
        }
    }
}

fn build_client(timeout_secs: u64) -> Result<Client, ConfigError> {
    Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| ConfigError::Invalid(format!("failed to create HTTP client: {e}")))
}

// ============================================================================
// Request / response mapping
// ============================================================================

fn chat_body(model: &str, request: &CompletionRequest) -> serde_json::Value {
    let messages: Vec<serde_json::Value> = request
        .messages
        .iter()
        .map(|m| {
            serde_json::json!({
                "role": m.role.as_str(),
                "content": m.content
            })
        })
        .collect();

    let mut body = serde_json::json!({
        "model": model,
        "messages": messages,
    });

    if let Some(max_tokens) = request.max_tokens {
        body["max_tokens"] = serde_json::json!(max_tokens);
    }
    if let Some(temp) = request.temperature {
        body["temperature"] = serde_json::json!(temp);
    }
    if request.json_mode {
        body["response_format"] = serde_json::json!({"type": "json_object"});
    }
    body
}

fn parse_chat_response(
    data: &serde_json::Value,
    model: &str,
) -> Result<CompletionResponse, LLMError> {
    let content = data["choices"][0]["message"]["content"]
        .as_str()
        .ok_or_else(|| LLMError::InvalidResponse("missing choices[0].message.content".to_string()))?
        .to_string();

    let finish_reason = match data["choices"][0]["finish_reason"].as_str() {
        Some("length") => FinishReason::Length,
        Some("content_filter") => FinishReason::ContentFilter,
        _ => FinishReason::Stop,
    };

    Ok(CompletionResponse {
        content,
        finish_reason,
        usage: Usage {
            prompt_tokens: data["usage"]["prompt_tokens"].as_u64().unwrap_or(0) as usize,
            completion_tokens: data["usage"]["completion_tokens"].as_u64().unwrap_or(0) as usize,
        },
        model: model.to_string(),
    })
}

async fn post_chat(
    client: &Client,
    config: &LLMConfig,
    request: &CompletionRequest,
) -> Result<CompletionResponse, LLMError> {
    let url = config.chat_url()?;
    let body = chat_body(&config.model, request);

    let mut builder = client.post(&url).json(&body);
    if !config.api_key.is_empty() {
        builder = builder.bearer_auth(&config.api_key);
    }

    let response = builder
        .send()
        .await
        .map_err(|e| LLMError::Network(e.to_string()))?;

    if response.status() == 429 {
        let retry_after = response
            .headers()
            .get("retry-after")
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(60);
        return Err(LLMError::RateLimited {
            retry_after_ms: retry_after * 1000,
        });
    }

    if !response.status().is_success() {
        let status = response.status();
        let error_text = response.text().await.unwrap_or_default();
        return Err(LLMError::Api(format!("{status}: {error_text}")));
    }

    let data: serde_json::Value = response
        .json()
        .await
        .map_err(|e| LLMError::InvalidResponse(e.to_string()))?;

    parse_chat_response(&data, &config.model)
}

// ============================================================================
// OpenAI Provider
// ============================================================================

pub struct OpenAIClient {
    client: Client,
    config: LLMConfig,
}

impl OpenAIClient {
    pub fn new(config: LLMConfig) -> Result<Self, ConfigError> {
        let client = build_client(config.timeout_secs)?;
        Ok(Self { client, config })
    }
}

#[async_trait]
impl LLMProvider for OpenAIClient {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LLMError> {
        post_chat(&self.client, &self.config, &request).await
    }

    fn model_info(&self) -> ModelInfo {
        ModelInfo {
            name: self.config.model.clone(),
            supports_json_mode: true,
        }
    }
}

// ============================================================================
// Local Provider (Ollama, vLLM, etc.)
// ============================================================================

pub struct LocalClient {
    client: Client,
    config: LLMConfig,
}

impl LocalClient {
    pub fn new(config: LLMConfig) -> Result<Self, ConfigError> {
        let client = build_client(config.timeout_secs)?;
        Ok(Self { client, config })
    }
}

#[async_trait]
impl LLMProvider for LocalClient {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LLMError> {
        post_chat(&self.client, &self.config, &request).await
    }

    fn model_info(&self) -> ModelInfo {
        ModelInfo {
            name: self.config.model.clone(),
            // Not every local server honours response_format.
            supports_json_mode: false,
        }
    }
}

// ============================================================================
// Unified Client
// ============================================================================

/// Dispatches to the configured provider
pub enum UnifiedClient {
    OpenAI(OpenAIClient),
    Local(LocalClient),
}

impl UnifiedClient {
    pub fn from_config(config: LLMConfig) -> Result<Self, ConfigError> {
        Ok(match config.provider {
            Provider::OpenAI => Self::OpenAI(OpenAIClient::new(config)?),
            Provider::Local => Self::Local(LocalClient::new(config)?),
        })
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_config(LLMConfig::from_env()?)
    }
}

#[async_trait]
impl LLMProvider for UnifiedClient {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LLMError> {
        match self {
            Self::OpenAI(c) => c.complete(request).await,
            Self::Local(c) => c.complete(request).await,
        }
    }

    fn model_info(&self) -> ModelInfo {
        match self {
            Self::OpenAI(c) => c.model_info(),
            Self::Local(c) => c.model_info(),
        }
    }
}
