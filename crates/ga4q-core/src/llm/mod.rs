//! Chat-completion plumbing for the repair oracle.
//!
//! The LLM is untrusted: it produces *candidate* text, and callers parse and
//! re-validate whatever comes back.

#[cfg(feature = "http")]
pub mod providers;

use async_trait::async_trait;

// ============================================================================
// LLM Provider Interface
// ============================================================================

/// Trait for chat-completion backends
#[async_trait]
pub trait LLMProvider: Send + Sync {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LLMError>;

    fn model_info(&self) -> ModelInfo;
}

#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub messages: Vec<Message>,
    pub max_tokens: Option<usize>,
    pub temperature: Option<f32>,
    /// Ask the backend for a JSON object response.
    pub json_mode: bool,
}

impl CompletionRequest {
    /// Single user message, deterministic sampling, JSON output.
    pub fn json_prompt(prompt: String) -> Self {
        Self {
            messages: vec![Message {
                role: Role::User,
                content: prompt,
            }],
            max_tokens: Some(1024),
            temperature: Some(0.0),
            json_mode: true,
        }
    }

    /// Prepend a system message.
    pub fn with_system(mut self, content: &str) -> Self {
        self.messages.insert(
            0,
            Message {
                role: Role::System,
                content: content.to_string(),
            },
        );
        self
    }
}

#[derive(Debug, Clone)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    System,
    User,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
        }
    }
}

#[derive(Debug, Clone)]
pub struct CompletionResponse {
    pub content: String,
    pub finish_reason: FinishReason,
    pub usage: Usage,
    pub model: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinishReason {
    Stop,
    Length,
    ContentFilter,
}

#[derive(Debug, Clone, Default)]
pub struct Usage {
    pub prompt_tokens: usize,
    pub completion_tokens: usize,
}

#[derive(Debug, Clone)]
pub struct ModelInfo {
    pub name: String,
    pub supports_json_mode: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum LLMError {
    #[error("API error: {0}")]
    Api(String),
    #[error("Rate limited, retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
    #[error("Network error: {0}")]
    Network(String),
}

impl LLMError {
    /// True when the backend answered but the answer is unusable, as opposed
    /// to the backend being unreachable or refusing the call.
    pub fn is_bad_output(&self) -> bool {
        matches!(self, LLMError::InvalidResponse(_))
    }
}
