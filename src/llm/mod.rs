//! LLM client module for interacting with language models.
//!
//! This module provides a trait-based abstraction over completion providers,
//! with an OpenAI-compatible HTTP client as the primary implementation.
//! Every successful call reports its token usage so the caller can charge it
//! to a [`UsageLedger`](crate::budget::UsageLedger).

mod error;
mod openai;

pub use error::{classify_http_status, LlmError, LlmErrorKind, RetryConfig};
pub use openai::{OpenAiClient, DEFAULT_BASE_URL};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Role in a chat conversation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// A message in a chat conversation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }
}

/// Token usage reported by the provider for one call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

impl TokenUsage {
    /// Create a usage object ensuring `total_tokens` is consistent.
    pub fn new(prompt_tokens: u64, completion_tokens: u64) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens.saturating_add(completion_tokens),
        }
    }
}

/// Response from a chat completion.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatResponse {
    pub content: String,
    pub usage: TokenUsage,
    pub finish_reason: Option<String>,
    pub model: Option<String>,
}

impl ChatResponse {
    /// True when the provider stopped because it hit `max_tokens`.
    pub fn is_truncated(&self) -> bool {
        self.finish_reason.as_deref() == Some("length")
    }
}

/// Response from an embedding request.
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddingResponse {
    /// One vector per input text, in input order.
    pub embeddings: Vec<Vec<f32>>,
    pub usage: TokenUsage,
}

impl EmbeddingResponse {
    /// The first embedding.
    pub fn vector(&self) -> Option<&[f32]> {
        self.embeddings.first().map(Vec::as_slice)
    }
}

/// Parameters for chat completions.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChatOptions {
    /// Sampling temperature (0 = deterministic).
    pub temperature: f64,
    /// Maximum output tokens to generate.
    pub max_tokens: u32,
}

impl Default for ChatOptions {
    fn default() -> Self {
        Self {
            temperature: 0.0,
            max_tokens: 500,
        }
    }
}

/// Trait for completion providers.
///
/// # Contract
/// - `Ok` responses always carry usage, including truncated completions
/// - failed calls are never billed by the caller
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Send a chat completion request.
    async fn chat_completion(
        &self,
        model: &str,
        messages: &[ChatMessage],
        options: ChatOptions,
    ) -> Result<ChatResponse, LlmError>;

    /// Embed each text with the given model.
    async fn embed(&self, model: &str, texts: &[String]) -> Result<EmbeddingResponse, LlmError>;
}
