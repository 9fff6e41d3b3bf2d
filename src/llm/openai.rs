//! OpenAI-compatible HTTP client.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{
    ChatMessage, ChatOptions, ChatResponse, EmbeddingResponse, LlmClient, LlmError, RetryConfig,
    TokenUsage,
};

/// Default OpenAI API base URL.
pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// Client for `/chat/completions` and `/embeddings` on an OpenAI-compatible API.
pub struct OpenAiClient {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    retry: RetryConfig,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f64,
    max_tokens: u32,
}

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Debug, Deserialize)]
struct WireUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

#[derive(Debug, Deserialize)]
struct WireChatResponse {
    model: Option<String>,
    choices: Vec<WireChoice>,
    usage: Option<WireUsage>,
}

#[derive(Debug, Deserialize)]
struct WireChoice {
    message: WireMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireEmbeddingResponse {
    data: Vec<WireEmbedding>,
    usage: Option<WireUsage>,
}

#[derive(Debug, Deserialize)]
struct WireEmbedding {
    #[serde(default)]
    index: usize,
    embedding: Vec<f32>,
}

impl OpenAiClient {
    pub fn new(api_key: impl Into<String>, base_url: impl Into<String>) -> Result<Self, LlmError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| LlmError::transport(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            api_key: api_key.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            retry: RetryConfig::default(),
        })
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// POST `body` to `path`, retrying transient failures.
    async fn post_json<B: Serialize + ?Sized>(&self, path: &str, body: &B) -> Result<Value, LlmError> {
        let url = format!("{}/{}", self.base_url, path);
        let url = url.as_str();
        with_retries(&self.retry, || self.post_once(url, body)).await
    }

    async fn post_once<B: Serialize + ?Sized>(&self, url: &str, body: &B) -> Result<Value, LlmError> {
        let response = self
            .client
            .post(url)
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
            .await
            .map_err(|e| LlmError::transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = parse_retry_after(response.headers());
            let text = response.text().await.unwrap_or_default();
            return Err(LlmError::from_status(status.as_u16(), text).with_retry_after(retry_after));
        }

        response
            .json::<Value>()
            .await
            .map_err(|e| LlmError::invalid_response(format!("Response was not JSON: {}", e)))
    }
}

/// Run `op` until it succeeds, fails with a non-retryable error, or the
/// retries in `retry` are used up.
async fn with_retries<T, F, Fut>(retry: &RetryConfig, mut op: F) -> Result<T, LlmError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, LlmError>>,
{
    let mut attempt = 0u32;

    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_retryable() && attempt < retry.max_retries => {
                let wait = retry.delay_for(attempt, e.retry_after);
                tracing::warn!(
                    attempt = attempt + 1,
                    max_retries = retry.max_retries,
                    wait_ms = wait.as_millis() as u64,
                    error = %e,
                    "Retrying LLM request after transient error"
                );
                tokio::time::sleep(wait).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

fn parse_chat_response(value: Value) -> Result<ChatResponse, LlmError> {
    let wire: WireChatResponse = serde_json::from_value(value)
        .map_err(|e| LlmError::invalid_response(format!("Unexpected completion shape: {}", e)))?;
    let usage = wire
        .usage
        .ok_or_else(|| LlmError::invalid_response("Completion response carried no usage"))?;
    let choice = wire
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| LlmError::invalid_response("Completion response had no choices"))?;

    Ok(ChatResponse {
        content: choice.message.content.unwrap_or_default(),
        usage: TokenUsage::new(usage.prompt_tokens, usage.completion_tokens),
        finish_reason: choice.finish_reason,
        model: wire.model,
    })
}

fn parse_embedding_response(value: Value) -> Result<EmbeddingResponse, LlmError> {
    let mut wire: WireEmbeddingResponse = serde_json::from_value(value)
        .map_err(|e| LlmError::invalid_response(format!("Unexpected embedding shape: {}", e)))?;
    let usage = wire
        .usage
        .ok_or_else(|| LlmError::invalid_response("Embedding response carried no usage"))?;
    wire.data.sort_by_key(|d| d.index);

    Ok(EmbeddingResponse {
        embeddings: wire.data.into_iter().map(|d| d.embedding).collect(),
        usage: TokenUsage::new(usage.prompt_tokens, 0),
    })
}

#[async_trait]
impl LlmClient for OpenAiClient {
    async fn chat_completion(
        &self,
        model: &str,
        messages: &[ChatMessage],
        options: ChatOptions,
    ) -> Result<ChatResponse, LlmError> {
        let request = ChatRequest {
            model,
            messages,
            temperature: options.temperature,
            max_tokens: options.max_tokens,
        };
        tracing::debug!(model, messages = messages.len(), "Sending chat completion");

        let response = parse_chat_response(self.post_json("chat/completions", &request).await?)?;

        tracing::debug!(
            model,
            prompt_tokens = response.usage.prompt_tokens,
            completion_tokens = response.usage.completion_tokens,
            finish_reason = ?response.finish_reason,
            "Chat completion received"
        );
        Ok(response)
    }

    async fn embed(&self, model: &str, texts: &[String]) -> Result<EmbeddingResponse, LlmError> {
        let request = EmbeddingRequest { model, input: texts };
        tracing::debug!(model, inputs = texts.len(), "Requesting embeddings");

        parse_embedding_response(self.post_json("embeddings", &request).await?)
    }
}
