//! Error types and retry policy for LLM calls.

use std::fmt;
use std::time::Duration;

use rand::Rng;
use thiserror::Error;

/// Broad category of a failed LLM call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmErrorKind {
    /// Provider throttled the request (HTTP 429).
    RateLimited,
    /// Connection, DNS, or timeout failure.
    Transport,
    /// Provider-side failure (5xx).
    Server,
    /// Credential rejected (401/403).
    Auth,
    /// Request rejected (other 4xx).
    Client,
    /// 2xx response that could not be understood.
    InvalidResponse,
}

impl LlmErrorKind {
    pub fn is_retryable(self) -> bool {
        matches!(self, Self::RateLimited | Self::Transport | Self::Server)
    }
}

impl fmt::Display for LlmErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::RateLimited => "rate limited",
            Self::Transport => "transport error",
            Self::Server => "server error",
            Self::Auth => "authentication error",
            Self::Client => "request rejected",
            Self::InvalidResponse => "invalid response",
        };
        f.write_str(name)
    }
}

/// A failed completion or embedding request.
#[derive(Debug, Clone, Error)]
#[error("{kind}: {message}")]
pub struct LlmError {
    pub kind: LlmErrorKind,
    pub message: String,
    pub status: Option<u16>,
    /// Server-provided `retry-after` hint.
    pub retry_after: Option<Duration>,
}

impl LlmError {
    pub fn new(kind: LlmErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            status: None,
            retry_after: None,
        }
    }

    pub fn from_status(status: u16, body: impl Into<String>) -> Self {
        Self {
            kind: classify_http_status(status),
            message: format!("HTTP {}: {}", status, body.into()),
            status: Some(status),
            retry_after: None,
        }
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self::new(LlmErrorKind::Transport, message)
    }

    pub fn invalid_response(message: impl Into<String>) -> Self {
        Self::new(LlmErrorKind::InvalidResponse, message)
    }

    pub fn with_retry_after(mut self, retry_after: Option<Duration>) -> Self {
        self.retry_after = retry_after;
        self
    }

    pub fn is_rate_limit(&self) -> bool {
        self.kind == LlmErrorKind::RateLimited
    }

    pub fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }
}

/// Map an HTTP status code onto an error kind.
pub fn classify_http_status(status: u16) -> LlmErrorKind {
    match status {
        429 => LlmErrorKind::RateLimited,
        401 | 403 => LlmErrorKind::Auth,
        408 => LlmErrorKind::Transport,
        500..=599 => LlmErrorKind::Server,
        400..=499 => LlmErrorKind::Client,
        _ => LlmErrorKind::InvalidResponse,
    }
}

/// Exponential backoff for retryable errors.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Add up to 25% random jitter to each delay.
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(32),
            jitter: true,
        }
    }
}

impl RetryConfig {
    /// No retries at all.
    pub fn disabled() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Delay before retry number `attempt` (0-based).
    ///
    /// A server `retry-after` hint wins when it is longer than the backoff.
    pub fn delay_for(&self, attempt: u32, retry_after: Option<Duration>) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        let mut delay = self.base_delay.saturating_mul(factor).min(self.max_delay);
        if self.jitter && !delay.is_zero() {
            let extra = rand::thread_rng().gen_range(0..=delay.as_millis() as u64 / 4);
            delay += Duration::from_millis(extra);
        }
        match retry_after {
            Some(hint) if hint > delay => hint,
            _ => delay,
        }
    }
}
