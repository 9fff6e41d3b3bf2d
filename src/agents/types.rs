//! Outcome and error types for research sessions.

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use crate::budget::{BudgetError, UsageReport};
use crate::config::ConfigError;
use crate::llm::LlmError;
use crate::protocol::MalformedActionError;

/// Errors surfaced by the orchestrator.
#[derive(Debug, Error)]
pub enum ResearchError {
    #[error("A non-empty research question is required")]
    EmptyQuestion,

    #[error("The research session has already concluded")]
    SessionConcluded,

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Ledger error: {0}")]
    Budget(#[from] BudgetError),

    #[error("Completion request failed: {0}")]
    Completion(#[from] LlmError),

    #[error(transparent)]
    MalformedAction(#[from] MalformedActionError),
}

impl ResearchError {
    /// Fatal errors abort without an outcome; the rest end the session early.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::EmptyQuestion | Self::SessionConcluded | Self::Config(_) | Self::Budget(_)
        )
    }
}

/// Why a session stopped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum TerminalReason {
    /// The main question was answered
    Answered,
    /// Total cost went over the budget
    BudgetExhausted,
    /// The configured number of turns ran out
    TurnLimit,
    /// An external cancel signal was observed
    Cancelled,
    /// A turn failed after its retries or repairs were used up
    Aborted { error: String },
}

impl TerminalReason {
    pub fn is_forced(&self) -> bool {
        !matches!(self, Self::Answered)
    }
}

/// Result of a single turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnOutcome {
    /// Turn completed; the main question is still open
    Continue,
    /// Turn completed and the main question was answered
    Answered,
    /// Turn stopped before completing
    Stopped(TerminalReason),
}

/// Final report of a research session.
#[derive(Debug, Clone, Serialize)]
pub struct ResearchOutcome {
    pub session_id: Uuid,
    pub question: String,
    /// The answer, or a best-effort summary when research was cut short.
    pub answer: String,
    pub answered: bool,
    pub reason: TerminalReason,
    /// Completed turns
    pub turns: u32,
    pub sub_questions: Vec<String>,
    pub context: Vec<String>,
    pub usage: UsageReport,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}
