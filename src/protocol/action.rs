//! Typed replies expected from the model.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Longest slice of the raw reply kept in an error.
const EXCERPT_CHARS: usize = 200;

/// The model's reply could not be decoded into the expected shape.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Malformed {expected} reply: {reason}")]
pub struct MalformedActionError {
    pub expected: &'static str,
    pub reason: String,
    pub raw_excerpt: String,
}

impl MalformedActionError {
    pub fn new(expected: &'static str, reason: impl Into<String>, raw: &str) -> Self {
        Self {
            expected,
            reason: reason.into(),
            raw_excerpt: raw.chars().take(EXCERPT_CHARS).collect(),
        }
    }
}

/// A JSON reply shape the model is asked to produce.
pub trait StructuredReply: DeserializeOwned {
    /// Short name used in errors and logs.
    const NAME: &'static str;
    /// Schema text shown to the model.
    const SCHEMA: &'static str;
}

/// Phase-one plan for a turn: sub-questions and search intents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionProposal {
    pub sub_questions: Vec<String>,
    pub internet_search: bool,
    pub internet_query: String,
    pub academic_query: String,
}

impl StructuredReply for ActionProposal {
    const NAME: &'static str = "action proposal";
    const SCHEMA: &'static str = r#"{"sub_questions": [list of strings], "internet_search": boolean, "internet_query": string, "academic_query": string}"#;
}

/// Whether the findings answer every sub-question.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubQuestionVerdict {
    /// One answer per sub-question, in order.
    pub answers: Vec<String>,
    pub all_answered: bool,
}

impl StructuredReply for SubQuestionVerdict {
    const NAME: &'static str = "sub-question verdict";
    const SCHEMA: &'static str = r#"{"answers": [list of strings, one per sub-question], "all_answered": boolean}"#;
}

/// Whether the main question can now be answered, and the answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MainAnswerVerdict {
    pub answerable: bool,
    pub answer: String,
}

impl StructuredReply for MainAnswerVerdict {
    const NAME: &'static str = "main answer verdict";
    const SCHEMA: &'static str = r#"{"answerable": boolean, "answer": string}"#;
}

/// Strictly decode `raw` as `T`. All fields are required; unknown keys are ignored.
pub fn parse_reply<T: StructuredReply>(raw: &str) -> Result<T, MalformedActionError> {
    serde_json::from_str(raw.trim()).map_err(|e| MalformedActionError::new(T::NAME, e.to_string(), raw))
}

/// Strictly decode a phase-one [`ActionProposal`].
pub fn parse_action(raw: &str) -> Result<ActionProposal, MalformedActionError> {
    parse_reply(raw)
}
