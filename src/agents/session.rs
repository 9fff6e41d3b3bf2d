//! Research session state.

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use super::ResearchError;

/// Where the orchestrator is within a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResearchState {
    AwaitingQuestion,
    ProposingActions,
    AwaitingRetrieval,
    Summarizing,
    AnsweringSubQuestions,
    AnsweringMainQuestion,
    Concluded,
}

impl ResearchState {
    /// Legal moves of the turn state machine. Any live state may conclude or
    /// start a new turn; a stopped turn is restarted from the proposal.
    pub fn can_transition_to(self, next: ResearchState) -> bool {
        use ResearchState::*;
        match (self, next) {
            (Concluded, _) => false,
            (_, Concluded) | (_, ProposingActions) => true,
            (ProposingActions, AwaitingRetrieval)
            | (AwaitingRetrieval, Summarizing)
            | (Summarizing, AnsweringSubQuestions)
            | (AnsweringSubQuestions, AnsweringMainQuestion) => true,
            _ => false,
        }
    }
}

/// State of one research session, owned by the orchestrator.
///
/// # Invariants
/// - `question` is never empty
/// - `turn` only grows, by exactly one per completed turn
/// - `main_question_answered` is only set while answering the main question
/// - `context` is in discovery order
#[derive(Debug, Clone)]
pub struct ResearchSession {
    id: Uuid,
    question: String,
    sub_questions: Vec<String>,
    sub_answers: Vec<String>,
    context: Vec<String>,
    turn: u32,
    sub_questions_answered: bool,
    main_question_answered: bool,
    answer: Option<String>,
    state: ResearchState,
    started_at: DateTime<Utc>,
}

impl ResearchSession {
    /// Start a session for `question` seeded with caller-provided context.
    pub fn new(question: impl Into<String>, context: Vec<String>) -> Result<Self, ResearchError> {
        let question = question.into().trim().to_string();
        if question.is_empty() {
            return Err(ResearchError::EmptyQuestion);
        }
        Ok(Self {
            id: Uuid::new_v4(),
            question,
            sub_questions: Vec::new(),
            sub_answers: Vec::new(),
            context: context
                .into_iter()
                .map(|c| c.trim().to_string())
                .filter(|c| !c.is_empty())
                .collect(),
            turn: 0,
            sub_questions_answered: false,
            main_question_answered: false,
            answer: None,
            state: ResearchState::AwaitingQuestion,
            started_at: Utc::now(),
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn question(&self) -> &str {
        &self.question
    }

    pub fn sub_questions(&self) -> &[String] {
        &self.sub_questions
    }

    pub fn sub_answers(&self) -> &[String] {
        &self.sub_answers
    }

    pub fn context(&self) -> &[String] {
        &self.context
    }

    /// Completed turns.
    pub fn turn(&self) -> u32 {
        self.turn
    }

    /// 1-based number of the turn in progress.
    pub fn current_turn(&self) -> u32 {
        self.turn + 1
    }

    pub fn sub_questions_answered(&self) -> bool {
        self.sub_questions_answered
    }

    pub fn main_question_answered(&self) -> bool {
        self.main_question_answered
    }

    pub fn answer(&self) -> Option<&str> {
        self.answer.as_deref()
    }

    pub fn state(&self) -> ResearchState {
        self.state
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Clear progress, keeping the question and its context.
    pub fn reset(&mut self) {
        self.sub_questions.clear();
        self.sub_answers.clear();
        self.turn = 0;
        self.sub_questions_answered = false;
        self.main_question_answered = false;
        self.answer = None;
        self.state = ResearchState::AwaitingQuestion;
    }

    pub(crate) fn advance(&mut self, next: ResearchState) {
        debug_assert!(
            self.state.can_transition_to(next),
            "illegal transition {:?} -> {:?}",
            self.state,
            next
        );
        tracing::debug!(turn = self.current_turn(), from = ?self.state, to = ?next, "State transition");
        self.state = next;
    }

    pub(crate) fn set_sub_questions(&mut self, sub_questions: Vec<String>) {
        self.sub_questions = sub_questions;
        self.sub_answers.clear();
        self.sub_questions_answered = false;
    }

    pub(crate) fn set_sub_answers(&mut self, answers: Vec<String>) {
        self.sub_answers = answers;
    }

    pub(crate) fn set_sub_questions_answered(&mut self, answered: bool) {
        self.sub_questions_answered = answered;
    }

    pub(crate) fn append_context(&mut self, entries: impl IntoIterator<Item = String>) {
        self.context.extend(entries);
    }

    /// Replace every finding with a single summary.
    pub(crate) fn replace_context(&mut self, summary: String) {
        self.context = vec![summary];
    }

    pub(crate) fn mark_answered(&mut self, answer: String) {
        debug_assert_eq!(self.state, ResearchState::AnsweringMainQuestion);
        self.main_question_answered = true;
        self.answer = Some(answer);
    }

    pub(crate) fn complete_turn(&mut self) {
        self.turn += 1;
    }
}
