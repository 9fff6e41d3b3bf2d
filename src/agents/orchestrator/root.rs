//! Research orchestrator - drives a session turn by turn until it concludes.
//!
//! # Responsibilities
//! 1. Own the session and the usage ledger
//! 2. Run turns until answered, out of budget, out of turns, or cancelled
//! 3. Produce a best-effort answer when research stops early

use chrono::Utc;

use super::steps::{Halt, TurnRunner};
use crate::agents::{
    ResearchContext, ResearchError, ResearchOutcome, ResearchSession, ResearchState,
    TerminalReason, TurnOutcome,
};
use crate::budget::{UsageLedger, UsageReport};
use crate::protocol::fallback_summary;

/// Drives research sessions against injected collaborators.
///
/// # Turn Flow
/// ```text
/// 1. Propose sub-questions and search queries (fast model)
/// 2. If searching: query web and papers concurrently, append findings
/// 3. Summarize findings into a single context entry (fast model)
/// 4. Check whether the sub-questions are answered (fast model)
/// 5. If so: try to answer the main question (smart model)
/// ```
///
/// # Invariants
/// - No billed call starts once the budget is exceeded or a cancel is seen
/// - Only successful calls are recorded in the ledger
pub struct ResearchOrchestrator {
    ctx: ResearchContext,
    ledger: UsageLedger,
    session: Option<ResearchSession>,
}

impl ResearchOrchestrator {
    /// Validate the configuration against the price table and set up the ledger.
    pub fn new(ctx: ResearchContext) -> Result<Self, ResearchError> {
        ctx.config.validate(&ctx.pricing)?;
        let mut ledger = UsageLedger::new(ctx.pricing.clone(), ctx.config.debug);
        ledger.set_budget(ctx.config.budget)?;
        Ok(Self {
            ctx,
            ledger,
            session: None,
        })
    }

    pub fn context(&self) -> &ResearchContext {
        &self.ctx
    }

    pub fn session(&self) -> Option<&ResearchSession> {
        self.session.as_ref()
    }

    pub fn ledger(&self) -> &UsageLedger {
        &self.ledger
    }

    pub fn usage(&self) -> UsageReport {
        self.ledger.report()
    }

    /// Change the budget ceiling in dollars; `0.0` means unbounded.
    pub fn set_budget(&mut self, amount: f64) -> Result<(), ResearchError> {
        self.ledger.set_budget(amount)?;
        Ok(())
    }

    /// Restart the current question from scratch: session progress and the
    /// ledger, including its budget, go back to zero.
    pub fn reset(&mut self) {
        if let Some(session) = self.session.as_mut() {
            session.reset();
            tracing::info!(session_id = %session.id(), "Research session reset");
        }
        self.ledger.reset();
    }

    /// Start a new session. Usage from a previous session is cleared but the
    /// budget ceiling is kept.
    pub fn define_question(
        &mut self,
        question: impl Into<String>,
        context: Vec<String>,
    ) -> Result<&ResearchSession, ResearchError> {
        let session = ResearchSession::new(question, context)?;
        if self.session.is_some() {
            let budget = self.ledger.total_budget();
            self.ledger.reset();
            self.ledger.set_budget(budget)?;
        }
        tracing::info!(
            session_id = %session.id(),
            question = %session.question(),
            seeded_context = session.context().len(),
            "Research question defined"
        );
        Ok(self.session.insert(session))
    }

    /// Research `question` to completion.
    pub async fn run(
        &mut self,
        question: impl Into<String>,
        context: Vec<String>,
    ) -> Result<ResearchOutcome, ResearchError> {
        self.define_question(question, context)?;
        self.run_to_completion().await
    }

    /// Run turns on the defined session until it concludes.
    pub async fn run_to_completion(&mut self) -> Result<ResearchOutcome, ResearchError> {
        let max_turns = self.ctx.config.max_turns;
        self.ensure_open()?;

        let reason = loop {
            let session = self.session.as_ref().ok_or(ResearchError::EmptyQuestion)?;
            if self.ctx.is_cancelled() {
                break TerminalReason::Cancelled;
            }
            if self.ledger.budget_exceeded() {
                break TerminalReason::BudgetExhausted;
            }
            if session.turn() >= max_turns {
                tracing::warn!(max_turns, "Turn limit reached");
                break TerminalReason::TurnLimit;
            }

            match self.run_turn().await {
                Ok(TurnOutcome::Continue) => continue,
                Ok(TurnOutcome::Answered) => break TerminalReason::Answered,
                Ok(TurnOutcome::Stopped(reason)) => break reason,
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    tracing::error!(error = %e, "Research turn failed, concluding session");
                    break TerminalReason::Aborted {
                        error: e.to_string(),
                    };
                }
            }
        };

        self.conclude(reason).await
    }

    /// Run exactly one turn of the defined session.
    pub async fn run_turn(&mut self) -> Result<TurnOutcome, ResearchError> {
        self.ensure_open()?;
        let session = self.session.as_mut().ok_or(ResearchError::EmptyQuestion)?;
        if session.main_question_answered() {
            return Ok(TurnOutcome::Answered);
        }

        let mut runner = TurnRunner {
            ctx: &self.ctx,
            ledger: &mut self.ledger,
            session,
        };
        match runner.run().await {
            Ok(outcome) => Ok(outcome),
            Err(Halt::Stop(reason)) => {
                tracing::info!(reason = ?reason, "Turn stopped early");
                Ok(TurnOutcome::Stopped(reason))
            }
            Err(Halt::Error(e)) => Err(e),
        }
    }

    /// A session must be defined and not yet concluded.
    fn ensure_open(&self) -> Result<(), ResearchError> {
        match &self.session {
            None => Err(ResearchError::EmptyQuestion),
            Some(session) if session.state() == ResearchState::Concluded => {
                Err(ResearchError::SessionConcluded)
            }
            Some(_) => Ok(()),
        }
    }

    async fn conclude(&mut self, reason: TerminalReason) -> Result<ResearchOutcome, ResearchError> {
        let session = self.session.as_mut().ok_or(ResearchError::EmptyQuestion)?;

        let answered = match reason {
            TerminalReason::Answered => session.answer().map(str::to_string),
            _ => None,
        };
        let answer = match answered {
            Some(answer) => answer,
            None => {
                let mut runner = TurnRunner {
                    ctx: &self.ctx,
                    ledger: &mut self.ledger,
                    session: &mut *session,
                };
                match runner.final_summary().await {
                    Ok(Some(summary)) => summary,
                    Ok(None) | Err(Halt::Stop(_)) => fallback_summary(session),
                    Err(Halt::Error(e)) if e.is_fatal() => return Err(e),
                    Err(Halt::Error(e)) => {
                        tracing::warn!(error = %e, "Final summary failed, using local summary");
                        fallback_summary(session)
                    }
                }
            }
        };

        session.advance(ResearchState::Concluded);
        let usage = self.ledger.report();
        tracing::info!(
            session_id = %session.id(),
            reason = ?reason,
            turns = session.turn(),
            %usage,
            "Research session concluded"
        );

        Ok(ResearchOutcome {
            session_id: session.id(),
            question: session.question().to_string(),
            answered: session.main_question_answered(),
            answer,
            reason,
            turns: session.turn(),
            sub_questions: session.sub_questions().to_vec(),
            context: session.context().to_vec(),
            usage,
            started_at: session.started_at(),
            finished_at: Utc::now(),
        })
    }
}
