//! The steps of a single research turn.
//!
//! Every billed call goes through [`TurnRunner::complete`] or the embedding
//! path in [`TurnRunner::rank`], both of which check the budget and the
//! cancel signal first and record usage only for successful calls.

use crate::agents::{ResearchContext, ResearchError, ResearchSession, ResearchState, TerminalReason, TurnOutcome};
use crate::budget::{BudgetError, UsageLedger};
use crate::llm::{ChatMessage, ChatResponse, LlmError};
use crate::protocol::{
    build_final_summary_prompt, build_main_question_prompt, build_repair_prompt,
    build_sub_question_prompt, build_summary_prompt, build_turn_prompt, parse_lenient,
    ActionProposal, MainAnswerVerdict, MalformedActionError, StructuredReply, SubQuestionVerdict,
};
use crate::retrieval::ranking::rank_by_similarity;

/// Why a turn stopped before completing.
pub(crate) enum Halt {
    /// Orderly stop at a billing boundary
    Stop(TerminalReason),
    Error(ResearchError),
}

impl From<ResearchError> for Halt {
    fn from(err: ResearchError) -> Self {
        Halt::Error(err)
    }
}

impl From<LlmError> for Halt {
    fn from(err: LlmError) -> Self {
        Halt::Error(err.into())
    }
}

impl From<BudgetError> for Halt {
    fn from(err: BudgetError) -> Self {
        Halt::Error(err.into())
    }
}

impl From<MalformedActionError> for Halt {
    fn from(err: MalformedActionError) -> Self {
        Halt::Error(err.into())
    }
}

pub(crate) type StepResult<T> = Result<T, Halt>;

/// Borrowed view of the orchestrator for the duration of one turn.
pub(crate) struct TurnRunner<'a> {
    pub ctx: &'a ResearchContext,
    pub ledger: &'a mut UsageLedger,
    pub session: &'a mut ResearchSession,
}

impl<'a> TurnRunner<'a> {
    /// Run one full turn.
    pub async fn run(&mut self) -> StepResult<TurnOutcome> {
        let turn = self.session.current_turn();
        tracing::info!(session_id = %self.session.id(), turn, "Starting research turn");

        let proposal = self.propose().await?;
        self.session.set_sub_questions(proposal.sub_questions.clone());

        self.retrieve(&proposal).await?;
        self.summarize().await?;
        self.answer_sub_questions().await?;

        let answered = if self.session.sub_questions_answered() {
            self.answer_main_question().await?
        } else {
            tracing::info!(turn, "Sub-questions still open, main question deferred");
            false
        };

        self.session.complete_turn();
        tracing::info!(
            turn,
            answered,
            total_cost = self.ledger.total_cost(),
            "Research turn complete"
        );

        Ok(if answered {
            TurnOutcome::Answered
        } else {
            TurnOutcome::Continue
        })
    }

    /// Stop before a billed call if cancelled or over budget.
    pub fn ensure_can_bill(&self) -> StepResult<()> {
        if self.ctx.is_cancelled() {
            return Err(Halt::Stop(TerminalReason::Cancelled));
        }
        if self.ledger.budget_exceeded() {
            tracing::warn!(
                total_cost = self.ledger.total_cost(),
                budget = self.ledger.total_budget(),
                "Budget exhausted, stopping before next call"
            );
            return Err(Halt::Stop(TerminalReason::BudgetExhausted));
        }
        Ok(())
    }

    /// One billed chat completion.
    pub async fn complete(&mut self, model: &str, messages: &[ChatMessage]) -> StepResult<ChatResponse> {
        self.ensure_can_bill()?;

        let response = self
            .ctx
            .llm
            .chat_completion(model, messages, self.ctx.config.chat_options())
            .await?;

        let delta = self.ledger.record_usage(
            model,
            response.usage.prompt_tokens,
            response.usage.completion_tokens,
        )?;
        tracing::debug!(
            model,
            prompt_tokens = response.usage.prompt_tokens,
            completion_tokens = response.usage.completion_tokens,
            cost = delta,
            "Completion billed"
        );
        if response.is_truncated() {
            tracing::warn!(model, "Completion truncated at max_tokens");
        }
        Ok(response)
    }

    /// Billed call whose reply must decode as `T`, with bounded repair.
    async fn complete_structured<T: StructuredReply>(&mut self, model: &str, prompt: String) -> StepResult<T> {
        let mut messages = vec![ChatMessage::system(prompt)];
        let response = self.complete(model, &messages).await?;

        let mut err = match parse_lenient::<T>(&response.content) {
            Ok(value) => return Ok(value),
            Err(e) => e,
        };
        let mut raw = response.content;

        for attempt in 1..=self.ctx.config.max_repair_attempts {
            tracing::warn!(
                expected = T::NAME,
                attempt,
                error = %err,
                "Malformed reply, requesting repair"
            );
            messages.push(ChatMessage::assistant(raw));
            messages.push(ChatMessage::user(build_repair_prompt(T::SCHEMA, &err.reason)));

            let response = self.complete(model, &messages).await?;
            match parse_lenient::<T>(&response.content) {
                Ok(value) => return Ok(value),
                Err(e) => {
                    err = e;
                    raw = response.content;
                }
            }
        }

        Err(err.into())
    }

    async fn propose(&mut self) -> StepResult<ActionProposal> {
        self.session.advance(ResearchState::ProposingActions);
        let prompt = build_turn_prompt(self.session);
        let model = self.ctx.config.fast_model.clone();
        let proposal: ActionProposal = self.complete_structured(&model, prompt).await?;
        tracing::info!(
            sub_questions = proposal.sub_questions.len(),
            internet_search = proposal.internet_search,
            internet_query = %proposal.internet_query,
            academic_query = %proposal.academic_query,
            "Actions proposed"
        );
        Ok(proposal)
    }

    /// Query both sources concurrently and append their findings, web first.
    ///
    /// Searches are not billed, so a pending stop is only observed at the
    /// ranking call, after the findings are kept.
    async fn retrieve(&mut self, proposal: &ActionProposal) -> StepResult<()> {
        self.session.advance(ResearchState::AwaitingRetrieval);
        if !proposal.internet_search {
            tracing::debug!("No search requested this turn");
            return Ok(());
        }
        let ctx = self.ctx;
        let limit = ctx.config.max_results_per_source;
        let web_query = proposal.internet_query.trim();
        let paper_query = proposal.academic_query.trim();

        let web = async {
            if web_query.is_empty() {
                return Vec::new();
            }
            match ctx.web.search_web(web_query).await {
                Ok(results) => results,
                Err(e) => {
                    tracing::warn!(query = web_query, "Web search failed: {:#}", e);
                    Vec::new()
                }
            }
        };
        let papers = async {
            if paper_query.is_empty() {
                return Vec::new();
            }
            match ctx.papers.search_papers(paper_query).await {
                Ok(results) => results,
                Err(e) => {
                    tracing::warn!(query = paper_query, "Paper search failed: {:#}", e);
                    Vec::new()
                }
            }
        };
        let (web, papers) = tokio::join!(web, papers);

        let mut lines: Vec<String> = web.iter().take(limit).map(|r| r.to_context_line()).collect();
        lines.extend(papers.iter().take(limit).map(|r| r.to_context_line()));
        tracing::info!(
            web_results = web.len().min(limit),
            paper_results = papers.len().min(limit),
            "Retrieval complete"
        );

        if ctx.config.rank_snippets && lines.len() > ctx.config.rank_keep {
            match self.rank(&lines).await {
                Ok(ranked) => lines = ranked,
                Err(Halt::Stop(reason)) => {
                    lines.truncate(ctx.config.rank_keep);
                    self.session.append_context(lines);
                    return Err(Halt::Stop(reason));
                }
                Err(e) => return Err(e),
            }
        }
        self.session.append_context(lines);
        Ok(())
    }

    /// Keep the snippets closest to the question by embedding similarity.
    ///
    /// A stop before the embedding call leaves `lines` to the caller.
    async fn rank(&mut self, lines: &[String]) -> StepResult<Vec<String>> {
        self.ensure_can_bill()?;

        let keep = self.ctx.config.rank_keep;
        let model = self.ctx.config.embedding_model.clone();
        let mut texts = Vec::with_capacity(lines.len() + 1);
        texts.push(self.session.question().to_string());
        texts.extend(lines.iter().cloned());

        let response = match self.ctx.llm.embed(&model, &texts).await {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!(error = %e, "Snippet ranking failed, keeping retrieval order");
                return Ok(lines.iter().take(keep).cloned().collect());
            }
        };
        self.ledger.record_usage(&model, response.usage.prompt_tokens, 0)?;

        let Some((query, candidates)) = response.embeddings.split_first() else {
            return Ok(lines.iter().take(keep).cloned().collect());
        };
        if candidates.len() != lines.len() {
            tracing::warn!(
                expected = lines.len(),
                got = candidates.len(),
                "Embedding count mismatch, keeping retrieval order"
            );
            return Ok(lines.iter().take(keep).cloned().collect());
        }

        let order = rank_by_similarity(query, candidates, keep);
        Ok(order.into_iter().map(|i| lines[i].clone()).collect())
    }

    /// Condense the findings into one summary entry.
    async fn summarize(&mut self) -> StepResult<()> {
        self.session.advance(ResearchState::Summarizing);
        if self.session.context().is_empty() {
            tracing::debug!("Nothing to summarize");
            return Ok(());
        }

        let model = self.ctx.config.fast_model.clone();
        let messages = [ChatMessage::system(build_summary_prompt(self.session))];
        let response = self.complete(&model, &messages).await?;
        let summary = response.content.trim();
        if summary.is_empty() {
            tracing::warn!("Empty summary, keeping raw findings");
        } else {
            self.session.replace_context(summary.to_string());
        }
        Ok(())
    }

    async fn answer_sub_questions(&mut self) -> StepResult<()> {
        self.session.advance(ResearchState::AnsweringSubQuestions);
        if self.session.sub_questions().is_empty() {
            self.session.set_sub_questions_answered(true);
            return Ok(());
        }

        let prompt = build_sub_question_prompt(self.session);
        let model = self.ctx.config.fast_model.clone();
        let verdict: SubQuestionVerdict = self.complete_structured(&model, prompt).await?;

        tracing::info!(
            all_answered = verdict.all_answered,
            answers = verdict.answers.len(),
            "Sub-questions checked"
        );
        self.session.set_sub_answers(verdict.answers);
        self.session.set_sub_questions_answered(verdict.all_answered);
        Ok(())
    }

    /// Returns whether the main question is now answered.
    async fn answer_main_question(&mut self) -> StepResult<bool> {
        self.session.advance(ResearchState::AnsweringMainQuestion);

        let prompt = build_main_question_prompt(self.session);
        let model = self.ctx.config.smart_model.clone();
        let verdict: MainAnswerVerdict = self.complete_structured(&model, prompt).await?;

        let answer = verdict.answer.trim();
        if verdict.answerable && !answer.is_empty() {
            self.session.mark_answered(answer.to_string());
            tracing::info!("Main question answered");
            return Ok(true);
        }
        if verdict.answerable {
            tracing::warn!("Model marked the question answerable but gave no answer");
        }
        Ok(false)
    }

    /// Best available answer after a forced stop; `None` if the call was not possible.
    pub async fn final_summary(&mut self) -> StepResult<Option<String>> {
        let model = self.ctx.config.fast_model.clone();
        let messages = [ChatMessage::system(build_final_summary_prompt(self.session))];
        let response = self.complete(&model, &messages).await?;
        let text = response.content.trim();
        Ok((!text.is_empty()).then(|| text.to_string()))
    }
}
