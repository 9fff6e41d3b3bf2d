//! End-to-end research sessions against scripted collaborators.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use anyhow::anyhow;
use async_trait::async_trait;
use proptest::prelude::*;
use tokio_util::sync::CancellationToken;

use researcher::agents::{ResearchError, ResearchState, TerminalReason};
use researcher::budget::{ModelPricing, PricingInfo};
use researcher::llm::{
    ChatMessage, ChatOptions, ChatResponse, EmbeddingResponse, LlmClient, LlmError, Role,
    TokenUsage,
};
use researcher::retrieval::{PaperResult, PaperSearch, WebResult, WebSearch};
use researcher::{Config, ResearchContext, ResearchOrchestrator};

const QUESTION: &str =
    "What is the difference between low mass star formation, and high mass star formation?";

/// Every scripted call uses 1000 prompt tokens, so each costs $0.02.
const CALL_COST: f64 = 0.02;

#[derive(Debug, Clone)]
struct Call {
    model: String,
    messages: Vec<ChatMessage>,
}

/// Replays queued replies in order and records every request.
#[derive(Default)]
struct ScriptedLlm {
    replies: Mutex<VecDeque<Result<ChatResponse, LlmError>>>,
    repeat: Option<String>,
    embeddings: Mutex<Option<Vec<Vec<f32>>>>,
    calls: Mutex<Vec<Call>>,
    embed_calls: Mutex<usize>,
    cancel_after_first: Option<CancellationToken>,
}

impl ScriptedLlm {
    fn new(replies: Vec<Result<ChatResponse, LlmError>>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            ..Default::default()
        }
    }

    fn repeating(reply: &str) -> Self {
        Self {
            repeat: Some(reply.to_string()),
            ..Default::default()
        }
    }

    fn with_embeddings(self, embeddings: Vec<Vec<f32>>) -> Self {
        *self.embeddings.lock().unwrap() = Some(embeddings);
        self
    }

    fn cancelling(mut self, token: CancellationToken) -> Self {
        self.cancel_after_first = Some(token);
        self
    }

    fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    fn embed_calls(&self) -> usize {
        *self.embed_calls.lock().unwrap()
    }
}

fn reply(content: &str) -> Result<ChatResponse, LlmError> {
    Ok(ChatResponse {
        content: content.to_string(),
        usage: TokenUsage::new(1000, 0),
        finish_reason: Some("stop".to_string()),
        model: None,
    })
}

#[async_trait]
impl LlmClient for ScriptedLlm {
    async fn chat_completion(
        &self,
        model: &str,
        messages: &[ChatMessage],
        _options: ChatOptions,
    ) -> Result<ChatResponse, LlmError> {
        let count = {
            let mut calls = self.calls.lock().unwrap();
            calls.push(Call {
                model: model.to_string(),
                messages: messages.to_vec(),
            });
            calls.len()
        };
        if count == 1 {
            if let Some(token) = &self.cancel_after_first {
                token.cancel();
            }
        }

        let next = self.replies.lock().unwrap().pop_front();
        match (next, &self.repeat) {
            (Some(result), _) => result,
            (None, Some(content)) => reply(content),
            (None, None) => Err(LlmError::invalid_response("script exhausted")),
        }
    }

    async fn embed(&self, _model: &str, texts: &[String]) -> Result<EmbeddingResponse, LlmError> {
        *self.embed_calls.lock().unwrap() += 1;
        let embeddings = self
            .embeddings
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| LlmError::invalid_response("no embeddings scripted"))?;
        assert_eq!(embeddings.len(), texts.len());
        Ok(EmbeddingResponse {
            embeddings,
            usage: TokenUsage::new(1000, 0),
        })
    }
}

struct StaticWeb(anyhow::Result<Vec<WebResult>>);

#[async_trait]
impl WebSearch for StaticWeb {
    async fn search_web(&self, _query: &str) -> anyhow::Result<Vec<WebResult>> {
        match &self.0 {
            Ok(results) => Ok(results.clone()),
            Err(e) => Err(anyhow!("{}", e)),
        }
    }
}

struct StaticPapers(Vec<PaperResult>);

#[async_trait]
impl PaperSearch for StaticPapers {
    async fn search_papers(&self, _query: &str) -> anyhow::Result<Vec<PaperResult>> {
        Ok(self.0.clone())
    }
}

fn test_config() -> Config {
    let mut config = Config::new("test-key");
    config.fast_model = "fast".to_string();
    config.smart_model = "smart".to_string();
    config.embedding_model = "embed".to_string();
    config
}

fn test_pricing() -> Arc<ModelPricing> {
    Arc::new(ModelPricing::new([
        ("fast".to_string(), PricingInfo::new(CALL_COST, 0.0)),
        ("smart".to_string(), PricingInfo::new(CALL_COST, 0.0)),
        ("embed".to_string(), PricingInfo::new(CALL_COST, 0.0)),
    ]))
}

fn context_with(
    config: Config,
    llm: Arc<ScriptedLlm>,
    web: StaticWeb,
    papers: StaticPapers,
) -> ResearchContext {
    ResearchContext::new(config, llm, Arc::new(web), Arc::new(papers), test_pricing())
}

fn quiet_context(config: Config, llm: Arc<ScriptedLlm>) -> ResearchContext {
    context_with(config, llm, StaticWeb(Ok(Vec::new())), StaticPapers(Vec::new()))
}

fn star_papers() -> Vec<PaperResult> {
    vec![
        PaperResult {
            title: "Star formation in molecular clouds".to_string(),
            snippet: "Low mass stars form through core collapse.".to_string(),
            source_id: "p1".to_string(),
        },
        PaperResult {
            title: "Massive star formation".to_string(),
            snippet: "High mass stars form in dense clusters.".to_string(),
            source_id: "p2".to_string(),
        },
    ]
}

const PROPOSAL_NO_SEARCH: &str = r#"{"sub_questions": ["What is the mass cutoff for a low mass star?"], "internet_search": false, "internet_query": "", "academic_query": ""}"#;
const PROPOSAL_EMPTY: &str =
    r#"{"sub_questions": [], "internet_search": false, "internet_query": "", "academic_query": ""}"#;
const PROPOSAL_SEARCH: &str = r#"{"sub_questions": ["How do high mass stars form?"], "internet_search": true, "internet_query": "high mass star formation", "academic_query": "massive star formation"}"#;

#[tokio::test]
async fn test_answers_in_one_turn() {
    let llm = Arc::new(ScriptedLlm::new(vec![
        reply(PROPOSAL_NO_SEARCH),
        reply(r#"{"answers": ["About 0.5 solar masses"], "all_answered": true}"#),
        reply(r#"{"answerable": true, "answer": "Low mass stars form slowly; high mass stars form quickly in clusters."}"#),
    ]));
    let mut orchestrator = ResearchOrchestrator::new(quiet_context(test_config(), llm.clone())).unwrap();

    let outcome = orchestrator.run(QUESTION, Vec::new()).await.unwrap();

    assert!(outcome.answered);
    assert_eq!(outcome.reason, TerminalReason::Answered);
    assert_eq!(outcome.turns, 1);
    assert!(outcome.answer.contains("high mass stars form quickly"));
    assert_eq!(outcome.sub_questions, vec!["What is the mass cutoff for a low mass star?"]);

    let models: Vec<String> = llm.calls().into_iter().map(|c| c.model).collect();
    assert_eq!(models, vec!["fast", "fast", "smart"]);
    assert!((outcome.usage.total_cost - 3.0 * CALL_COST).abs() < 1e-9);
    assert_eq!(outcome.usage.prompt_tokens, 3000);
}

#[tokio::test]
async fn test_budget_stops_after_first_charge() {
    let llm = Arc::new(ScriptedLlm::new(vec![
        reply(PROPOSAL_NO_SEARCH),
        reply(r#"{"answers": ["x"], "all_answered": true}"#),
    ]));
    let mut config = test_config();
    config.budget = 0.01;
    let mut orchestrator = ResearchOrchestrator::new(quiet_context(config, llm.clone())).unwrap();

    let outcome = orchestrator.run(QUESTION, Vec::new()).await.unwrap();

    assert_eq!(outcome.reason, TerminalReason::BudgetExhausted);
    assert!(!outcome.answered);
    assert_eq!(outcome.turns, 0);
    assert_eq!(llm.calls().len(), 1);
    assert!((orchestrator.ledger().total_cost() - CALL_COST).abs() < 1e-9);
    assert!(!outcome.answer.is_empty());
    assert!(outcome.answer.contains(QUESTION));
}

#[tokio::test]
async fn test_web_failure_still_merges_papers() {
    let llm = Arc::new(ScriptedLlm::new(vec![
        reply(PROPOSAL_SEARCH),
        reply("High mass stars form in dense clusters; low mass stars form by core collapse."),
        reply(r#"{"answers": ["Not yet clear"], "all_answered": false}"#),
        reply("Partial findings on star formation."),
    ]));
    let mut config = test_config();
    config.max_turns = 1;
    let ctx = context_with(
        config,
        llm.clone(),
        StaticWeb(Err(anyhow!("quota exceeded"))),
        StaticPapers(star_papers()),
    );
    let mut orchestrator = ResearchOrchestrator::new(ctx).unwrap();

    let outcome = orchestrator.run(QUESTION, Vec::new()).await.unwrap();

    let calls = llm.calls();
    let summary_prompt = &calls[1].messages[0].content;
    assert!(summary_prompt.contains("[paper] Star formation in molecular clouds"));
    assert!(summary_prompt.contains("[paper] Massive star formation"));
    assert!(!summary_prompt.contains("[web]"));

    assert_eq!(outcome.reason, TerminalReason::TurnLimit);
    assert_eq!(outcome.turns, 1);
    assert_eq!(
        outcome.context,
        vec!["High mass stars form in dense clusters; low mass stars form by core collapse."]
    );
    assert_eq!(outcome.answer, "Partial findings on star formation.");
}

#[tokio::test]
async fn test_turn_limit_counts_completed_turns() {
    let llm = Arc::new(ScriptedLlm::new(vec![
        reply(PROPOSAL_EMPTY),
        reply(r#"{"answerable": false, "answer": ""}"#),
        reply(PROPOSAL_EMPTY),
        reply(r#"{"answerable": false, "answer": ""}"#),
        reply("Nothing conclusive."),
    ]));
    let mut config = test_config();
    config.max_turns = 2;
    let mut orchestrator = ResearchOrchestrator::new(quiet_context(config, llm.clone())).unwrap();

    let outcome = orchestrator.run(QUESTION, Vec::new()).await.unwrap();

    assert_eq!(outcome.reason, TerminalReason::TurnLimit);
    assert_eq!(outcome.turns, 2);
    assert_eq!(outcome.answer, "Nothing conclusive.");

    let calls = llm.calls();
    assert_eq!(calls.len(), 5);
    assert!(calls[0].messages[0].content.contains("You are currently in turn 1."));
    assert!(calls[2].messages[0].content.contains("You are currently in turn 2."));
}

#[tokio::test]
async fn test_cancelled_before_start_makes_no_calls() {
    let llm = Arc::new(ScriptedLlm::new(vec![reply(PROPOSAL_EMPTY)]));
    let token = CancellationToken::new();
    token.cancel();
    let ctx = quiet_context(test_config(), llm.clone()).with_cancel_token(token);
    let mut orchestrator = ResearchOrchestrator::new(ctx).unwrap();

    let outcome = orchestrator.run(QUESTION, Vec::new()).await.unwrap();

    assert_eq!(outcome.reason, TerminalReason::Cancelled);
    assert!(llm.calls().is_empty());
    assert_eq!(outcome.usage.total_cost, 0.0);
    assert!(outcome.answer.contains(QUESTION));
}

#[tokio::test]
async fn test_cancel_mid_turn_stops_at_next_call() {
    let token = CancellationToken::new();
    let llm = Arc::new(
        ScriptedLlm::new(vec![
            reply(PROPOSAL_NO_SEARCH),
            reply(r#"{"answers": ["x"], "all_answered": true}"#),
        ])
        .cancelling(token.clone()),
    );
    let ctx = quiet_context(test_config(), llm.clone()).with_cancel_token(token);
    let mut orchestrator = ResearchOrchestrator::new(ctx).unwrap();

    let outcome = orchestrator.run(QUESTION, vec!["seed finding".to_string()]).await.unwrap();

    assert_eq!(outcome.reason, TerminalReason::Cancelled);
    assert_eq!(llm.calls().len(), 1);
    assert_eq!(outcome.turns, 0);
    assert!((outcome.usage.total_cost - CALL_COST).abs() < 1e-9);
    assert!(outcome.answer.contains("seed finding"));
}

#[tokio::test]
async fn test_malformed_proposal_is_repaired() {
    let llm = Arc::new(ScriptedLlm::new(vec![
        reply("I think we should look up star formation first."),
        reply(PROPOSAL_EMPTY),
        reply(r#"{"answerable": true, "answer": "They differ in accretion rate."}"#),
    ]));
    let mut orchestrator = ResearchOrchestrator::new(quiet_context(test_config(), llm.clone())).unwrap();

    let outcome = orchestrator.run(QUESTION, Vec::new()).await.unwrap();

    assert!(outcome.answered);
    assert_eq!(outcome.answer, "They differ in accretion rate.");

    let calls = llm.calls();
    assert_eq!(calls.len(), 3);
    let roles: Vec<Role> = calls[1].messages.iter().map(|m| m.role).collect();
    assert_eq!(roles, vec![Role::System, Role::Assistant, Role::User]);
    assert_eq!(calls[1].messages[1].content, "I think we should look up star formation first.");
    assert!(calls[1].messages[2].content.contains("internet_search"));
    assert!((outcome.usage.total_cost - 3.0 * CALL_COST).abs() < 1e-9);
}

#[tokio::test]
async fn test_unrepairable_proposal_aborts_with_summary() {
    let llm = Arc::new(ScriptedLlm::new(vec![
        reply("no json here"),
        reply("still no json"),
        reply("Research could not proceed."),
    ]));
    let mut orchestrator = ResearchOrchestrator::new(quiet_context(test_config(), llm.clone())).unwrap();

    let outcome = orchestrator.run(QUESTION, Vec::new()).await.unwrap();

    match &outcome.reason {
        TerminalReason::Aborted { error } => assert!(error.contains("action proposal")),
        other => panic!("unexpected reason {:?}", other),
    }
    assert!(!outcome.answered);
    assert_eq!(outcome.answer, "Research could not proceed.");
    assert_eq!(llm.calls().len(), 3);
}

#[tokio::test]
async fn test_failed_completion_is_not_billed() {
    let llm = Arc::new(ScriptedLlm::new(vec![Err(LlmError::from_status(
        500,
        "upstream error",
    ))]));
    let mut orchestrator = ResearchOrchestrator::new(quiet_context(test_config(), llm.clone())).unwrap();

    let outcome = orchestrator.run(QUESTION, Vec::new()).await.unwrap();

    assert!(matches!(outcome.reason, TerminalReason::Aborted { .. }));
    assert_eq!(outcome.usage.total_cost, 0.0);
    // The final summary attempt also fails, so the local summary is used
    assert!(outcome.answer.contains(QUESTION));
}

#[tokio::test]
async fn test_ranking_keeps_closest_snippets() {
    let llm = Arc::new(
        ScriptedLlm::new(vec![
            reply(r#"{"sub_questions": [], "internet_search": true, "internet_query": "stars", "academic_query": ""}"#),
            reply("Summary"),
            reply(r#"{"answerable": true, "answer": "done"}"#),
        ])
        .with_embeddings(vec![vec![1.0, 0.0], vec![0.0, 1.0], vec![1.0, 0.1]]),
    );
    let mut config = test_config();
    config.rank_snippets = true;
    config.rank_keep = 1;
    let web = StaticWeb(Ok(vec![
        WebResult {
            title: "Cooking".to_string(),
            snippet: "Unrelated".to_string(),
            url: "https://example.com/a".to_string(),
        },
        WebResult {
            title: "Stars".to_string(),
            snippet: "Star formation overview".to_string(),
            url: "https://example.com/b".to_string(),
        },
    ]));
    let ctx = context_with(config, llm.clone(), web, StaticPapers(Vec::new()));
    let mut orchestrator = ResearchOrchestrator::new(ctx).unwrap();

    let outcome = orchestrator.run(QUESTION, Vec::new()).await.unwrap();

    assert!(outcome.answered);
    assert_eq!(llm.embed_calls(), 1);
    let summary_prompt = &llm.calls()[1].messages[0].content;
    assert!(summary_prompt.contains("[web] Stars"));
    assert!(!summary_prompt.contains("Cooking"));
    assert!((outcome.usage.total_cost - 4.0 * CALL_COST).abs() < 1e-9);
}

fn two_web_results() -> StaticWeb {
    StaticWeb(Ok(vec![
        WebResult {
            title: "Cooking".to_string(),
            snippet: "Unrelated".to_string(),
            url: "https://example.com/a".to_string(),
        },
        WebResult {
            title: "Stars".to_string(),
            snippet: "Star formation overview".to_string(),
            url: "https://example.com/b".to_string(),
        },
    ]))
}

const PROPOSAL_WEB_ONLY: &str =
    r#"{"sub_questions": [], "internet_search": true, "internet_query": "stars", "academic_query": ""}"#;

#[tokio::test]
async fn test_cancel_before_ranking_keeps_findings() {
    let token = CancellationToken::new();
    let llm = Arc::new(ScriptedLlm::new(vec![reply(PROPOSAL_WEB_ONLY)]).cancelling(token.clone()));
    let mut config = test_config();
    config.rank_snippets = true;
    config.rank_keep = 1;
    let ctx = context_with(config, llm.clone(), two_web_results(), StaticPapers(Vec::new()))
        .with_cancel_token(token);
    let mut orchestrator = ResearchOrchestrator::new(ctx).unwrap();

    let outcome = orchestrator.run(QUESTION, Vec::new()).await.unwrap();

    assert_eq!(outcome.reason, TerminalReason::Cancelled);
    assert_eq!(llm.embed_calls(), 0);
    assert_eq!(
        outcome.context,
        vec!["[web] Cooking: Unrelated (https://example.com/a)"]
    );
    assert!(outcome.answer.contains("[web] Cooking"));
    assert!(!outcome.answer.contains("No findings"));
}

#[tokio::test]
async fn test_budget_stop_before_ranking_keeps_findings() {
    let llm = Arc::new(ScriptedLlm::new(vec![reply(PROPOSAL_WEB_ONLY)]));
    let mut config = test_config();
    config.budget = 0.01;
    config.rank_snippets = true;
    config.rank_keep = 1;
    let ctx = context_with(config, llm.clone(), two_web_results(), StaticPapers(Vec::new()));
    let mut orchestrator = ResearchOrchestrator::new(ctx).unwrap();

    let outcome = orchestrator.run(QUESTION, Vec::new()).await.unwrap();

    assert_eq!(outcome.reason, TerminalReason::BudgetExhausted);
    assert_eq!(llm.calls().len(), 1);
    assert_eq!(llm.embed_calls(), 0);
    assert_eq!(outcome.context.len(), 1);
    assert!(outcome.answer.contains("[web] Cooking"));
}

#[tokio::test]
async fn test_concluded_session_cannot_run_again() {
    let llm = Arc::new(ScriptedLlm::new(vec![
        reply(PROPOSAL_EMPTY),
        reply(r#"{"answerable": false, "answer": ""}"#),
        reply("Nothing conclusive."),
    ]));
    let mut config = test_config();
    config.max_turns = 1;
    let mut orchestrator = ResearchOrchestrator::new(quiet_context(config, llm.clone())).unwrap();

    let outcome = orchestrator.run(QUESTION, Vec::new()).await.unwrap();
    assert_eq!(outcome.reason, TerminalReason::TurnLimit);
    let cost = orchestrator.ledger().total_cost();

    assert!(matches!(
        orchestrator.run_to_completion().await,
        Err(ResearchError::SessionConcluded)
    ));
    assert!(matches!(
        orchestrator.run_turn().await,
        Err(ResearchError::SessionConcluded)
    ));
    assert_eq!(llm.calls().len(), 3);
    assert_eq!(orchestrator.ledger().total_cost(), cost);
}

#[tokio::test]
async fn test_answered_session_cannot_run_again() {
    let llm = Arc::new(ScriptedLlm::new(vec![
        reply(PROPOSAL_EMPTY),
        reply(r#"{"answerable": true, "answer": "Accretion rate."}"#),
    ]));
    let mut orchestrator = ResearchOrchestrator::new(quiet_context(test_config(), llm.clone())).unwrap();

    let outcome = orchestrator.run(QUESTION, Vec::new()).await.unwrap();
    assert!(outcome.answered);

    assert!(matches!(
        orchestrator.run_turn().await,
        Err(ResearchError::SessionConcluded)
    ));
    assert!(matches!(
        orchestrator.run_to_completion().await,
        Err(ResearchError::SessionConcluded)
    ));
    assert_eq!(llm.calls().len(), 2);
}

#[tokio::test]
async fn test_reset_restarts_the_question() {
    let llm = Arc::new(ScriptedLlm::new(vec![
        reply(PROPOSAL_EMPTY),
        reply(r#"{"answerable": false, "answer": ""}"#),
        reply("Nothing conclusive."),
        reply(PROPOSAL_EMPTY),
        reply(r#"{"answerable": true, "answer": "Accretion rate."}"#),
    ]));
    let mut config = test_config();
    config.max_turns = 1;
    let mut orchestrator = ResearchOrchestrator::new(quiet_context(config, llm.clone())).unwrap();

    let first = orchestrator.run(QUESTION, Vec::new()).await.unwrap();
    assert_eq!(first.reason, TerminalReason::TurnLimit);

    orchestrator.reset();
    let session = orchestrator.session().unwrap();
    assert_eq!(session.state(), ResearchState::AwaitingQuestion);
    assert_eq!(session.turn(), 0);
    assert_eq!(session.question(), QUESTION);
    assert_eq!(orchestrator.ledger().total_cost(), 0.0);

    let second = orchestrator.run_to_completion().await.unwrap();
    assert!(second.answered);
    assert_eq!(second.turns, 1);
    assert_eq!(second.session_id, first.session_id);
    assert!((second.usage.total_cost - 2.0 * CALL_COST).abs() < 1e-9);
}

#[tokio::test]
async fn test_empty_question_is_rejected() {
    let llm = Arc::new(ScriptedLlm::new(Vec::new()));
    let mut orchestrator = ResearchOrchestrator::new(quiet_context(test_config(), llm.clone())).unwrap();

    let err = orchestrator.run("  ", Vec::new()).await.unwrap_err();
    assert!(matches!(err, ResearchError::EmptyQuestion));
    assert!(llm.calls().is_empty());
}

#[test]
fn test_unpriced_model_is_a_configuration_error() {
    let mut config = test_config();
    config.smart_model = "gpt-unknown".to_string();
    let ctx = quiet_context(config, Arc::new(ScriptedLlm::new(Vec::new())));

    assert!(matches!(
        ResearchOrchestrator::new(ctx),
        Err(ResearchError::Config(_))
    ));
}

#[tokio::test]
async fn test_run_turn_requires_a_question() {
    let llm = Arc::new(ScriptedLlm::new(Vec::new()));
    let mut orchestrator = ResearchOrchestrator::new(quiet_context(test_config(), llm)).unwrap();
    assert!(matches!(
        orchestrator.run_turn().await,
        Err(ResearchError::EmptyQuestion)
    ));
}

/// Satisfies both the proposal and the main-answer shapes.
const NEVER_DONE: &str = r#"{"sub_questions": [], "internet_search": false, "internet_query": "", "academic_query": "", "answerable": false, "answer": ""}"#;

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn prop_budget_overshoot_is_at_most_one_call(budget in 0.001f64..0.3) {
        let outcome = tokio_test::block_on(async {
            let llm = Arc::new(ScriptedLlm::repeating(NEVER_DONE));
            let mut config = test_config();
            config.budget = budget;
            config.max_turns = 100;
            let mut orchestrator = ResearchOrchestrator::new(quiet_context(config, llm)).unwrap();
            orchestrator.run(QUESTION, Vec::new()).await.unwrap()
        });

        prop_assert_eq!(outcome.reason, TerminalReason::BudgetExhausted);
        prop_assert!(outcome.usage.total_cost > budget);
        prop_assert!(outcome.usage.total_cost <= budget + CALL_COST + 1e-9);
    }
}
