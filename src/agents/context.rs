//! Research execution context - the collaborators a session runs against.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::budget::ModelPricing;
use crate::config::Config;
use crate::llm::{LlmClient, OpenAiClient};
use crate::retrieval::{
    DisabledWebSearch, GoogleSearchClient, PaperSearch, SemanticScholarClient, WebSearch,
};

/// Everything the orchestrator depends on, injected explicitly.
#[derive(Clone)]
pub struct ResearchContext {
    /// Application configuration
    pub config: Config,

    /// Completion and embedding provider
    pub llm: Arc<dyn LlmClient>,

    pub web: Arc<dyn WebSearch>,

    pub papers: Arc<dyn PaperSearch>,

    /// Model pricing information
    pub pricing: Arc<ModelPricing>,

    /// Optional cancellation token for cooperative cancellation.
    pub cancel_token: Option<CancellationToken>,
}

impl ResearchContext {
    pub fn new(
        config: Config,
        llm: Arc<dyn LlmClient>,
        web: Arc<dyn WebSearch>,
        papers: Arc<dyn PaperSearch>,
        pricing: Arc<ModelPricing>,
    ) -> Self {
        Self {
            config,
            llm,
            web,
            papers,
            pricing,
            cancel_token: None,
        }
    }

    /// Build the production collaborators described by `config`.
    pub fn from_config(config: Config) -> anyhow::Result<Self> {
        let llm = OpenAiClient::new(config.api_key.clone(), config.base_url.clone())?;

        let web: Arc<dyn WebSearch> = match &config.google {
            Some(google) => Arc::new(GoogleSearchClient::new(google, config.max_results_per_source)?),
            None => {
                tracing::warn!("Google search credentials not set; web search is disabled");
                Arc::new(DisabledWebSearch)
            }
        };
        let papers = SemanticScholarClient::new(
            config.semantic_scholar_api_key.clone(),
            config.max_results_per_source,
        )?;

        Ok(Self::new(
            config,
            Arc::new(llm),
            web,
            Arc::new(papers),
            Arc::new(ModelPricing::default_openai()),
        ))
    }

    pub fn with_cancel_token(mut self, token: CancellationToken) -> Self {
        self.cancel_token = Some(token);
        self
    }

    /// Check if cooperative cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token
            .as_ref()
            .map(|t| t.is_cancelled())
            .unwrap_or(false)
    }
}
