//! Retrieval collaborators.
//!
//! The orchestrator only needs "query in, ordered snippets out". Sources are
//! traits so tests and alternative backends can be swapped in; failures are
//! plain `anyhow` errors that the caller downgrades to an empty result.

mod google;
pub mod ranking;
mod semantic_scholar;

pub use google::GoogleSearchClient;
pub use semantic_scholar::SemanticScholarClient;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// A web search hit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebResult {
    pub title: String,
    pub snippet: String,
    pub url: String,
}

impl WebResult {
    /// Single-line form stored in the research context.
    pub fn to_context_line(&self) -> String {
        format!("[web] {}: {} ({})", self.title, self.snippet, self.url)
    }
}

/// An academic paper hit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaperResult {
    pub title: String,
    pub snippet: String,
    pub source_id: String,
}

impl PaperResult {
    pub fn to_context_line(&self) -> String {
        format!("[paper] {}: {} ({})", self.title, self.snippet, self.source_id)
    }
}

/// General web search.
#[async_trait]
pub trait WebSearch: Send + Sync {
    async fn search_web(&self, query: &str) -> anyhow::Result<Vec<WebResult>>;
}

/// Academic paper search.
#[async_trait]
pub trait PaperSearch: Send + Sync {
    async fn search_papers(&self, query: &str) -> anyhow::Result<Vec<PaperResult>>;
}

/// Web search stand-in used when no credentials are configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct DisabledWebSearch;

#[async_trait]
impl WebSearch for DisabledWebSearch {
    async fn search_web(&self, query: &str) -> anyhow::Result<Vec<WebResult>> {
        tracing::debug!(query, "Web search disabled, skipping");
        Ok(Vec::new())
    }
}
