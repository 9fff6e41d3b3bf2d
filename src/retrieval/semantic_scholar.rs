//! Semantic Scholar paper search.

use std::time::{Duration, Instant};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde::Deserialize;

use super::{PaperResult, PaperSearch};

const SEMANTIC_SCHOLAR_API: &str = "https://api.semanticscholar.org/graph/v1";
const SEARCH_FIELDS: &str = "paperId,title,abstract,tldr";

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    data: Vec<Paper>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Paper {
    paper_id: String,
    title: Option<String>,
    #[serde(rename = "abstract")]
    abstract_text: Option<String>,
    tldr: Option<Tldr>,
}

#[derive(Debug, Deserialize)]
struct Tldr {
    text: Option<String>,
}

/// Client for the Semantic Scholar Graph API keyword search.
pub struct SemanticScholarClient {
    client: reqwest::Client,
    api_key: Option<String>,
    limit: usize,
}

impl SemanticScholarClient {
    pub fn new(api_key: Option<String>, limit: usize) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .connect_timeout(Duration::from_secs(10))
            .user_agent(concat!("researcher/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| anyhow!("Failed to create HTTP client: {}", e))?;
        Ok(Self {
            client,
            api_key,
            limit: limit.clamp(1, 100),
        })
    }
}

/// Prefer the tldr, fall back to the abstract.
fn into_results(response: SearchResponse) -> Vec<PaperResult> {
    response
        .data
        .into_iter()
        .map(|paper| {
            let snippet = paper
                .tldr
                .and_then(|t| t.text)
                .or(paper.abstract_text)
                .unwrap_or_default();
            PaperResult {
                title: paper.title.unwrap_or_else(|| "Untitled".to_string()),
                snippet,
                source_id: paper.paper_id,
            }
        })
        .collect()
}

#[async_trait]
impl PaperSearch for SemanticScholarClient {
    async fn search_papers(&self, query: &str) -> Result<Vec<PaperResult>> {
        let start = Instant::now();
        let url = format!(
            "{}/paper/search?query={}&limit={}&fields={}",
            SEMANTIC_SCHOLAR_API,
            urlencoding::encode(query),
            self.limit,
            SEARCH_FIELDS
        );

        let mut request = self.client.get(&url);
        if let Some(ref key) = self.api_key {
            request = request.header("x-api-key", key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| anyhow!("Semantic Scholar request failed: {}", e))?;

        if !response.status().is_success() {
            return Err(anyhow!(
                "Semantic Scholar returned status {}",
                response.status()
            ));
        }

        let body: SearchResponse = response
            .json()
            .await
            .map_err(|e| anyhow!("Failed to parse Semantic Scholar response: {}", e))?;
        let results = into_results(body);

        tracing::info!(
            query,
            results = results.len(),
            duration_ms = start.elapsed().as_millis() as u64,
            "Paper search complete"
        );
        Ok(results)
    }
}
