//! Google Custom Search client.

use std::time::{Duration, Instant};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde::Deserialize;

use super::{WebResult, WebSearch};
use crate::config::GoogleSearchConfig;

const SEARCH_URL: &str = "https://www.googleapis.com/customsearch/v1";

/// Google Custom Search API response
#[derive(Debug, Deserialize)]
struct GoogleSearchResponse {
    items: Option<Vec<GoogleSearchItem>>,
}

#[derive(Debug, Deserialize)]
struct GoogleSearchItem {
    title: String,
    link: String,
    snippet: Option<String>,
}

pub struct GoogleSearchClient {
    api_key: String,
    engine_id: String,
    num_results: usize,
    client: reqwest::Client,
}

impl GoogleSearchClient {
    pub fn new(config: &GoogleSearchConfig, num_results: usize) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| anyhow!("Failed to create HTTP client: {}", e))?;
        Ok(Self {
            api_key: config.api_key.clone(),
            engine_id: config.engine_id.clone(),
            // The API caps a page at 10 results.
            num_results: num_results.clamp(1, 10),
            client,
        })
    }

    fn request_url(&self, query: &str) -> String {
        format!(
            "{}?key={}&cx={}&q={}&num={}",
            SEARCH_URL,
            self.api_key,
            self.engine_id,
            urlencoding::encode(query),
            self.num_results
        )
    }
}

fn into_results(response: GoogleSearchResponse) -> Vec<WebResult> {
    response
        .items
        .unwrap_or_default()
        .into_iter()
        .map(|item| WebResult {
            title: item.title,
            url: item.link,
            snippet: item.snippet.unwrap_or_default(),
        })
        .collect()
}

#[async_trait]
impl WebSearch for GoogleSearchClient {
    async fn search_web(&self, query: &str) -> Result<Vec<WebResult>> {
        let start = Instant::now();

        let response = self
            .client
            .get(self.request_url(query))
            .send()
            .await
            .map_err(|e| anyhow!("Google search request failed: {}", e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!("Google search failed with status {}: {}", status, body));
        }

        let data: GoogleSearchResponse = response
            .json()
            .await
            .map_err(|e| anyhow!("Failed to parse Google search response: {}", e))?;
        let results = into_results(data);

        tracing::info!(
            query,
            results = results.len(),
            duration_ms = start.elapsed().as_millis() as u64,
            "Google search complete"
        );
        Ok(results)
    }
}
