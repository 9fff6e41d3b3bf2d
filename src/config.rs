//! Process configuration.
//!
//! Built once at startup from environment variables and passed explicitly to
//! the components that need it. Missing credentials fail here, before any
//! research session starts.

use thiserror::Error;

use crate::budget::{BudgetError, ModelPricing};
use crate::llm::ChatOptions;

pub const DEFAULT_BASE_URL: &str = crate::llm::DEFAULT_BASE_URL;
pub const DEFAULT_FAST_MODEL: &str = "gpt-3.5-turbo";
pub const DEFAULT_SMART_MODEL: &str = "gpt-4";
pub const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-ada-002";
pub const DEFAULT_MAX_TURNS: u32 = 10;
pub const DEFAULT_MAX_REPAIR_ATTEMPTS: u32 = 1;
pub const DEFAULT_MAX_RESULTS: usize = 5;
pub const DEFAULT_RANK_KEEP: usize = 6;

/// Startup-time configuration failures.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConfigError {
    #[error("Missing credential: set {0}")]
    MissingCredential(String),

    #[error("Invalid value for {var}: {reason}")]
    Invalid { var: String, reason: String },

    #[error("Model '{0}' has no entry in the price table")]
    UnknownModel(String),
}

impl From<BudgetError> for ConfigError {
    fn from(err: BudgetError) -> Self {
        match err {
            BudgetError::UnknownModel(model) => ConfigError::UnknownModel(model),
            other => ConfigError::Invalid {
                var: "pricing".to_string(),
                reason: other.to_string(),
            },
        }
    }
}

/// Google Custom Search credentials.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GoogleSearchConfig {
    pub api_key: String,
    pub engine_id: String,
}

/// Application configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Completion provider credential
    pub api_key: String,

    /// OpenAI-compatible API base URL
    pub base_url: String,

    /// Model used for proposals, summaries, and sub-question checks
    pub fast_model: String,

    /// Model used to answer the main question
    pub smart_model: String,

    /// Model used for snippet ranking
    pub embedding_model: String,

    pub temperature: f64,

    pub max_tokens: u32,

    /// Emit the running cost after every billed call
    pub debug: bool,

    /// Hard stop after this many turns
    pub max_turns: u32,

    /// Budget ceiling in dollars (0 = unbounded)
    pub budget: f64,

    /// Follow-up LLM calls allowed to repair one malformed reply
    pub max_repair_attempts: u32,

    /// Results kept per retrieval source per turn
    pub max_results_per_source: usize,

    /// Rank retrieved snippets by embedding similarity to the question
    pub rank_snippets: bool,

    /// Snippets kept after ranking
    pub rank_keep: usize,

    /// Web search credentials; `None` disables web search
    pub google: Option<GoogleSearchConfig>,

    pub semantic_scholar_api_key: Option<String>,
}

impl Config {
    /// Configuration with defaults and the given credential.
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            fast_model: DEFAULT_FAST_MODEL.to_string(),
            smart_model: DEFAULT_SMART_MODEL.to_string(),
            embedding_model: DEFAULT_EMBEDDING_MODEL.to_string(),
            temperature: 0.0,
            max_tokens: 500,
            debug: false,
            max_turns: DEFAULT_MAX_TURNS,
            budget: 0.0,
            max_repair_attempts: DEFAULT_MAX_REPAIR_ATTEMPTS,
            max_results_per_source: DEFAULT_MAX_RESULTS,
            rank_snippets: false,
            rank_keep: DEFAULT_RANK_KEEP,
            google: None,
            semantic_scholar_api_key: None,
        }
    }

    /// Load configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let api_key = get("OPENAI_API_KEY")
            .or_else(|| get("OPENAI_API_TOKEN"))
            .ok_or_else(|| ConfigError::MissingCredential("OPENAI_API_KEY".to_string()))?;

        let mut config = Self::new(api_key);

        if let Some(url) = get("OPENAI_BASE_URL") {
            config.base_url = url;
        }
        if let Some(model) = get("FAST_MODEL") {
            config.fast_model = model;
        }
        if let Some(model) = get("SMART_MODEL") {
            config.smart_model = model;
        }
        if let Some(model) = get("EMBEDDING_MODEL") {
            config.embedding_model = model;
        }
        if let Some(v) = get("TEMPERATURE") {
            config.temperature = parse_var("TEMPERATURE", &v)?;
        }
        if let Some(v) = get("MAX_TOKENS") {
            config.max_tokens = parse_var("MAX_TOKENS", &v)?;
        }
        if let Some(v) = get("DEBUG") {
            config.debug = parse_flag(&v);
        }
        if let Some(v) = get("RESEARCH_MAX_TURNS") {
            config.max_turns = parse_var("RESEARCH_MAX_TURNS", &v)?;
        }
        if let Some(v) = get("RESEARCH_BUDGET") {
            config.budget = parse_var("RESEARCH_BUDGET", &v)?;
        }
        if let Some(v) = get("RESEARCH_MAX_REPAIR_ATTEMPTS") {
            config.max_repair_attempts = parse_var("RESEARCH_MAX_REPAIR_ATTEMPTS", &v)?;
        }
        if let Some(v) = get("RESEARCH_MAX_RESULTS") {
            config.max_results_per_source = parse_var("RESEARCH_MAX_RESULTS", &v)?;
        }
        if let Some(v) = get("RESEARCH_RANK_SNIPPETS") {
            config.rank_snippets = parse_flag(&v);
        }
        if let Some(v) = get("RESEARCH_RANK_KEEP") {
            config.rank_keep = parse_var("RESEARCH_RANK_KEEP", &v)?;
        }

        config.google = match (get("GOOGLE_API_TOKEN"), get("GOOGLE_CUSTOM_SEARCH_TOKEN")) {
            (Some(api_key), Some(engine_id)) => Some(GoogleSearchConfig { api_key, engine_id }),
            (None, None) => None,
            (Some(_), None) => {
                return Err(ConfigError::MissingCredential(
                    "GOOGLE_CUSTOM_SEARCH_TOKEN".to_string(),
                ))
            }
            (None, Some(_)) => {
                return Err(ConfigError::MissingCredential("GOOGLE_API_TOKEN".to_string()))
            }
        };
        config.semantic_scholar_api_key = get("SEMANTIC_SCHOLAR_API_KEY");

        config.check_ranges()?;
        Ok(config)
    }

    fn check_ranges(&self) -> Result<(), ConfigError> {
        if self.max_turns == 0 {
            return Err(invalid("RESEARCH_MAX_TURNS", "must be at least 1"));
        }
        if !self.budget.is_finite() || self.budget < 0.0 {
            return Err(invalid("RESEARCH_BUDGET", "must be a non-negative amount"));
        }
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(invalid("TEMPERATURE", "must be between 0 and 2"));
        }
        if self.max_tokens == 0 {
            return Err(invalid("MAX_TOKENS", "must be at least 1"));
        }
        if self.rank_snippets && self.rank_keep == 0 {
            return Err(invalid("RESEARCH_RANK_KEEP", "must be at least 1 when ranking"));
        }
        Ok(())
    }

    /// Check value ranges and that every configured model has a price.
    pub fn validate(&self, pricing: &ModelPricing) -> Result<(), ConfigError> {
        self.check_ranges()?;
        pricing.ensure_known(self.billed_models())?;
        Ok(())
    }

    /// Models this configuration may bill against.
    pub fn billed_models(&self) -> Vec<&str> {
        let mut models = vec![self.fast_model.as_str(), self.smart_model.as_str()];
        if self.rank_snippets {
            models.push(self.embedding_model.as_str());
        }
        models
    }

    pub fn chat_options(&self) -> ChatOptions {
        ChatOptions {
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        }
    }
}

fn invalid(var: &str, reason: &str) -> ConfigError {
    ConfigError::Invalid {
        var: var.to_string(),
        reason: reason.to_string(),
    }
}

fn parse_var<T>(var: &str, value: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value.parse::<T>().map_err(|e| ConfigError::Invalid {
        var: var.to_string(),
        reason: format!("'{}': {}", value, e),
    })
}

fn parse_flag(value: &str) -> bool {
    matches!(
        value.to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}
