//! Model price table.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::BudgetError;

/// Prices for a single model, in dollars per 1000 tokens.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PricingInfo {
    pub prompt_per_1k: f64,
    pub completion_per_1k: f64,
}

impl PricingInfo {
    pub const fn new(prompt_per_1k: f64, completion_per_1k: f64) -> Self {
        Self {
            prompt_per_1k,
            completion_per_1k,
        }
    }

    /// Cost in dollars of a single call.
    pub fn calculate_cost(&self, prompt_tokens: u64, completion_tokens: u64) -> f64 {
        (prompt_tokens as f64 * self.prompt_per_1k
            + completion_tokens as f64 * self.completion_per_1k)
            / 1000.0
    }
}

/// Immutable mapping from model identifier to its prices.
///
/// Built once at startup and shared behind an `Arc`. Looking up a model that
/// is not in the table is an error rather than a free call.
#[derive(Debug, Clone, Default)]
pub struct ModelPricing {
    prices: HashMap<String, PricingInfo>,
}

impl ModelPricing {
    pub fn new(prices: impl IntoIterator<Item = (String, PricingInfo)>) -> Self {
        Self {
            prices: prices.into_iter().collect(),
        }
    }

    /// Built-in OpenAI price table.
    pub fn default_openai() -> Self {
        let table = [
            ("gpt-3.5-turbo", PricingInfo::new(0.002, 0.002)),
            ("gpt-3.5-turbo-0301", PricingInfo::new(0.002, 0.002)),
            ("gpt-4", PricingInfo::new(0.03, 0.06)),
            ("gpt-4-0314", PricingInfo::new(0.03, 0.06)),
            ("gpt-4-32k", PricingInfo::new(0.06, 0.12)),
            ("gpt-4-32k-0314", PricingInfo::new(0.06, 0.12)),
            ("text-embedding-ada-002", PricingInfo::new(0.0004, 0.0)),
        ];
        Self::new(table.into_iter().map(|(m, p)| (m.to_string(), p)))
    }

    /// Return a copy of this table with `model` priced as `info`.
    pub fn with_model(mut self, model: impl Into<String>, info: PricingInfo) -> Self {
        self.prices.insert(model.into(), info);
        self
    }

    pub fn get(&self, model: &str) -> Result<&PricingInfo, BudgetError> {
        self.prices
            .get(model)
            .ok_or_else(|| BudgetError::UnknownModel(model.to_string()))
    }

    pub fn contains(&self, model: &str) -> bool {
        self.prices.contains_key(model)
    }

    /// Fail on the first model that has no price.
    pub fn ensure_known<'a>(
        &self,
        models: impl IntoIterator<Item = &'a str>,
    ) -> Result<(), BudgetError> {
        for model in models {
            self.get(model)?;
        }
        Ok(())
    }

    pub fn models(&self) -> impl Iterator<Item = &str> {
        self.prices.keys().map(String::as_str)
    }
}
