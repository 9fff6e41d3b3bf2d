//! Usage ledger - running token and cost accounting for a research session.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::ModelPricing;

/// Errors raised by pricing lookups and ledger updates.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum BudgetError {
    #[error("No price configured for model '{0}'")]
    UnknownModel(String),

    #[error("Invalid usage: {0}")]
    InvalidUsage(String),

    #[error("Invalid budget {0}: must be a finite, non-negative amount")]
    InvalidBudget(f64),
}

/// Snapshot of the ledger handed back to callers at the end of a session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct UsageReport {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_cost: f64,
    pub total_budget: f64,
}

impl fmt::Display for UsageReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "prompt tokens: {}, completion tokens: {}, cost: ${:.4}",
            self.prompt_tokens, self.completion_tokens, self.total_cost
        )?;
        if self.total_budget > 0.0 {
            write!(f, " of ${:.4} budget", self.total_budget)?;
        }
        Ok(())
    }
}

/// Running accounting of token usage and cost.
///
/// # Invariants
/// - `total_cost` is the sum of every delta returned by `record_usage`
/// - totals only decrease through `reset()`
/// - `total_budget == 0.0` means unbounded
#[derive(Debug, Clone)]
pub struct UsageLedger {
    pricing: Arc<ModelPricing>,
    verbose: bool,
    total_prompt_tokens: u64,
    total_completion_tokens: u64,
    total_cost: f64,
    total_budget: f64,
}

impl UsageLedger {
    pub fn new(pricing: Arc<ModelPricing>, verbose: bool) -> Self {
        Self {
            pricing,
            verbose,
            total_prompt_tokens: 0,
            total_completion_tokens: 0,
            total_cost: 0.0,
            total_budget: 0.0,
        }
    }

    /// Charge one completed call to the ledger.
    ///
    /// Returns the cost of this call in dollars. Nothing is recorded if the
    /// model is unknown or a counter would overflow.
    pub fn record_usage(
        &mut self,
        model: &str,
        prompt_tokens: u64,
        completion_tokens: u64,
    ) -> Result<f64, BudgetError> {
        let price = self.pricing.get(model)?;

        let new_prompt = self
            .total_prompt_tokens
            .checked_add(prompt_tokens)
            .ok_or_else(|| BudgetError::InvalidUsage("prompt token total overflow".into()))?;
        let new_completion = self
            .total_completion_tokens
            .checked_add(completion_tokens)
            .ok_or_else(|| BudgetError::InvalidUsage("completion token total overflow".into()))?;

        let delta = price.calculate_cost(prompt_tokens, completion_tokens);

        self.total_prompt_tokens = new_prompt;
        self.total_completion_tokens = new_completion;
        self.total_cost += delta;

        tracing::debug!(
            model,
            prompt_tokens,
            completion_tokens,
            delta,
            total_cost = self.total_cost,
            "Recorded usage"
        );
        if self.verbose {
            tracing::info!("Total running cost: ${:.3}", self.total_cost);
        }

        Ok(delta)
    }

    /// Advisory check; callers decide whether to stop.
    pub fn budget_exceeded(&self) -> bool {
        self.total_budget > 0.0 && self.total_cost > self.total_budget
    }

    pub fn set_budget(&mut self, amount: f64) -> Result<(), BudgetError> {
        if !amount.is_finite() || amount < 0.0 {
            return Err(BudgetError::InvalidBudget(amount));
        }
        self.total_budget = amount;
        Ok(())
    }

    /// Zero every total. Only for starting a new session.
    pub fn reset(&mut self) {
        self.total_prompt_tokens = 0;
        self.total_completion_tokens = 0;
        self.total_cost = 0.0;
        self.total_budget = 0.0;
    }

    pub fn total_prompt_tokens(&self) -> u64 {
        self.total_prompt_tokens
    }

    pub fn total_completion_tokens(&self) -> u64 {
        self.total_completion_tokens
    }

    pub fn total_cost(&self) -> f64 {
        self.total_cost
    }

    pub fn total_budget(&self) -> f64 {
        self.total_budget
    }

    /// Dollars left before the budget is exceeded, or `None` when unbounded.
    pub fn remaining_budget(&self) -> Option<f64> {
        (self.total_budget > 0.0).then(|| (self.total_budget - self.total_cost).max(0.0))
    }

    pub fn pricing(&self) -> &ModelPricing {
        &self.pricing
    }

    pub fn report(&self) -> UsageReport {
        UsageReport {
            prompt_tokens: self.total_prompt_tokens,
            completion_tokens: self.total_completion_tokens,
            total_cost: self.total_cost,
            total_budget: self.total_budget,
        }
    }
}
