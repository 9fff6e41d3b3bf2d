//! Budget module - cost tracking and model pricing.
//!
//! # Key Concepts
//! - Pricing: immutable per-model price table (dollars per 1000 tokens)
//! - Ledger: running token and cost totals for one research session
//! - Budget: optional ceiling on the ledger's total cost (advisory)

mod ledger;
mod pricing;

pub use ledger::{BudgetError, UsageLedger, UsageReport};
pub use pricing::{ModelPricing, PricingInfo};
