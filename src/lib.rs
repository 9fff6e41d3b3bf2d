//! # researcher
//!
//! Answers a research question by iterating turns with a language model:
//! propose sub-questions and search queries, gather findings from the web and
//! from academic papers, summarize them, and check whether the question can be
//! answered. Every billed call is recorded in a cost ledger and research stops
//! once an optional dollar budget is exceeded.
//!
//! ## Modules
//! - [`agents`]: the research orchestrator, its session and outcome types
//! - [`budget`]: model pricing and the usage ledger
//! - [`llm`]: the completion gateway and its OpenAI-compatible client
//! - [`protocol`]: prompts and the structured replies expected from the model
//! - [`retrieval`]: web and paper search collaborators
//! - [`config`]: configuration loaded from the environment

pub mod agents;
pub mod budget;
pub mod config;
pub mod llm;
pub mod protocol;
pub mod retrieval;

pub use agents::{ResearchContext, ResearchOrchestrator, ResearchOutcome};
pub use config::Config;
