//! Agents module - the research orchestrator and its session state.
//!
//! # Design Principles
//! - Every collaborator is injected through [`ResearchContext`]
//! - The orchestrator owns the session and the ledger; nothing else mutates them
//! - A turn is the unit of progress; stops happen at billing boundaries

mod context;
mod orchestrator;
mod session;
mod types;

pub use context::ResearchContext;
pub use orchestrator::ResearchOrchestrator;
pub use session::{ResearchSession, ResearchState};
pub use types::{ResearchError, ResearchOutcome, TerminalReason, TurnOutcome};
