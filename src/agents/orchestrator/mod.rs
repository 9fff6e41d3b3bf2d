//! Research orchestration.

mod root;
mod steps;

pub use root::ResearchOrchestrator;
