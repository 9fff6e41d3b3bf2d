//! Turn protocol - prompt rendering and structured-reply decoding.
//!
//! Each turn asks the model for JSON in a fixed shape. Replies are decoded
//! strictly into typed values; anything else is a [`MalformedActionError`].
//! A lenient local repair pass is available for the caller's bounded retry
//! policy, and the orchestrator may follow up with a repair prompt.

mod action;
mod prompts;
mod repair;

pub use action::{
    parse_action, parse_reply, ActionProposal, MainAnswerVerdict, MalformedActionError,
    StructuredReply, SubQuestionVerdict,
};
pub use prompts::{
    build_final_summary_prompt, build_main_question_prompt, build_repair_prompt,
    build_sub_question_prompt, build_summary_prompt, build_turn_prompt, fallback_summary,
    RESEARCH_PROTOCOL,
};
pub use repair::{parse_lenient, repair_json};
