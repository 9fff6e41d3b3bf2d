//! Prompt rendering.
//!
//! Every builder is a pure function of the session state so the same state
//! always yields byte-identical prompts.

use std::fmt::Write;

use super::action::{ActionProposal, MainAnswerVerdict, StructuredReply, SubQuestionVerdict};
use crate::agents::ResearchSession;

/// The fixed research protocol restated to the model every turn.
pub const RESEARCH_PROTOCOL: &str = "\
1. Receive this message outlining the question and context.
2. Define sub-questions relevant to the research question.
3. Decide if you need to search the internet for context to aid you in crafting the academic database query in the next step, and if so create a search query. Information found on the internet only guides your queries; it is not usable as research evidence.
4. Create a search query for a database of academic papers.
5. Read the results of your internet search and academic paper query, and summarize your findings.
6. Attempt to answer your sub-questions, if you have gathered enough information.
7. Decide if the answer to your research question is clear, and if so, answer it.
8. If you are not sure you have answered the research question, go back to step 2.
9. If you have answered the research question, summarize your findings and end the research session.";

/// Render a list as a JSON array so entries with commas or quotes stay unambiguous.
fn json_list(items: &[String]) -> String {
    serde_json::to_string(items).unwrap_or_else(|_| "[]".to_string())
}

fn findings(session: &ResearchSession) -> String {
    json_list(session.context())
}

/// Phase-one instruction block for the current turn.
pub fn build_turn_prompt(session: &ResearchSession) -> String {
    let mut content = String::new();
    let _ = write!(
        content,
        "You are a researcher, and you are trying to answer the following research question: {}\n\
         You should NOT use your own knowledge to answer the question, but instead use the information contained in these messages ONLY.\n\
         Your current sub-questions are: {}\n\
         You have found the following information: {}\n\n",
        session.question(),
        json_list(session.sub_questions()),
        findings(session),
    );
    let _ = write!(
        content,
        "Your research takes place in turns, in the following format:\n{}\n\n",
        RESEARCH_PROTOCOL
    );
    let _ = write!(
        content,
        "You are currently in turn {}. You define your actions this turn in two phases. \
         This is the first phase: define your sub-questions, decide if you need to search the internet, \
         and create your candidate search queries. Respond ONLY with a JSON object in this format:\n{}\n\
         You will then receive the results of your queries in the second phase.",
        session.current_turn(),
        ActionProposal::SCHEMA
    );
    content
}

/// Ask for a condensed summary that replaces the raw findings.
pub fn build_summary_prompt(session: &ResearchSession) -> String {
    format!(
        "You are a researcher working on the question: {}\n\
         Condense the following findings into a single summary that keeps every fact relevant to the question \
         and to these sub-questions: {}\n\
         Findings: {}\n\
         Respond with the summary text only.",
        session.question(),
        json_list(session.sub_questions()),
        findings(session),
    )
}

/// Ask whether the findings answer every sub-question.
pub fn build_sub_question_prompt(session: &ResearchSession) -> String {
    format!(
        "You are a researcher working on the question: {}\n\
         Using ONLY these findings: {}\n\
         attempt to answer each of these sub-questions in order: {}\n\
         Set all_answered to true only if the findings answer every sub-question. \
         Respond ONLY with a JSON object in this format:\n{}",
        session.question(),
        findings(session),
        json_list(session.sub_questions()),
        SubQuestionVerdict::SCHEMA
    )
}

/// Ask whether the main question is now answerable.
pub fn build_main_question_prompt(session: &ResearchSession) -> String {
    let pairs: Vec<String> = session
        .sub_questions()
        .iter()
        .zip(session.sub_answers())
        .map(|(q, a)| format!("{} => {}", q, a))
        .collect();
    format!(
        "You are a researcher working on the question: {}\n\
         Findings: {}\n\
         Sub-question answers: {}\n\
         Decide whether the research question can now be answered from this information alone. \
         If it can, set answerable to true and give the full answer; otherwise set answerable to false \
         and leave answer empty. Respond ONLY with a JSON object in this format:\n{}",
        session.question(),
        findings(session),
        json_list(&pairs),
        MainAnswerVerdict::SCHEMA
    )
}

/// Ask for the best available answer when research stops early.
pub fn build_final_summary_prompt(session: &ResearchSession) -> String {
    format!(
        "Research on the question \"{}\" has stopped before a conclusive answer was reached.\n\
         Sub-questions: {}\n\
         Findings: {}\n\
         Summarize what the findings establish about the question, and state clearly what remains unanswered.",
        session.question(),
        json_list(session.sub_questions()),
        findings(session),
    )
}

/// Follow-up asking the model to re-emit its previous reply as valid JSON.
pub fn build_repair_prompt(schema: &str, error: &str) -> String {
    format!(
        "Your previous reply could not be parsed ({}). \
         Respond again with ONLY a valid JSON object in exactly this format, with no other text:\n{}",
        error, schema
    )
}

/// LLM-free best-effort summary. Never empty.
pub fn fallback_summary(session: &ResearchSession) -> String {
    let mut out = format!("Research question: {}\n", session.question());
    if !session.sub_questions().is_empty() {
        out.push_str("Open sub-questions:\n");
        for q in session.sub_questions() {
            let _ = writeln!(out, "- {}", q);
        }
    }
    if session.context().is_empty() {
        out.push_str("No findings were gathered before research stopped.");
    } else {
        out.push_str("Findings so far:\n");
        for entry in session.context() {
            let _ = writeln!(out, "- {}", entry);
        }
    }
    out.trim_end().to_string()
}
