//! Local, LLM-free repair of near-JSON replies.

use std::sync::OnceLock;

use regex::Regex;

use super::action::{parse_reply, MalformedActionError, StructuredReply};

fn trailing_comma() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r",\s*([}\]])").expect("static regex"))
}

fn bare_placeholder() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r":\s*(undefined|NaN)\b").expect("static regex"))
}

/// Best-effort cleanup of a reply that should have been a JSON object.
///
/// Strips markdown fences and surrounding prose, normalises typographic
/// quotes, drops trailing commas, and maps `undefined`/`NaN` values to null.
pub fn repair_json(raw: &str) -> String {
    let text = raw
        .replace(['\u{201c}', '\u{201d}'], "\"")
        .replace(['\u{2018}', '\u{2019}'], "'");

    let body = match (text.find('{'), text.rfind('}')) {
        (Some(start), Some(end)) if start < end => &text[start..=end],
        (Some(start), _) => &text[start..],
        _ => text.as_str(),
    };

    let body = trailing_comma().replace_all(body, "$1");
    bare_placeholder().replace_all(&body, ": null").into_owned()
}

/// Strict decode, then one local repair pass before giving up.
pub fn parse_lenient<T: StructuredReply>(raw: &str) -> Result<T, MalformedActionError> {
    match parse_reply::<T>(raw) {
        Ok(value) => Ok(value),
        Err(strict_err) => {
            let repaired = repair_json(raw);
            parse_reply::<T>(&repaired).map_err(|_| strict_err)
        }
    }
}
