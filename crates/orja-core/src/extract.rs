//! Lenient JSON extraction from model output.
//!
//! Local models wrap JSON in prose, code fences or stop mid-object. The
//! extractor takes the span from the first `{` to the last `}` and parses
//! it, returning `None` instead of an error on any failure.

use lazy_static::lazy_static;
use regex::Regex;
use serde_json::{Map, Value};

lazy_static! {
    /// Opening fence with an optional language tag (```json).
    static ref OPENING_FENCE: Regex = Regex::new(r"^```[a-zA-Z0-9_-]*\s*").unwrap();
}

/// A parsed JSON object.
pub type JsonObject = Map<String, Value>;

/// Extract the first well-formed JSON object from raw model text.
///
/// Never panics; returns `None` for empty input, text without braces,
/// braces in the wrong order, or a span that is not a valid object.
pub fn extract_json_object(raw: &str) -> Option<JsonObject> {
    let cleaned = strip_code_fence(raw.trim());

    let start = cleaned.find('{');
    let end = cleaned.rfind('}');
    let (start, end) = match (start, end) {
        (Some(start), Some(end)) if end > start => (start, end),
        _ => {
            tracing::debug!(text = %crate::text::prefix_chars(cleaned, 200), "No JSON object found in output");
            return None;
        }
    };

    let snippet = &cleaned[start..=end];
    match serde_json::from_str::<JsonObject>(snippet) {
        Ok(object) => Some(object),
        Err(e) => {
            tracing::debug!(
                error = %e,
                text = %crate::text::prefix_chars(snippet, 200),
                "JSON parsing failed"
            );
            None
        }
    }
}

/// Remove a leading ```lang fence and its matching closing fence.
fn strip_code_fence(text: &str) -> &str {
    if !text.starts_with("```") {
        return text;
    }
    let body = match OPENING_FENCE.find(text) {
        Some(m) => &text[m.end()..],
        None => text,
    };
    if body.ends_with("```") {
        match body.rfind("```") {
            Some(idx) => &body[..idx],
            None => body,
        }
    } else {
        body
    }
}
