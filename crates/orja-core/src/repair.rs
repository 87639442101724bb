//! Validation and repair of model-produced stage records.
//!
//! The model output is untrusted. These functions turn an extracted JSON
//! object into a closed-field record, replacing anything out of range with
//! a safe default. They never fail.

use std::collections::BTreeMap;

use serde_json::Value;

use crate::extract::JsonObject;
use crate::types::{DecisionSource, Difficulty, Evaluation, RouteAction, RoutingDecision};

/// Confidence at or above which a named skill overrides a `chat` action.
pub const PROMOTION_CONFIDENCE: f64 = 0.5;

/// Build an [`Evaluation`] from an extracted object.
///
/// `difficulty` is coerced into the closed set (default `medium`),
/// `needs_cloud` into a boolean, and an empty reason is replaced.
pub fn repair_evaluation(object: &JsonObject) -> Evaluation {
    let difficulty = match object.get("difficulty") {
        Some(Value::String(label)) => Difficulty::from_label(label),
        _ => Difficulty::Medium,
    };

    let needs_cloud = coerce_bool(object.get("needs_cloud"));

    let reason = match object.get("reason") {
        Some(Value::String(s)) => s.trim().to_string(),
        Some(Value::Null) | None => String::new(),
        Some(other) => other.to_string(),
    };
    let reason = if reason.is_empty() {
        Evaluation::REASON_MISSING.to_string()
    } else {
        reason
    };

    Evaluation {
        difficulty,
        needs_cloud,
        reason,
    }
}

/// Build a [`RoutingDecision`] from an extracted object.
///
/// Rules run in a fixed order:
/// 1. an unregistered skill name is dropped;
/// 2. confidence is clamped into `[0, 1]` (non-numeric becomes `0.0`);
/// 3. a valid skill with `action = chat` and confidence >= 0.5 is promoted
///    to `action = skill`;
/// 4. `action = skill` without a surviving skill is demoted to `chat`.
pub fn repair_routing<S: AsRef<str>>(object: &JsonObject, known_skills: &[S]) -> RoutingDecision {
    let skill = match object.get("skill") {
        Some(Value::String(name)) if known_skills.iter().any(|k| k.as_ref() == name) => {
            Some(name.clone())
        }
        _ => None,
    };

    let confidence = coerce_confidence(object.get("confidence"));

    let mut action = match object.get("action") {
        Some(Value::String(label)) if label.trim().eq_ignore_ascii_case("skill") => {
            RouteAction::Skill
        }
        _ => RouteAction::Chat,
    };

    if skill.is_some() && action == RouteAction::Chat && confidence >= PROMOTION_CONFIDENCE {
        action = RouteAction::Skill;
    }
    if action == RouteAction::Skill && skill.is_none() {
        action = RouteAction::Chat;
    }

    let arguments: BTreeMap<String, Value> = match object.get("arguments") {
        Some(Value::Object(map)) => map.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
        _ => BTreeMap::new(),
    };

    // a chat decision never names a skill
    let skill = match action {
        RouteAction::Skill => skill,
        RouteAction::Chat => None,
    };

    RoutingDecision {
        action,
        skill,
        arguments,
        confidence,
        source: DecisionSource::Model,
    }
}

/// Clamp a confidence value into `[0, 1]`; anything non-numeric is `0.0`.
pub fn coerce_confidence(value: Option<&Value>) -> f64 {
    let raw = match value {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    match raw {
        Some(v) if v.is_finite() => v.clamp(0.0, 1.0),
        Some(v) if v == f64::INFINITY => 1.0,
        _ => 0.0,
    }
}

fn coerce_bool(value: Option<&Value>) -> bool {
    match value {
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_f64().map(|v| v != 0.0).unwrap_or(false),
        Some(Value::String(s)) => matches!(
            s.trim().to_ascii_lowercase().as_str(),
            "true" | "yes" | "y" | "1"
        ),
        _ => false,
    }
}
