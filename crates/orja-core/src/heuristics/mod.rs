//! Heuristic routing layer.
//!
//! Keyword shortcuts for trivial intents so that `help`, clock and timer
//! requests never depend on the model backend. A match fully replaces the
//! model-backed router. Rules are evaluated in order, first match wins:
//!
//! 1. the request starts with a configured prefix ⇒ that skill, confidence 1.0
//! 2. the request contains a timer keyword ⇒ the timer skill with the first
//!    integer as `minutes`, confidence 0.9
//!
//! The router holds no mutable state, so the same text always yields the
//! same decision.

mod patterns;

pub use patterns::{extract_minutes, MINUTES_PATTERN};

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::RoutingDecision;

/// Confidence assigned to a prefix match.
pub const PREFIX_CONFIDENCE: f64 = 1.0;

/// Confidence assigned to a timer keyword match.
pub const TIMER_CONFIDENCE: f64 = 0.9;

/// Prefixes that select one skill.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrefixRule {
    pub skill: String,
    pub prefixes: Vec<String>,
}

impl PrefixRule {
    pub fn new(skill: &str, prefixes: &[&str]) -> Self {
        Self {
            skill: skill.to_string(),
            prefixes: prefixes.iter().map(|p| p.to_string()).collect(),
        }
    }
}

/// Configurable heuristic rules.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HeuristicRules {
    /// Prefix rules, checked in order.
    pub prefixes: Vec<PrefixRule>,

    /// Skill selected by a timer keyword.
    pub timer_skill: String,

    /// Substrings that select the timer skill.
    pub timer_keywords: Vec<String>,
}

impl Default for HeuristicRules {
    fn default() -> Self {
        Self {
            prefixes: vec![
                PrefixRule::new("help", &["help", "commands", "what can you do"]),
                PrefixRule::new(
                    "time",
                    &[
                        "time",
                        "clock",
                        "what time",
                        "what's the time",
                        "whats the time",
                        "current time",
                    ],
                ),
            ],
            timer_skill: "timer".to_string(),
            timer_keywords: vec![
                "timer".to_string(),
                "countdown".to_string(),
                "alarm".to_string(),
            ],
        }
    }
}

/// Stateless keyword router.
#[derive(Debug, Clone, Default)]
pub struct HeuristicRouter {
    rules: HeuristicRules,
}

impl HeuristicRouter {
    pub fn new(rules: HeuristicRules) -> Self {
        Self { rules }
    }

    pub fn rules(&self) -> &HeuristicRules {
        &self.rules
    }

    /// Route `text` if a rule fires; `None` hands over to the model router.
    pub fn route(&self, text: &str) -> Option<RoutingDecision> {
        let lowered = text.trim().to_lowercase();
        if lowered.is_empty() {
            return None;
        }

        for rule in &self.rules.prefixes {
            if rule
                .prefixes
                .iter()
                .any(|prefix| !prefix.is_empty() && lowered.starts_with(&prefix.to_lowercase()))
            {
                return Some(RoutingDecision::manual(
                    rule.skill.clone(),
                    BTreeMap::new(),
                    PREFIX_CONFIDENCE,
                ));
            }
        }

        if self
            .rules
            .timer_keywords
            .iter()
            .any(|keyword| !keyword.is_empty() && lowered.contains(&keyword.to_lowercase()))
        {
            let mut arguments = BTreeMap::new();
            if let Some(minutes) = extract_minutes(text) {
                arguments.insert(RoutingDecision::MINUTES_ARG.to_string(), Value::from(minutes));
            }
            return Some(RoutingDecision::manual(
                self.rules.timer_skill.clone(),
                arguments,
                TIMER_CONFIDENCE,
            ));
        }

        None
    }
}
