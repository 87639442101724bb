//! Records exchanged between pipeline stages and persisted by the memory store.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::text::truncate;

/// Maximum characters kept from a stage input in an audit event.
pub const INPUT_SUMMARY_LIMIT: usize = 400;

/// Maximum characters kept from a stage output in an audit event.
pub const OUTPUT_SUMMARY_LIMIT: usize = 1000;

/// Raised when a stored role label is not one of the known speakers.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown role: {0}")]
pub struct UnknownRole(pub String);

/// Speaker of a conversation turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = UnknownRole;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            "system" => Ok(Role::System),
            other => Err(UnknownRole(other.to_string())),
        }
    }
}

/// A single turn of a conversation.
///
/// Fields are private so a turn cannot change after construction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatTurn {
    role: Role,
    content: String,
}

impl ChatTurn {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    /// Create a user turn.
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    /// Create an assistant turn.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    /// Create a system turn.
    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn content(&self) -> &str {
        &self.content
    }
}

/// How hard the evaluator judged a request to be.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
    Easy,
    #[default]
    Medium,
    Hard,
}

impl Difficulty {
    /// Map a free-form label onto the closed set, defaulting to `Medium`.
    pub fn from_label(label: &str) -> Self {
        match label.trim().to_lowercase().as_str() {
            "easy" => Difficulty::Easy,
            "hard" => Difficulty::Hard,
            _ => Difficulty::Medium,
        }
    }
}

/// Output of the evaluator stage. Lives for one request only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Evaluation {
    pub difficulty: Difficulty,
    pub needs_cloud: bool,
    pub reason: String,
}

impl Evaluation {
    /// Reason recorded when the model output held no usable JSON object.
    pub const REASON_PARSE_FAILED: &'static str = "parse_failed";

    /// Reason recorded when the evaluator stage is disabled.
    pub const REASON_SKIPPED: &'static str = "skip";

    /// Reason recorded when the evaluator stage raised an error.
    pub const REASON_ERROR: &'static str = "error";

    /// Reason recorded when the model gave none.
    pub const REASON_MISSING: &'static str = "no reason provided";

    /// Neutral evaluation carrying the given reason.
    pub fn neutral(reason: impl Into<String>) -> Self {
        Self {
            difficulty: Difficulty::Medium,
            needs_cloud: false,
            reason: reason.into(),
        }
    }
}

/// What the pipeline should do with a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RouteAction {
    #[default]
    Chat,
    Skill,
}

/// Who produced a routing decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DecisionSource {
    #[default]
    Model,
    Manual,
}

/// Output of the routing stage.
///
/// `action == Skill` implies `skill` names a registered skill;
/// `action == Chat` implies `skill` is `None`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutingDecision {
    pub action: RouteAction,
    pub skill: Option<String>,
    pub arguments: BTreeMap<String, Value>,
    pub confidence: f64,
    pub source: DecisionSource,
}

impl RoutingDecision {
    /// Name of the argument carrying a timer duration.
    pub const MINUTES_ARG: &'static str = "minutes";

    /// Neutral decision: plain chat, nothing invoked.
    pub fn chat() -> Self {
        Self {
            action: RouteAction::Chat,
            skill: None,
            arguments: BTreeMap::new(),
            confidence: 0.0,
            source: DecisionSource::Model,
        }
    }

    /// Decision produced by the heuristic layer.
    pub fn manual(
        skill: impl Into<String>,
        arguments: BTreeMap<String, Value>,
        confidence: f64,
    ) -> Self {
        Self {
            action: RouteAction::Skill,
            skill: Some(skill.into()),
            arguments,
            confidence,
            source: DecisionSource::Manual,
        }
    }

    /// The skill to invoke, if the decision routes to one.
    pub fn selected_skill(&self) -> Option<&str> {
        match self.action {
            RouteAction::Skill => self.skill.as_deref(),
            RouteAction::Chat => None,
        }
    }

    /// The `minutes` argument as a whole number, if present and numeric.
    pub fn minutes(&self) -> Option<u64> {
        minutes_argument(&self.arguments)
    }
}

/// Read a `minutes` argument given as a number or a numeric string.
pub fn minutes_argument(arguments: &BTreeMap<String, Value>) -> Option<u64> {
    match arguments.get(RoutingDecision::MINUTES_ARG)? {
        Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

impl Default for RoutingDecision {
    fn default() -> Self {
        Self::chat()
    }
}

/// One audit row per stage execution, including failed stages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineEvent {
    pub session_id: String,
    pub step_name: String,
    pub input_summary: String,
    pub output_summary: String,
    pub success: bool,
    pub latency_ms: Option<f64>,
    pub timestamp: DateTime<Utc>,
}

impl PipelineEvent {
    /// Build an event stamped now, truncating both snapshots.
    pub fn new(
        session_id: impl Into<String>,
        step_name: impl Into<String>,
        input: &str,
        output: &str,
        success: bool,
        latency_ms: Option<f64>,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            step_name: step_name.into(),
            input_summary: truncate(input, INPUT_SUMMARY_LIMIT),
            output_summary: truncate(output, OUTPUT_SUMMARY_LIMIT),
            success,
            latency_ms,
            timestamp: Utc::now(),
        }
    }
}

/// A persisted conversation message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: i64,
    pub timestamp: DateTime<Utc>,
    pub role: Role,
    pub content: String,
    pub session_id: String,
}

impl Message {
    /// Render as a `role: content` history line.
    pub fn history_line(&self) -> String {
        format!("{}: {}", self.role, self.content)
    }

    pub fn to_turn(&self) -> ChatTurn {
        ChatTurn::new(self.role, self.content.clone())
    }
}
