//! # orja-core
//!
//! Deterministic building blocks for the Orja request pipeline.
//!
//! This crate never performs I/O and never calls a model. It provides:
//! - The records passed between pipeline stages ([`Evaluation`],
//!   [`RoutingDecision`]) and persisted by the memory store ([`Message`],
//!   [`PipelineEvent`])
//! - Lenient JSON extraction from untrusted model text
//! - Repair rules that turn extracted JSON into valid stage records
//! - The heuristic router that short-circuits trivial intents
//!
//! ## Example
//!
//! ```rust
//! use orja_core::{extract_json_object, repair_routing, HeuristicRouter, RouteAction};
//!
//! let router = HeuristicRouter::default();
//! let decision = router.route("set a timer for 10 minutes").unwrap();
//! assert_eq!(decision.minutes(), Some(10));
//!
//! let raw = "Sure: {\"action\": \"chat\", \"skill\": \"time\", \"confidence\": 0.7}";
//! let object = extract_json_object(raw).unwrap();
//! let decision = repair_routing(&object, &["help", "time", "timer"]);
//! assert_eq!(decision.action, RouteAction::Skill);
//! ```

pub mod extract;
pub mod heuristics;
pub mod repair;
pub mod text;
pub mod types;

// Re-export main types at crate root
pub use extract::{extract_json_object, JsonObject};
pub use heuristics::{extract_minutes, HeuristicRouter, HeuristicRules, PrefixRule};
pub use repair::{coerce_confidence, repair_evaluation, repair_routing};
pub use types::{
    minutes_argument, ChatTurn, DecisionSource, Difficulty, Evaluation, Message, PipelineEvent, Role, RouteAction,
    RoutingDecision, UnknownRole, INPUT_SUMMARY_LIMIT, OUTPUT_SUMMARY_LIMIT,
};
