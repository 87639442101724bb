//! Stage agents.
//!
//! Each agent wraps one provider call. The evaluator and router pass the
//! raw model text through JSON extraction and repair; the responder keeps
//! the text as the answer. A disabled agent returns its neutral value
//! without touching the provider.

mod evaluator;
mod responder;
mod router;
mod traits;

pub use evaluator::EvaluatorAgent;
pub use responder::{ResponderAgent, ResponderInput, EMPTY_ANSWER_REPLY, RESPONDER_DISABLED_REPLY};
pub use router::RouterAgent;
pub use traits::{AgentError, StageAgent};
