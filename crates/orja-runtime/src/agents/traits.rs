//! Stage agent trait and common types.

use std::sync::Arc;
use thiserror::Error;

use orja_core::ChatTurn;

use crate::config::AgentConfig;
use crate::prompts::{PromptName, PromptSource};
use crate::providers::{GenerateOptions, LlmProvider, ProviderError};

/// Errors from stage agents.
///
/// Malformed model output is never an error; it is repaired to a neutral
/// value. Only a failing provider call surfaces here.
#[derive(Error, Debug)]
pub enum AgentError {
    #[error("LLM call failed: {0}")]
    Provider(#[from] ProviderError),

    #[error("Failed to serialize stage context: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Common wiring of a stage agent: one provider, one system prompt.
pub trait StageAgent: Send + Sync {
    /// Stage name used in logs.
    fn stage(&self) -> &'static str;

    /// The system prompt this stage sends.
    fn system_prompt_name(&self) -> PromptName;

    fn provider(&self) -> &Arc<dyn LlmProvider>;

    fn prompts(&self) -> &Arc<dyn PromptSource>;

    fn config(&self) -> AgentConfig;

    fn is_enabled(&self) -> bool {
        self.config().enabled
    }

    /// Sampling for this stage's single call.
    fn options(&self) -> GenerateOptions;
}

/// Send `user_prompt` as a single user turn with the stage's system prompt.
pub(crate) async fn call_model<A: StageAgent + ?Sized>(
    agent: &A,
    user_prompt: String,
) -> Result<String, AgentError> {
    let options = agent
        .options()
        .system_prompt(agent.prompts().get(agent.system_prompt_name()))
        .max_tokens(agent.config().max_tokens);
    let raw = agent
        .provider()
        .generate(&[ChatTurn::user(user_prompt)], &options)
        .await?;
    tracing::debug!(stage = agent.stage(), raw = %orja_core::text::prefix_chars(&raw, 300), "Model output");
    Ok(raw)
}
