//! Final answer synthesis.

use std::sync::Arc;

use orja_core::{Evaluation, RoutingDecision};

use super::traits::{call_model, AgentError, StageAgent};
use crate::config::AgentConfig;
use crate::prompts::{PromptName, PromptSource};
use crate::providers::{GenerateOptions, LlmProvider};

const TEMPERATURE: f32 = 0.6;
const TOP_P: f32 = 0.9;

/// Reply when the model produced only whitespace.
pub const EMPTY_ANSWER_REPLY: &str = "I could not find an answer, please try again.";

/// Reply when the responder stage is switched off.
pub const RESPONDER_DISABLED_REPLY: &str = "Responder is disabled.";

/// Everything the pipeline accumulated before the final answer.
#[derive(Debug, Clone, Copy)]
pub struct ResponderInput<'a> {
    pub request: &'a str,
    pub history: &'a [String],
    pub evaluation: &'a Evaluation,
    pub decision: &'a RoutingDecision,
    pub skill_result: Option<&'a str>,
}

pub struct ResponderAgent {
    provider: Arc<dyn LlmProvider>,
    prompts: Arc<dyn PromptSource>,
    config: AgentConfig,
}

impl ResponderAgent {
    pub fn new(
        provider: Arc<dyn LlmProvider>,
        prompts: Arc<dyn PromptSource>,
        config: AgentConfig,
    ) -> Self {
        Self {
            provider,
            prompts,
            config,
        }
    }

    fn user_prompt(input: &ResponderInput<'_>) -> Result<String, AgentError> {
        let history = if input.history.is_empty() {
            "no history".to_string()
        } else {
            input.history.join("\n")
        };
        let evaluation = serde_json::to_string(input.evaluation)?;
        let routing = serde_json::to_string(input.decision)?;
        let skill_result = input
            .skill_result
            .filter(|s| !s.is_empty())
            .unwrap_or("no skill result");

        Ok(format!(
            "User request: {}\n\
             Recent messages:\n{history}\n\
             Evaluation: {evaluation}\n\
             Routing: {routing}\n\
             Skill result: {skill_result}\n\
             Generate the final, brief answer in English.",
            input.request
        ))
    }

    /// Produce the final answer text.
    pub async fn run(&self, input: &ResponderInput<'_>) -> Result<String, AgentError> {
        if !self.config.enabled {
            return Ok(RESPONDER_DISABLED_REPLY.to_string());
        }

        let raw = call_model(self, Self::user_prompt(input)?).await?;
        let answer = raw.trim();
        if answer.is_empty() {
            Ok(EMPTY_ANSWER_REPLY.to_string())
        } else {
            Ok(answer.to_string())
        }
    }
}

impl StageAgent for ResponderAgent {
    fn stage(&self) -> &'static str {
        "responder"
    }

    fn system_prompt_name(&self) -> PromptName {
        PromptName::ResponderSystem
    }

    fn provider(&self) -> &Arc<dyn LlmProvider> {
        &self.provider
    }

    fn prompts(&self) -> &Arc<dyn PromptSource> {
        &self.prompts
    }

    fn config(&self) -> AgentConfig {
        self.config
    }

    fn options(&self) -> GenerateOptions {
        GenerateOptions::new().temperature(TEMPERATURE).top_p(TOP_P)
    }
}
