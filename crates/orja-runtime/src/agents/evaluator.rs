//! Difficulty and cloud-need estimation.

use std::sync::Arc;

use orja_core::{extract_json_object, repair_evaluation, Evaluation};

use super::traits::{call_model, AgentError, StageAgent};
use crate::config::AgentConfig;
use crate::prompts::{PromptName, PromptSource};
use crate::providers::{GenerateOptions, LlmProvider};

const TEMPERATURE: f32 = 0.2;
const TOP_P: f32 = 0.9;

pub struct EvaluatorAgent {
    provider: Arc<dyn LlmProvider>,
    prompts: Arc<dyn PromptSource>,
    config: AgentConfig,
    json_mode: bool,
}

impl EvaluatorAgent {
    pub fn new(
        provider: Arc<dyn LlmProvider>,
        prompts: Arc<dyn PromptSource>,
        config: AgentConfig,
        json_mode: bool,
    ) -> Self {
        Self {
            provider,
            prompts,
            config,
            json_mode,
        }
    }

    fn user_prompt(request: &str, history: &[String]) -> String {
        let context = if history.is_empty() {
            "no history".to_string()
        } else {
            history.join("\n")
        };
        format!(
            "Evaluate the request difficulty and whether cloud might be needed later.\n\
             Request: {request}\n\
             Short context:\n{context}\n\
             Respond with only a JSON object."
        )
    }

    /// Evaluate `request` given the recent `history` lines.
    ///
    /// Unparseable output yields the neutral evaluation with reason
    /// `parse_failed`; only a provider failure is an error.
    pub async fn run(&self, request: &str, history: &[String]) -> Result<Evaluation, AgentError> {
        if !self.config.enabled {
            return Ok(Evaluation::neutral(Evaluation::REASON_SKIPPED));
        }

        let raw = call_model(self, Self::user_prompt(request, history)).await?;
        match extract_json_object(&raw) {
            Some(object) => Ok(repair_evaluation(&object)),
            None => {
                tracing::warn!(stage = self.stage(), raw = %raw, "Evaluator JSON parsing failed");
                Ok(Evaluation::neutral(Evaluation::REASON_PARSE_FAILED))
            }
        }
    }
}

impl StageAgent for EvaluatorAgent {
    fn stage(&self) -> &'static str {
        "evaluator"
    }

    fn system_prompt_name(&self) -> PromptName {
        PromptName::EvaluatorSystem
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
        GenerateOptions::new()
            .temperature(TEMPERATURE)
            .top_p(TOP_P)
            .json_mode(self.json_mode)
    }
}
