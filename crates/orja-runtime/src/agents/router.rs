//! Model-backed skill routing.

use std::sync::Arc;

use orja_core::{extract_json_object, repair_routing, RoutingDecision};

use super::traits::{call_model, AgentError, StageAgent};
use crate::config::AgentConfig;
use crate::prompts::{PromptName, PromptSource};
use crate::providers::{GenerateOptions, LlmProvider};

const TEMPERATURE: f32 = 0.25;
const TOP_P: f32 = 0.9;

pub struct RouterAgent {
    provider: Arc<dyn LlmProvider>,
    prompts: Arc<dyn PromptSource>,
    config: AgentConfig,
    json_mode: bool,
}

impl RouterAgent {
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

    fn user_prompt(request: &str, skills: &[String], summaries: &str) -> String {
        let mut sorted: Vec<&str> = skills.iter().map(String::as_str).collect();
        sorted.sort_unstable();
        format!(
            "Available skills: {}\n\
             Skill descriptions:\n{summaries}\n\
             Request: {request}\n\
             Choose a skill or chat. Return JSON only.",
            sorted.join(", ")
        )
    }

    /// Choose between chat and one of `skills` for `request`.
    ///
    /// The returned decision always satisfies the routing invariant: a
    /// skill action names one of `skills`, a chat action names none.
    pub async fn run(
        &self,
        request: &str,
        skills: &[String],
        summaries: &str,
    ) -> Result<RoutingDecision, AgentError> {
        if !self.config.enabled {
            return Ok(RoutingDecision::chat());
        }

        let raw = call_model(self, Self::user_prompt(request, skills, summaries)).await?;
        match extract_json_object(&raw) {
            Some(object) => Ok(repair_routing(&object, skills)),
            None => {
                tracing::warn!(stage = self.stage(), raw = %raw, "Router JSON parsing failed");
                Ok(RoutingDecision::chat())
            }
        }
    }
}

impl StageAgent for RouterAgent {
    fn stage(&self) -> &'static str {
        "router"
    }

    fn system_prompt_name(&self) -> PromptName {
        PromptName::RouterSystem
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
