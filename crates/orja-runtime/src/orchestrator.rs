//! Request pipeline orchestrator.
//!
//! One request runs strictly in sequence:
//! `load history -> evaluate -> route -> (skill)? -> respond`.
//!
//! Every stage is isolated: a failure is logged, replaced by a named
//! fallback value and recorded as a failed audit event, and the request
//! continues. The worst a caller can see is the fixed apology reply.

use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;

use orja_core::{extract_minutes, Evaluation, HeuristicRouter, PipelineEvent, RoutingDecision};

use crate::agents::{EvaluatorAgent, ResponderAgent, ResponderInput, RouterAgent};
use crate::config::OrjaConfig;
use crate::memory::{InMemoryStore, MemoryError, MemoryStore, SqliteMemoryStore};
use crate::prompts::{FilePromptLoader, PromptError, PromptName, PromptSource, StaticPrompts};
use crate::providers::{LlmProvider, ProviderError, ProviderRegistry};
use crate::resilience::{run_stage, StageOutcome};
use crate::skills::{SkillError, SkillRegistry, SkillSet};

/// Reply when the pipeline is switched off.
pub const PIPELINE_DISABLED_REPLY: &str = "Pipeline is disabled.";

/// Skill result recorded when a skill fails.
pub const SKILL_FAILED_REPLY: &str = "Skill execution failed.";

/// Skill result when routing named a skill the registry does not hold.
pub const SKILL_NOT_FOUND_REPLY: &str = "Skill not found.";

/// Reply when the responder stage fails.
pub const APOLOGY_REPLY: &str = "An error occurred while generating the response.";

/// Errors assembling a pipeline. Handling a request never fails.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Provider not configured: {0}")]
    ProviderNotConfigured(String),

    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("Prompt error: {0}")]
    Prompt(#[from] PromptError),

    #[error("Memory error: {0}")]
    Memory(#[from] MemoryError),
}

/// The request pipeline.
pub struct Pipeline {
    enabled: bool,
    max_history: usize,
    timer_skill: String,
    provider: Arc<dyn LlmProvider>,
    memory: Arc<dyn MemoryStore>,
    skills: Arc<dyn SkillRegistry>,
    prompts: Arc<dyn PromptSource>,
    heuristics: HeuristicRouter,
    evaluator: EvaluatorAgent,
    router: RouterAgent,
    responder: ResponderAgent,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("enabled", &self.enabled)
            .field("max_history", &self.max_history)
            .field("provider", &self.provider.name())
            .field("skills", &self.skills.names())
            .finish()
    }
}

impl Pipeline {
    pub fn builder() -> PipelineBuilder {
        PipelineBuilder::new()
    }

    /// Assemble the pipeline described by `config`: the configured backend,
    /// prompt files and SQLite store.
    ///
    /// A server backend is started here and a startup failure is returned.
    pub async fn from_config(config: &OrjaConfig) -> Result<Self, PipelineError> {
        let provider = ProviderRegistry::with_defaults()
            .create_from_config(&config.llm)
            .await?;
        let prompts = FilePromptLoader::new(&config.prompts.dir, config.prompts.reload)?;
        let memory = SqliteMemoryStore::open(&config.database.path)?;

        Self::builder()
            .config(config.clone())
            .provider(provider)
            .prompts(Arc::new(prompts))
            .memory(Arc::new(memory))
            .build()
    }

    pub fn provider(&self) -> &Arc<dyn LlmProvider> {
        &self.provider
    }

    pub fn memory(&self) -> &Arc<dyn MemoryStore> {
        &self.memory
    }

    /// Turn one line of user text into the final reply.
    pub async fn handle_request(&self, text: &str, session_id: &str) -> String {
        if !self.enabled {
            return PIPELINE_DISABLED_REPLY.to_string();
        }

        let history = self.load_history(session_id).await;

        let evaluation = run_stage(
            "evaluator",
            self.evaluator.run(text, &history),
            || Evaluation::neutral(Evaluation::REASON_ERROR),
        )
        .await;
        self.record_outcome(session_id, "evaluator", text, &evaluation, to_json)
            .await;
        let evaluation = evaluation.into_value();

        let decision = self.route(text, session_id).await;

        let skill_result = match decision.selected_skill() {
            Some(skill) => Some(self.run_skill(skill, &decision, text, session_id).await),
            None => None,
        };

        let input = ResponderInput {
            request: text,
            history: &history,
            evaluation: &evaluation,
            decision: &decision,
            skill_result: skill_result.as_deref(),
        };
        let reply = run_stage("responder", self.responder.run(&input), || {
            APOLOGY_REPLY.to_string()
        })
        .await;
        self.record_outcome(session_id, "responder", text, &reply, String::clone)
            .await;

        reply.into_value()
    }

    /// Run a store operation on the blocking pool; stores do file I/O.
    async fn with_memory<T, F>(&self, op: F) -> Result<T, MemoryError>
    where
        T: Send + 'static,
        F: FnOnce(&dyn MemoryStore) -> Result<T, MemoryError> + Send + 'static,
    {
        let memory = self.memory.clone();
        tokio::task::spawn_blocking(move || op(memory.as_ref()))
            .await
            .map_err(|e| MemoryError::Unavailable(e.to_string()))?
    }

    /// Recent turns as `role: content` lines, oldest first.
    async fn load_history(&self, session_id: &str) -> Vec<String> {
        let session = session_id.to_string();
        let limit = self.max_history;
        match self
            .with_memory(move |memory| memory.recent_messages(&session, limit))
            .await
        {
            Ok(messages) => messages.iter().rev().map(|m| m.history_line()).collect(),
            Err(e) => {
                tracing::warn!(session = session_id, error = %e, "Unable to load history");
                Vec::new()
            }
        }
    }

    /// Heuristic routing first; the model router only when no rule fires.
    async fn route(&self, text: &str, session_id: &str) -> RoutingDecision {
        if let Some(decision) = self.heuristics.route(text) {
            tracing::info!(
                stage = "router_manual",
                skill = decision.skill.as_deref().unwrap_or_default(),
                "Heuristic route"
            );
            let outcome = StageOutcome::Completed {
                value: decision,
                latency_ms: 0.0,
            };
            self.record_outcome(session_id, "router_manual", text, &outcome, to_json)
                .await;
            return outcome.into_value();
        }

        let outcome = run_stage("router", self.route_with_model(text), RoutingDecision::chat).await;
        self.record_outcome(session_id, "router", text, &outcome, to_json)
            .await;
        outcome.into_value()
    }

    async fn route_with_model(
        &self,
        text: &str,
    ) -> Result<RoutingDecision, crate::agents::AgentError> {
        let mut summaries = self.prompts.get(PromptName::SkillSummaries);
        if summaries.trim().is_empty() {
            summaries = self.skills.summaries();
        }

        let mut decision = self
            .router
            .run(text, &self.skills.names(), &summaries)
            .await?;

        // second chance for a timer the model chose without a duration
        if decision.selected_skill() == Some(self.timer_skill.as_str()) && decision.minutes().is_none() {
            if let Some(minutes) = extract_minutes(text) {
                decision
                    .arguments
                    .insert(RoutingDecision::MINUTES_ARG.to_string(), Value::from(minutes));
            }
        }
        Ok(decision)
    }

    async fn run_skill(
        &self,
        skill: &str,
        decision: &RoutingDecision,
        text: &str,
        session_id: &str,
    ) -> String {
        if !self.skills.contains(skill) {
            tracing::warn!(skill = skill, "Routed to an unregistered skill");
            return SKILL_NOT_FOUND_REPLY.to_string();
        }

        let step = format!("skill_{skill}");
        let outcome = run_stage(
            &step,
            self.invoke_skill(skill, text, decision),
            || SKILL_FAILED_REPLY.to_string(),
        )
        .await;
        self.record_outcome(session_id, &step, text, &outcome, String::clone)
            .await;
        outcome.into_value()
    }

    /// Invoke a skill on the blocking pool; a panic becomes a skill failure.
    async fn invoke_skill(
        &self,
        skill: &str,
        text: &str,
        decision: &RoutingDecision,
    ) -> Result<String, SkillError> {
        let skills = self.skills.clone();
        let name = skill.to_string();
        let request = text.to_string();
        let arguments = decision.arguments.clone();

        tokio::task::spawn_blocking(move || skills.invoke(&name, &request, &arguments))
            .await
            .unwrap_or_else(|e| {
                Err(SkillError::Failed {
                    skill: skill.to_string(),
                    message: if e.is_panic() {
                        "skill panicked".to_string()
                    } else {
                        e.to_string()
                    },
                })
            })
    }

    /// Append one audit event; a storage failure is logged and dropped.
    async fn record_outcome<T>(
        &self,
        session_id: &str,
        step: &str,
        input: &str,
        outcome: &StageOutcome<T>,
        render: impl Fn(&T) -> String,
    ) {
        let output = match outcome.error() {
            Some(error) => error.to_string(),
            None => render(outcome.value()),
        };
        if let Some(latency_ms) = outcome.latency_ms() {
            tracing::info!(stage = step, latency_ms = latency_ms, output = %output, "Stage completed");
        }

        let event = PipelineEvent::new(
            session_id,
            step,
            input,
            &output,
            outcome.is_completed(),
            outcome.latency_ms(),
        );
        if let Err(e) = self
            .with_memory(move |memory| memory.append_event(&event))
            .await
        {
            tracing::warn!(stage = step, error = %e, "Failed to persist pipeline event");
        }
    }
}

fn to_json<T: Serialize>(value: &T) -> String {
    serde_json::to_string(value).unwrap_or_else(|e| e.to_string())
}

/// Builder for [`Pipeline`].
pub struct PipelineBuilder {
    config: OrjaConfig,
    provider: Option<Arc<dyn LlmProvider>>,
    memory: Option<Arc<dyn MemoryStore>>,
    skills: Option<Arc<dyn SkillRegistry>>,
    prompts: Option<Arc<dyn PromptSource>>,
}

impl PipelineBuilder {
    pub fn new() -> Self {
        Self {
            config: OrjaConfig::default(),
            provider: None,
            memory: None,
            skills: None,
            prompts: None,
        }
    }

    /// Set the configuration (pipeline, agents, routing and llm sections).
    pub fn config(mut self, config: OrjaConfig) -> Self {
        self.config = config;
        self
    }

    pub fn provider(mut self, provider: Arc<dyn LlmProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    /// Defaults to an in-memory store.
    pub fn memory(mut self, memory: Arc<dyn MemoryStore>) -> Self {
        self.memory = Some(memory);
        self
    }

    /// Defaults to the built-in skills.
    pub fn skills(mut self, skills: Arc<dyn SkillRegistry>) -> Self {
        self.skills = Some(skills);
        self
    }

    /// Defaults to the built-in prompts.
    pub fn prompts(mut self, prompts: Arc<dyn PromptSource>) -> Self {
        self.prompts = Some(prompts);
        self
    }

    pub fn build(self) -> Result<Pipeline, PipelineError> {
        let provider = self
            .provider
            .ok_or_else(|| PipelineError::ProviderNotConfigured("No provider set".to_string()))?;
        let memory = self
            .memory
            .unwrap_or_else(|| Arc::new(InMemoryStore::new()));
        let skills = self
            .skills
            .unwrap_or_else(|| Arc::new(SkillSet::with_builtins()));
        let prompts = self
            .prompts
            .unwrap_or_else(|| Arc::new(StaticPrompts::defaults()));

        let config = self.config;
        let json_mode = config.llm.json_strict;

        Ok(Pipeline {
            enabled: config.pipeline.enabled,
            max_history: config.pipeline.max_history_messages,
            timer_skill: config.routing.timer_skill.clone(),
            evaluator: EvaluatorAgent::new(
                provider.clone(),
                prompts.clone(),
                config.agents.evaluator,
                json_mode,
            ),
            router: RouterAgent::new(
                provider.clone(),
                prompts.clone(),
                config.agents.router,
                json_mode,
            ),
            responder: ResponderAgent::new(provider.clone(), prompts.clone(), config.agents.responder),
            heuristics: HeuristicRouter::new(config.routing),
            provider,
            memory,
            skills,
            prompts,
        })
    }
}

impl Default for PipelineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::skills::{Skill, SkillArguments};
    use crate::testing::{ScriptedProvider, Stage};
    use chrono::Utc;
    use orja_core::{DecisionSource, Message, Role};

    const EVAL_JSON: &str = r#"{"difficulty": "easy", "needs_cloud": false, "reason": "simple"}"#;

    /// Valid JSON for the evaluator, plain chat for the router.
    fn happy_provider() -> Arc<ScriptedProvider> {
        Arc::new(ScriptedProvider::new(|stage, _| match stage {
            Stage::Evaluator => Ok(EVAL_JSON.to_string()),
            Stage::Router => Ok(r#"{"action": "chat", "confidence": 0.2}"#.to_string()),
            _ => Ok("final answer".to_string()),
        }))
    }

    fn pipeline(provider: Arc<ScriptedProvider>, memory: Arc<InMemoryStore>) -> Pipeline {
        Pipeline::builder()
            .provider(provider)
            .memory(memory)
            .build()
            .unwrap()
    }

    fn step_names(memory: &InMemoryStore) -> Vec<String> {
        memory.events().into_iter().map(|e| e.step_name).collect()
    }

    /// The routing JSON the responder was shown.
    fn responder_routing(provider: &ScriptedProvider) -> RoutingDecision {
        let call = provider
            .calls()
            .into_iter()
            .find(|c| c.stage == Stage::Responder)
            .unwrap();
        let line = call
            .user_prompt
            .lines()
            .find_map(|l| l.strip_prefix("Routing: "))
            .unwrap()
            .to_string();
        serde_json::from_str(&line).unwrap()
    }

    #[tokio::test]
    async fn test_help_prefix_skips_model_router() {
        let provider = happy_provider();
        let memory = Arc::new(InMemoryStore::new());
        let reply = pipeline(provider.clone(), memory.clone())
            .handle_request("help", "s1")
            .await;

        assert_eq!(reply, "final answer");
        assert_eq!(provider.calls_for(Stage::Router), 0);

        let decision = responder_routing(&provider);
        assert_eq!(decision.skill.as_deref(), Some("help"));
        assert_eq!(decision.source, DecisionSource::Manual);
        assert_eq!(decision.confidence, 1.0);

        assert_eq!(
            step_names(&memory),
            vec!["evaluator", "router_manual", "skill_help", "responder"]
        );
        let manual = &memory.events()[1];
        assert_eq!(manual.latency_ms, Some(0.0));
        assert!(manual.success);
    }

    #[tokio::test]
    async fn test_timer_keyword_extracts_minutes() {
        let provider = happy_provider();
        let memory = Arc::new(InMemoryStore::new());
        pipeline(provider.clone(), memory.clone())
            .handle_request("set a timer for 10 minutes", "s1")
            .await;

        let decision = responder_routing(&provider);
        assert_eq!(decision.skill.as_deref(), Some("timer"));
        assert_eq!(decision.minutes(), Some(10));
        assert_eq!(provider.calls_for(Stage::Router), 0);

        let skill_event = &memory.events()[2];
        assert_eq!(skill_event.step_name, "skill_timer");
        assert_eq!(skill_event.output_summary, "OK, timer set for 10 min (placeholder).");
    }

    #[tokio::test]
    async fn test_evaluator_prose_is_handled_parse_failure() {
        let provider = Arc::new(ScriptedProvider::new(|stage, _| match stage {
            Stage::Evaluator => Ok("This is an easy one, no cloud needed.".to_string()),
            Stage::Router => Ok(r#"{"action": "chat"}"#.to_string()),
            _ => Ok("answer".to_string()),
        }));
        let memory = Arc::new(InMemoryStore::new());
        pipeline(provider.clone(), memory.clone())
            .handle_request("tell me a joke", "s1")
            .await;

        let evaluator_event = &memory.events()[0];
        assert_eq!(evaluator_event.step_name, "evaluator");
        assert!(evaluator_event.success);
        let evaluation: Evaluation = serde_json::from_str(&evaluator_event.output_summary).unwrap();
        assert_eq!(evaluation, Evaluation::neutral(Evaluation::REASON_PARSE_FAILED));
    }

    #[tokio::test]
    async fn test_responder_failure_returns_apology() {
        let provider = Arc::new(ScriptedProvider::new(|stage, _| match stage {
            Stage::Responder => Err(ProviderError::Transport("connection reset".to_string())),
            Stage::Evaluator => Ok(EVAL_JSON.to_string()),
            _ => Ok(r#"{"action": "chat"}"#.to_string()),
        }));
        let memory = Arc::new(InMemoryStore::new());
        let reply = pipeline(provider, memory.clone())
            .handle_request("tell me a joke", "s1")
            .await;

        assert_eq!(reply, APOLOGY_REPLY);
        let events = memory.events();
        let responder = events.last().unwrap();
        assert_eq!(responder.step_name, "responder");
        assert!(!responder.success);
        assert_eq!(responder.latency_ms, None);
        assert!(responder.output_summary.contains("connection reset"));
    }

    #[tokio::test]
    async fn test_evaluator_failure_continues_with_error_reason() {
        let provider = Arc::new(ScriptedProvider::new(|stage, _| match stage {
            Stage::Evaluator => Err(ProviderError::Timeout(std::time::Duration::from_secs(1))),
            Stage::Router => Ok(r#"{"action": "chat"}"#.to_string()),
            _ => Ok("still answered".to_string()),
        }));
        let memory = Arc::new(InMemoryStore::new());
        let reply = pipeline(provider.clone(), memory.clone())
            .handle_request("tell me a joke", "s1")
            .await;

        assert_eq!(reply, "still answered");
        let evaluator = &memory.events()[0];
        assert!(!evaluator.success);
        assert_eq!(evaluator.latency_ms, None);

        let responder_prompt = provider
            .calls()
            .into_iter()
            .find(|c| c.stage == Stage::Responder)
            .unwrap()
            .user_prompt;
        assert!(responder_prompt.contains("\"reason\":\"error\""));
    }

    #[tokio::test]
    async fn test_router_failure_degrades_to_chat() {
        let provider = Arc::new(ScriptedProvider::new(|stage, _| match stage {
            Stage::Router => Err(ProviderError::Transport("refused".to_string())),
            Stage::Evaluator => Ok(EVAL_JSON.to_string()),
            _ => Ok("answer".to_string()),
        }));
        let memory = Arc::new(InMemoryStore::new());
        pipeline(provider.clone(), memory.clone())
            .handle_request("tell me a joke", "s1")
            .await;

        assert_eq!(responder_routing(&provider), RoutingDecision::chat());
        assert_eq!(step_names(&memory), vec!["evaluator", "router", "responder"]);
        assert!(!memory.events()[1].success);
    }

    #[tokio::test]
    async fn test_model_timer_gets_second_chance_minutes() {
        let provider = Arc::new(ScriptedProvider::new(|stage, _| match stage {
            Stage::Evaluator => Ok(EVAL_JSON.to_string()),
            Stage::Router => {
                Ok(r#"{"action": "skill", "skill": "timer", "confidence": 0.9}"#.to_string())
            }
            _ => Ok("done".to_string()),
        }));
        let memory = Arc::new(InMemoryStore::new());
        pipeline(provider.clone(), memory.clone())
            .handle_request("remind me in 5 min", "s1")
            .await;

        assert_eq!(provider.calls_for(Stage::Router), 1);
        let decision = responder_routing(&provider);
        assert_eq!(decision.source, DecisionSource::Model);
        assert_eq!(decision.minutes(), Some(5));
        assert_eq!(
            step_names(&memory),
            vec!["evaluator", "router", "skill_timer", "responder"]
        );
    }

    struct BrokenSkill;

    impl Skill for BrokenSkill {
        fn name(&self) -> &str {
            "broken"
        }

        fn summary(&self) -> &str {
            "always fails"
        }

        fn invoke(&self, _request: &str, _arguments: &SkillArguments) -> Result<String, SkillError> {
            Err(SkillError::Failed {
                skill: "broken".to_string(),
                message: "device unavailable".to_string(),
            })
        }
    }

    #[tokio::test]
    async fn test_skill_failure_is_recorded_and_absorbed() {
        let provider = Arc::new(ScriptedProvider::new(|stage, _| match stage {
            Stage::Evaluator => Ok(EVAL_JSON.to_string()),
            Stage::Router => {
                Ok(r#"{"action": "skill", "skill": "broken", "confidence": 0.8}"#.to_string())
            }
            _ => Ok("sorry about that".to_string()),
        }));
        let mut skills = SkillSet::with_builtins();
        skills.register(Arc::new(BrokenSkill));
        let memory = Arc::new(InMemoryStore::new());

        let reply = Pipeline::builder()
            .provider(provider.clone())
            .memory(memory.clone())
            .skills(Arc::new(skills))
            .build()
            .unwrap()
            .handle_request("use the broken thing", "s1")
            .await;

        assert_eq!(reply, "sorry about that");
        let skill_event = &memory.events()[2];
        assert_eq!(skill_event.step_name, "skill_broken");
        assert!(!skill_event.success);

        let responder_prompt = provider.calls().last().unwrap().user_prompt.clone();
        assert!(responder_prompt.contains(&format!("Skill result: {SKILL_FAILED_REPLY}")));
    }

    struct PanickingSkill;

    impl Skill for PanickingSkill {
        fn name(&self) -> &str {
            "fragile"
        }

        fn summary(&self) -> &str {
            "panics on use"
        }

        fn invoke(&self, _request: &str, _arguments: &SkillArguments) -> Result<String, SkillError> {
            panic!("index out of bounds");
        }
    }

    #[tokio::test]
    async fn test_skill_panic_is_contained() {
        let provider = Arc::new(ScriptedProvider::new(|stage, _| match stage {
            Stage::Evaluator => Ok(EVAL_JSON.to_string()),
            Stage::Router => {
                Ok(r#"{"action": "skill", "skill": "fragile", "confidence": 0.9}"#.to_string())
            }
            _ => Ok("recovered".to_string()),
        }));
        let mut skills = SkillSet::with_builtins();
        skills.register(Arc::new(PanickingSkill));
        let memory = Arc::new(InMemoryStore::new());

        let reply = Pipeline::builder()
            .provider(provider.clone())
            .memory(memory.clone())
            .skills(Arc::new(skills))
            .build()
            .unwrap()
            .handle_request("use the fragile thing", "s1")
            .await;

        assert_eq!(reply, "recovered");
        assert_eq!(
            step_names(&memory),
            vec!["evaluator", "router", "skill_fragile", "responder"]
        );
        let skill_event = &memory.events()[2];
        assert!(!skill_event.success);
        assert!(skill_event.output_summary.contains("skill panicked"));

        let responder_prompt = provider.calls().last().unwrap().user_prompt.clone();
        assert!(responder_prompt.contains(&format!("Skill result: {SKILL_FAILED_REPLY}")));
    }

    #[tokio::test]
    async fn test_disabled_pipeline_short_circuits() {
        let provider = happy_provider();
        let memory = Arc::new(InMemoryStore::new());
        let mut config = OrjaConfig::default();
        config.pipeline.enabled = false;

        let reply = Pipeline::builder()
            .config(config)
            .provider(provider.clone())
            .memory(memory.clone())
            .build()
            .unwrap()
            .handle_request("help", "s1")
            .await;

        assert_eq!(reply, PIPELINE_DISABLED_REPLY);
        assert!(provider.calls().is_empty());
        assert!(memory.events().is_empty());
    }

    #[tokio::test]
    async fn test_history_is_session_scoped_and_chronological() {
        let provider = happy_provider();
        let memory = Arc::new(InMemoryStore::new());
        let now = Utc::now();
        memory.append_message(Role::User, "too old", "s1", now).unwrap();
        memory.append_message(Role::User, "earlier question", "s1", now).unwrap();
        memory.append_message(Role::Assistant, "earlier answer", "s1", now).unwrap();
        memory.append_message(Role::User, "someone else", "s2", now).unwrap();

        let mut config = OrjaConfig::default();
        config.pipeline.max_history_messages = 2;
        Pipeline::builder()
            .config(config)
            .provider(provider.clone())
            .memory(memory)
            .build()
            .unwrap()
            .handle_request("and now?", "s1")
            .await;

        let evaluator_prompt = provider.calls()[0].user_prompt.clone();
        assert!(evaluator_prompt
            .contains("Short context:\nuser: earlier question\nassistant: earlier answer\n"));
        assert!(!evaluator_prompt.contains("too old"));
        assert!(!evaluator_prompt.contains("someone else"));
    }

    struct FailingStore;

    impl MemoryStore for FailingStore {
        fn append_message(
            &self,
            _role: Role,
            _content: &str,
            _session_id: &str,
            _timestamp: chrono::DateTime<Utc>,
        ) -> Result<i64, MemoryError> {
            Err(MemoryError::Unavailable("disk full".to_string()))
        }

        fn append_event(&self, _event: &PipelineEvent) -> Result<(), MemoryError> {
            Err(MemoryError::Unavailable("disk full".to_string()))
        }

        fn recent_messages(
            &self,
            _session_id: &str,
            _limit: usize,
        ) -> Result<Vec<Message>, MemoryError> {
            Err(MemoryError::Unavailable("disk full".to_string()))
        }

        fn recent_events(
            &self,
            _session_id: &str,
            _limit: usize,
        ) -> Result<Vec<PipelineEvent>, MemoryError> {
            Err(MemoryError::Unavailable("disk full".to_string()))
        }
    }

    #[tokio::test]
    async fn test_memory_failures_do_not_abort() {
        let provider = happy_provider();
        let reply = Pipeline::builder()
            .provider(provider.clone())
            .memory(Arc::new(FailingStore))
            .build()
            .unwrap()
            .handle_request("tell me a joke", "s1")
            .await;

        assert_eq!(reply, "final answer");
        assert!(provider.calls()[0].user_prompt.contains("no history"));
    }

    /// Delegates to an in-memory store and notes which thread each call ran on.
    #[derive(Default)]
    struct ThreadTrackingStore {
        inner: InMemoryStore,
        threads: parking_lot::Mutex<Vec<std::thread::ThreadId>>,
    }

    impl ThreadTrackingStore {
        fn note(&self) {
            self.threads.lock().push(std::thread::current().id());
        }
    }

    impl MemoryStore for ThreadTrackingStore {
        fn append_message(
            &self,
            role: Role,
            content: &str,
            session_id: &str,
            timestamp: chrono::DateTime<Utc>,
        ) -> Result<i64, MemoryError> {
            self.note();
            self.inner.append_message(role, content, session_id, timestamp)
        }

        fn append_event(&self, event: &PipelineEvent) -> Result<(), MemoryError> {
            self.note();
            self.inner.append_event(event)
        }

        fn recent_messages(&self, session_id: &str, limit: usize) -> Result<Vec<Message>, MemoryError> {
            self.note();
            self.inner.recent_messages(session_id, limit)
        }

        fn recent_events(
            &self,
            session_id: &str,
            limit: usize,
        ) -> Result<Vec<PipelineEvent>, MemoryError> {
            self.note();
            self.inner.recent_events(session_id, limit)
        }
    }

    #[tokio::test]
    async fn test_store_calls_leave_the_runtime_thread() {
        let store = Arc::new(ThreadTrackingStore::default());
        Pipeline::builder()
            .provider(happy_provider())
            .memory(store.clone())
            .build()
            .unwrap()
            .handle_request("tell me a joke", "s1")
            .await;

        let runtime_thread = std::thread::current().id();
        let threads = store.threads.lock().clone();
        // history read plus evaluator, router, responder events
        assert_eq!(threads.len(), 4);
        assert!(threads.iter().all(|id| *id != runtime_thread));
    }

    #[tokio::test]
    async fn test_sqlite_store_records_pipeline() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(SqliteMemoryStore::open(dir.path().join("orja.db")).unwrap());
        let reply = Pipeline::builder()
            .provider(happy_provider())
            .memory(store.clone())
            .build()
            .unwrap()
            .handle_request("tell me a joke", "s1")
            .await;

        assert_eq!(reply, "final answer");
        let steps: Vec<_> = store
            .recent_events("s1", 10)
            .unwrap()
            .into_iter()
            .rev()
            .map(|e| e.step_name)
            .collect();
        assert_eq!(steps, vec!["evaluator", "router", "responder"]);
    }

    #[tokio::test]
    async fn test_long_input_truncated_in_audit() {
        let provider = happy_provider();
        let memory = Arc::new(InMemoryStore::new());
        let long = "why ".repeat(300);
        pipeline(provider, memory.clone())
            .handle_request(&long, "s1")
            .await;

        for event in memory.events() {
            assert!(event.input_summary.chars().count() <= orja_core::INPUT_SUMMARY_LIMIT);
            assert!(event.output_summary.chars().count() <= orja_core::OUTPUT_SUMMARY_LIMIT);
        }
    }

    #[test]
    fn test_build_without_provider_fails() {
        assert!(matches!(
            Pipeline::builder().build(),
            Err(PipelineError::ProviderNotConfigured(_))
        ));
    }
}
