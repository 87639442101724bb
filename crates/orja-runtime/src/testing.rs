//! Test doubles shared by the runtime's unit tests.

use async_trait::async_trait;
use parking_lot::Mutex;

use orja_core::ChatTurn;

use crate::providers::{last_user_content, GenerateOptions, LlmProvider, ProviderError};

/// Which agent a provider call came from, judged by its user prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Stage {
    Evaluator,
    Router,
    Responder,
    Other,
}

impl Stage {
    fn of(user_prompt: &str) -> Self {
        if user_prompt.starts_with("Evaluate the request") {
            Stage::Evaluator
        } else if user_prompt.starts_with("Available skills:") {
            Stage::Router
        } else if user_prompt.starts_with("User request:") {
            Stage::Responder
        } else {
            Stage::Other
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct RecordedCall {
    pub stage: Stage,
    pub user_prompt: String,
    pub options: GenerateOptions,
}

type Script = dyn Fn(Stage, &str) -> Result<String, ProviderError> + Send + Sync;

/// Provider whose reply is computed by a closure and whose calls are recorded.
pub(crate) struct ScriptedProvider {
    script: Box<Script>,
    calls: Mutex<Vec<RecordedCall>>,
}

impl ScriptedProvider {
    pub fn new<F>(script: F) -> Self
    where
        F: Fn(Stage, &str) -> Result<String, ProviderError> + Send + Sync + 'static,
    {
        Self {
            script: Box::new(script),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Always answer with `reply`.
    pub fn fixed(reply: &str) -> Self {
        let reply = reply.to_string();
        Self::new(move |_, _| Ok(reply.clone()))
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().clone()
    }

    pub fn calls_for(&self, stage: Stage) -> usize {
        self.calls.lock().iter().filter(|c| c.stage == stage).count()
    }
}

#[async_trait]
impl LlmProvider for ScriptedProvider {
    async fn generate(
        &self,
        turns: &[ChatTurn],
        options: &GenerateOptions,
    ) -> Result<String, ProviderError> {
        let user_prompt = last_user_content(turns).unwrap_or_default().to_string();
        let stage = Stage::of(&user_prompt);
        self.calls.lock().push(RecordedCall {
            stage,
            user_prompt: user_prompt.clone(),
            options: options.clone(),
        });
        (self.script)(stage, &user_prompt)
    }

    async fn health_check(&self) -> bool {
        true
    }

    fn name(&self) -> &str {
        "scripted"
    }
}
