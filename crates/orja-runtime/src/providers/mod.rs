//! Inference provider abstractions for orja-runtime.
//!
//! One capability, `generate(turns, options) -> text`, with three
//! backends:
//! - [`LlamaCliProvider`]: one blocking `llama-cli` subprocess per call
//! - [`LlamaServerProvider`]: a long-lived `llama-server` process spoken to
//!   over HTTP
//! - [`PlaceholderProvider`]: canned replies for development
//!
//! ## Fallback contract
//!
//! The llama backends never surface backend failures to the caller. A
//! missing binary or model, a timeout, or a transport error is logged and
//! replaced by [`fallback_reply`], so the pipeline can still answer.

use async_trait::async_trait;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use orja_core::{text::prefix_chars, ChatTurn, Role};

mod chatml;
mod cli;
mod factory;
mod placeholder;
mod server;

pub use chatml::{build_prompt, clean_completion, EMPTY_COMPLETION_REPLY, TURN_END, TURN_START};
pub use cli::LlamaCliProvider;
pub use factory::{ProviderFactory, ProviderRegistry};
pub use placeholder::PlaceholderProvider;
pub use server::{probe_tcp, CompletionClient, LlamaServerProvider, ServerStatus};

/// Errors from inference providers.
#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("Required file not found: {what} at {path}")]
    MissingArtifact { what: &'static str, path: PathBuf },

    #[error("Failed to spawn {binary}: {source}")]
    Spawn {
        binary: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Process exited with code {code:?}: {stderr}")]
    ProcessFailed { code: Option<i32>, stderr: String },

    #[error("Timeout after {0:?}")]
    Timeout(Duration),

    #[error("Server at {address} not ready within {timeout:?}")]
    StartupTimeout { address: String, timeout: Duration },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    #[error("Provider not configured: {0}")]
    NotConfigured(String),
}

/// Per-call generation options. `None` means the backend default.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GenerateOptions {
    /// System instruction placed before the conversation
    pub system_prompt: Option<String>,

    /// Maximum tokens to generate
    pub max_tokens: Option<u32>,

    /// Sampling temperature
    pub temperature: Option<f32>,

    /// Nucleus sampling cutoff
    pub top_p: Option<f32>,

    /// Caller expects a JSON object back
    pub json_mode: bool,
}

impl GenerateOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    pub fn max_tokens(mut self, tokens: u32) -> Self {
        self.max_tokens = Some(tokens);
        self
    }

    pub fn temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn top_p(mut self, top_p: f32) -> Self {
        self.top_p = Some(top_p);
        self
    }

    pub fn json_mode(mut self, enabled: bool) -> Self {
        self.json_mode = enabled;
        self
    }
}

/// Provider abstraction allows swapping inference backends.
///
/// Calls are whole-response: no streaming, no partial output.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Generate a reply to the conversation.
    async fn generate(
        &self,
        turns: &[ChatTurn],
        options: &GenerateOptions,
    ) -> Result<String, ProviderError>;

    /// Bring the backend up before the first request.
    ///
    /// Backends that own a long-lived process start it here, so a server
    /// that never becomes ready fails construction instead of every call.
    async fn initialize(&self) -> Result<(), ProviderError> {
        Ok(())
    }

    /// Check if the backend is usable right now.
    async fn health_check(&self) -> bool;

    /// Get provider name for logs.
    fn name(&self) -> &str;
}

/// Content of the most recent user turn, if any.
pub fn last_user_content(turns: &[ChatTurn]) -> Option<&str> {
    turns
        .iter()
        .rev()
        .find(|turn| turn.role() == Role::User)
        .map(|turn| turn.content())
}

/// Labelled reply used when a backend cannot produce a completion.
pub fn fallback_reply(turns: &[ChatTurn]) -> String {
    let user_msg = last_user_content(turns).unwrap_or("unknown question");
    format!(
        "Local response (llama.cpp failed): {}... Providing a brief fallback.",
        prefix_chars(user_msg, 100)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_options_builder() {
        let options = GenerateOptions::new()
            .system_prompt("be brief")
            .max_tokens(80)
            .temperature(0.2)
            .top_p(0.9)
            .json_mode(true);

        assert_eq!(options.system_prompt.as_deref(), Some("be brief"));
        assert_eq!(options.max_tokens, Some(80));
        assert_eq!(options.temperature, Some(0.2));
        assert_eq!(options.top_p, Some(0.9));
        assert!(options.json_mode);
    }

    #[test]
    fn test_fallback_reply_uses_last_user_turn() {
        let turns = vec![
            ChatTurn::user("first question"),
            ChatTurn::assistant("first answer"),
            ChatTurn::user("second question"),
        ];
        let reply = fallback_reply(&turns);
        assert!(reply.starts_with("Local response (llama.cpp failed): second question"));
        assert!(reply.ends_with("Providing a brief fallback."));
    }

    #[test]
    fn test_fallback_reply_caps_length() {
        let turns = vec![ChatTurn::user("a".repeat(500))];
        let reply = fallback_reply(&turns);
        assert!(reply.contains(&"a".repeat(100)));
        assert!(!reply.contains(&"a".repeat(101)));
    }

    #[test]
    fn test_fallback_reply_without_turns() {
        assert!(fallback_reply(&[]).contains("unknown question"));
    }
}
