//! `llama-cli` subprocess backend.
//!
//! Every call spawns the binary once with the flattened prompt and the
//! sampling parameters as flags, waits for it under a hard timeout, and
//! cleans the echoed prompt off stdout.

use async_trait::async_trait;
use std::process::Stdio;
use tokio::process::Command;

use orja_core::ChatTurn;

use super::chatml::{build_prompt, clean_completion, history_window, Sampling};
use super::{fallback_reply, GenerateOptions, LlmProvider, ProviderError};
use crate::config::{LlamaCppConfig, LlmConfig};

/// Provider that runs `llama-cli` as a blocking subprocess per request.
#[derive(Debug, Clone)]
pub struct LlamaCliProvider {
    config: LlamaCppConfig,
    system_prompt: String,
    history_messages: usize,
}

impl LlamaCliProvider {
    pub fn new(
        config: LlamaCppConfig,
        system_prompt: impl Into<String>,
        history_messages: usize,
    ) -> Self {
        Self {
            config,
            system_prompt: system_prompt.into(),
            history_messages,
        }
    }

    pub fn from_config(llm: &LlmConfig) -> Self {
        Self::new(
            llm.llama_cpp.clone(),
            llm.system_prompt.clone(),
            llm.history_messages,
        )
    }

    /// Command-line flags for one invocation.
    fn command_args(&self, prompt: &str, sampling: &Sampling) -> Vec<String> {
        vec![
            "--model".to_string(),
            self.config.model_path.display().to_string(),
            "--prompt".to_string(),
            prompt.to_string(),
            "--threads".to_string(),
            self.config.threads.to_string(),
            "--ctx-size".to_string(),
            self.config.ctx_size.to_string(),
            "--n-predict".to_string(),
            sampling.max_tokens.to_string(),
            "--temp".to_string(),
            sampling.temperature.to_string(),
            "--top-p".to_string(),
            sampling.top_p.to_string(),
            "--repeat-penalty".to_string(),
            sampling.repeat_penalty.to_string(),
            "--batch-size".to_string(),
            self.config.batch_size.to_string(),
            "--simple-io".to_string(),
        ]
    }

    /// Run the binary once and return trimmed stdout.
    async fn run(&self, prompt: &str, sampling: &Sampling) -> Result<String, ProviderError> {
        if !self.config.bin_path.exists() {
            return Err(ProviderError::MissingArtifact {
                what: "llama-cli binary",
                path: self.config.bin_path.clone(),
            });
        }
        if !self.config.model_path.exists() {
            return Err(ProviderError::MissingArtifact {
                what: "model file",
                path: self.config.model_path.clone(),
            });
        }

        tracing::debug!(
            binary = %self.config.bin_path.display(),
            max_tokens = sampling.max_tokens,
            "Running llama-cli"
        );

        let mut command = Command::new(&self.config.bin_path);
        command
            .args(self.command_args(prompt, sampling))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        // dropping the output future on timeout kills the child
        let output = tokio::time::timeout(self.config.timeout, command.output())
            .await
            .map_err(|_| ProviderError::Timeout(self.config.timeout))?
            .map_err(|source| ProviderError::Spawn {
                binary: self.config.bin_path.clone(),
                source,
            })?;

        if !output.status.success() {
            return Err(ProviderError::ProcessFailed {
                code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    /// Generate without the fallback wrapper.
    pub async fn try_generate(
        &self,
        turns: &[ChatTurn],
        options: &GenerateOptions,
    ) -> Result<String, ProviderError> {
        let window = history_window(turns, self.history_messages);
        let system_prompt = options
            .system_prompt
            .as_deref()
            .unwrap_or(&self.system_prompt);
        let prompt = build_prompt(system_prompt, window);
        let sampling = Sampling::resolve(options, &self.config);

        let raw = self.run(&prompt, &sampling).await?;
        Ok(clean_completion(&raw, &prompt))
    }
}

#[async_trait]
impl LlmProvider for LlamaCliProvider {
    async fn generate(
        &self,
        turns: &[ChatTurn],
        options: &GenerateOptions,
    ) -> Result<String, ProviderError> {
        match self.try_generate(turns, options).await {
            Ok(text) => Ok(text),
            Err(e) => {
                tracing::error!(provider = "llama_cpp_cli", error = %e, "Generation failed, using fallback reply");
                Ok(fallback_reply(turns))
            }
        }
    }

    async fn health_check(&self) -> bool {
        self.config.bin_path.exists() && self.config.model_path.exists()
    }

    fn name(&self) -> &str {
        "llama_cpp_cli"
    }
}
