//! Canned-reply backend for development without a model.

use async_trait::async_trait;

use orja_core::{text::shorten, ChatTurn};

use super::{last_user_content, GenerateOptions, LlmProvider, ProviderError};

/// Width of the echoed request in a placeholder reply.
const ECHO_WIDTH: usize = 240;

/// Provider that echoes the request back in a labelled reply.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlaceholderProvider;

impl PlaceholderProvider {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl LlmProvider for PlaceholderProvider {
    async fn generate(
        &self,
        turns: &[ChatTurn],
        _options: &GenerateOptions,
    ) -> Result<String, ProviderError> {
        let user_msg = last_user_content(turns).unwrap_or_default();
        Ok(format!(
            "Local response (placeholder): {} I can help with basic tasks briefly.",
            shorten(user_msg, ECHO_WIDTH)
        ))
    }

    async fn health_check(&self) -> bool {
        true
    }

    fn name(&self) -> &str {
        "placeholder"
    }
}
