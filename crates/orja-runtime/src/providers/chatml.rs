//! ChatML prompt flattening and sampling defaults shared by the llama
//! backends.

use orja_core::{ChatTurn, Role};

use super::GenerateOptions;
use crate::config::LlamaCppConfig;

/// Opens a speaker turn.
pub const TURN_START: &str = "<|im_start|>";

/// Closes a speaker turn.
pub const TURN_END: &str = "<|im_end|>";

/// Reply used when cleaning leaves nothing.
pub const EMPTY_COMPLETION_REPLY: &str = "I don't have an answer for that.";

/// Flatten a system prompt and conversation into a single ChatML string
/// ending with an open assistant turn.
///
/// System turns inside `turns` are skipped; the system prompt is always
/// the one passed in.
pub fn build_prompt(system_prompt: &str, turns: &[ChatTurn]) -> String {
    let mut prompt = format!("{TURN_START}system\n{system_prompt}{TURN_END}\n");
    for turn in turns {
        match turn.role() {
            Role::User | Role::Assistant => {
                prompt.push_str(&format!(
                    "{TURN_START}{}\n{}{TURN_END}\n",
                    turn.role(),
                    turn.content()
                ));
            }
            Role::System => {}
        }
    }
    prompt.push_str(&format!("{TURN_START}assistant\n"));
    prompt
}

/// Strip an echoed prompt and cut at the first turn marker, discarding
/// any turns the model hallucinated after its answer.
pub fn clean_completion(raw: &str, prompt: &str) -> String {
    let trimmed = raw.trim();
    // the CLI echoes the prompt, which itself was trimmed by stdout handling
    let response = trimmed
        .strip_prefix(prompt)
        .or_else(|| trimmed.strip_prefix(prompt.trim()))
        .unwrap_or(trimmed)
        .trim();

    let response = response.split(TURN_END).next().unwrap_or_default().trim();
    let response = response.split(TURN_START).next().unwrap_or_default().trim();

    if response.is_empty() {
        EMPTY_COMPLETION_REPLY.to_string()
    } else {
        response.to_string()
    }
}

/// Sampling parameters after applying per-call overrides to the configured
/// defaults.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct Sampling {
    pub max_tokens: u32,
    pub temperature: f32,
    pub top_p: f32,
    pub repeat_penalty: f32,
}

impl Sampling {
    pub(crate) fn resolve(options: &GenerateOptions, config: &LlamaCppConfig) -> Self {
        Self {
            max_tokens: options.max_tokens.unwrap_or(config.max_tokens),
            temperature: options.temperature.unwrap_or(config.temperature),
            top_p: options.top_p.unwrap_or(config.top_p),
            repeat_penalty: config.repeat_penalty,
        }
    }
}

/// The trailing `limit` turns of a conversation.
pub(crate) fn history_window(turns: &[ChatTurn], limit: usize) -> &[ChatTurn] {
    &turns[turns.len().saturating_sub(limit)..]
}
