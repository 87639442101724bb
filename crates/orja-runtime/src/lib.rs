//! # orja-runtime
//!
//! The async half of Orja: inference providers, the evaluator / router /
//! responder agents, skills, conversation memory and the pipeline that
//! strings them together.
//!
//! Deterministic pieces (JSON extraction, repair, heuristic routing) live in
//! `orja-core`; everything here may block on a subprocess, a socket or a
//! database.
//!
//! ## Example
//!
//! ```rust,ignore
//! use orja_runtime::{OrjaConfig, Pipeline};
//!
//! let config = OrjaConfig::load("config/orja.yaml".as_ref())?;
//! let pipeline = Pipeline::from_config(&config).await?;
//!
//! let reply = pipeline.handle_request("set a timer for 10 minutes", "session-1").await;
//! ```

pub mod agents;
pub mod config;
pub mod memory;
pub mod orchestrator;
pub mod prompts;
pub mod providers;
pub mod resilience;
pub mod skills;

#[cfg(test)]
mod testing;

pub use config::{
    AgentConfig, AgentsConfig, ConfigError, LlamaCppConfig, LlmConfig, OrjaConfig, PipelineConfig,
    PromptsConfig, ServerConfig,
};
pub use memory::{InMemoryStore, MemoryError, MemoryStore, SqliteMemoryStore};
pub use orchestrator::{
    Pipeline, PipelineBuilder, PipelineError, APOLOGY_REPLY, PIPELINE_DISABLED_REPLY,
    SKILL_FAILED_REPLY, SKILL_NOT_FOUND_REPLY,
};
pub use prompts::{FilePromptLoader, PromptError, PromptName, PromptSource, StaticPrompts};
pub use providers::{
    GenerateOptions, LlamaCliProvider, LlamaServerProvider, LlmProvider, PlaceholderProvider,
    ProviderError, ProviderRegistry, ServerStatus,
};
pub use resilience::{run_stage, StageOutcome};
pub use skills::{Skill, SkillError, SkillRegistry, SkillSet};
