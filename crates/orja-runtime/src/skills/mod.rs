//! Skill registry and built-in skills.
//!
//! Skills are synchronous string-in, string-out functions. The pipeline
//! only sees the [`SkillRegistry`] trait; [`SkillSet`] is the map-backed
//! implementation holding the built-ins.

use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;

mod builtin;

pub use builtin::{HelpSkill, TimeSkill, TimerSkill};

/// Skill arguments as produced by routing.
pub type SkillArguments = BTreeMap<String, Value>;

/// Errors from skill invocation.
#[derive(Error, Debug)]
pub enum SkillError {
    #[error("Unknown skill: {0}")]
    NotFound(String),

    #[error("Skill '{skill}' failed: {message}")]
    Failed { skill: String, message: String },
}

/// A single named skill.
pub trait Skill: Send + Sync {
    fn name(&self) -> &str;

    /// One-line description shown to the router model.
    fn summary(&self) -> &str;

    fn invoke(&self, request: &str, arguments: &SkillArguments) -> Result<String, SkillError>;
}

/// What the pipeline needs from a skill collection.
pub trait SkillRegistry: Send + Sync {
    /// Registered skill names, sorted.
    fn names(&self) -> Vec<String>;

    fn contains(&self, name: &str) -> bool;

    /// `name: summary` lines for every skill.
    fn summaries(&self) -> String;

    fn invoke(
        &self,
        name: &str,
        request: &str,
        arguments: &SkillArguments,
    ) -> Result<String, SkillError>;
}

/// Map-backed skill registry.
#[derive(Default, Clone)]
pub struct SkillSet {
    skills: BTreeMap<String, Arc<dyn Skill>>,
}

impl SkillSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// The `help`, `time` and `timer` skills.
    pub fn with_builtins() -> Self {
        let mut set = Self::new();
        set.register(Arc::new(TimeSkill));
        set.register(Arc::new(TimerSkill));
        let help = HelpSkill::describing(&set);
        set.register(Arc::new(help));
        set
    }

    /// Register a skill, replacing one of the same name.
    pub fn register(&mut self, skill: Arc<dyn Skill>) {
        self.skills.insert(skill.name().to_string(), skill);
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = &Arc<dyn Skill>> {
        self.skills.values()
    }
}

impl std::fmt::Debug for SkillSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SkillSet")
            .field("skills", &self.names())
            .finish()
    }
}

impl SkillRegistry for SkillSet {
    fn names(&self) -> Vec<String> {
        self.skills.keys().cloned().collect()
    }

    fn contains(&self, name: &str) -> bool {
        self.skills.contains_key(name)
    }

    fn summaries(&self) -> String {
        self.skills
            .values()
            .map(|skill| format!("{}: {}", skill.name(), skill.summary()))
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn invoke(
        &self,
        name: &str,
        request: &str,
        arguments: &SkillArguments,
    ) -> Result<String, SkillError> {
        let skill = self
            .skills
            .get(name)
            .ok_or_else(|| SkillError::NotFound(name.to_string()))?;
        tracing::debug!(skill = name, "Invoking skill");
        skill.invoke(request, arguments)
    }
}
