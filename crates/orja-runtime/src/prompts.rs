//! System prompts for the stage agents.
//!
//! Prompts are keyed by a closed set of names. The file-backed source reads
//! `<name>.txt` from a prompt directory and can re-read a file when its
//! modification time changes; a missing file falls back to the built-in
//! text below.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use thiserror::Error;

/// Evaluator system prompt.
pub const EVALUATOR_SYSTEM_PROMPT: &str = r#"You are the evaluation step of a small local voice assistant.
Estimate how hard the user's request is and whether a larger cloud model
might be needed later.

Respond with one JSON object and nothing else:
{"difficulty": "easy" | "medium" | "hard", "needs_cloud": true | false, "reason": "short explanation"}
"#;

/// Router system prompt.
pub const ROUTER_SYSTEM_PROMPT: &str = r#"You are the routing step of a small local voice assistant.
Decide whether the request should be handled by one of the listed skills
or answered as plain chat. Only choose a skill from the list you are given.

Respond with one JSON object and nothing else:
{"action": "chat" | "skill", "skill": "skill name or null", "arguments": {}, "confidence": 0.0-1.0}

For the timer skill put the duration in arguments as {"minutes": <integer>}.
"#;

/// Responder system prompt.
pub const RESPONDER_SYSTEM_PROMPT: &str = r#"You are a helpful local voice assistant.
Answer in English, in one to three short sentences.
If a skill result is given, base the answer on it and do not contradict it.
Do not mention the evaluation or routing steps.
"#;

/// One line per built-in skill, shown to the router.
pub const SKILL_SUMMARIES: &str = "help: list what the assistant can do
time: tell the current local time
timer: set a countdown timer, argument minutes (integer)
";

/// Errors from prompt sources.
#[derive(Error, Debug)]
pub enum PromptError {
    #[error("Failed to access prompt file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Names of the prompts the pipeline asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PromptName {
    EvaluatorSystem,
    RouterSystem,
    ResponderSystem,
    SkillSummaries,
}

impl PromptName {
    pub const ALL: [PromptName; 4] = [
        PromptName::EvaluatorSystem,
        PromptName::RouterSystem,
        PromptName::ResponderSystem,
        PromptName::SkillSummaries,
    ];

    pub fn key(self) -> &'static str {
        match self {
            PromptName::EvaluatorSystem => "evaluator_system",
            PromptName::RouterSystem => "router_system",
            PromptName::ResponderSystem => "responder_system",
            PromptName::SkillSummaries => "skill_summaries",
        }
    }

    pub fn file_name(self) -> String {
        format!("{}.txt", self.key())
    }

    /// Built-in text for this prompt.
    pub fn default_text(self) -> &'static str {
        match self {
            PromptName::EvaluatorSystem => EVALUATOR_SYSTEM_PROMPT,
            PromptName::RouterSystem => ROUTER_SYSTEM_PROMPT,
            PromptName::ResponderSystem => RESPONDER_SYSTEM_PROMPT,
            PromptName::SkillSummaries => SKILL_SUMMARIES,
        }
    }
}

impl std::fmt::Display for PromptName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.key())
    }
}

/// Supplies prompt text by name.
pub trait PromptSource: Send + Sync {
    fn get(&self, name: PromptName) -> String;
}

/// Fixed in-memory prompts.
#[derive(Debug, Clone)]
pub struct StaticPrompts {
    prompts: BTreeMap<PromptName, String>,
}

impl StaticPrompts {
    /// The built-in prompts.
    pub fn defaults() -> Self {
        Self {
            prompts: PromptName::ALL
                .iter()
                .map(|name| (*name, name.default_text().to_string()))
                .collect(),
        }
    }

    pub fn with(mut self, name: PromptName, text: impl Into<String>) -> Self {
        self.prompts.insert(name, text.into());
        self
    }
}

impl Default for StaticPrompts {
    fn default() -> Self {
        Self::defaults()
    }
}

impl PromptSource for StaticPrompts {
    fn get(&self, name: PromptName) -> String {
        self.prompts.get(&name).cloned().unwrap_or_default()
    }
}

#[derive(Debug, Clone)]
struct CachedPrompt {
    text: String,
    mtime: Option<SystemTime>,
}

/// Prompt files in a directory, with optional reload on change.
#[derive(Debug)]
pub struct FilePromptLoader {
    dir: PathBuf,
    reload: bool,
    cache: RwLock<BTreeMap<PromptName, CachedPrompt>>,
}

impl FilePromptLoader {
    /// Create the directory if needed and load every prompt once.
    pub fn new(dir: impl Into<PathBuf>, reload: bool) -> Result<Self, PromptError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|source| PromptError::Io {
            path: dir.clone(),
            source,
        })?;

        let cache = PromptName::ALL
            .iter()
            .map(|name| (*name, read_prompt(&dir, *name)))
            .collect();

        Ok(Self {
            dir,
            reload,
            cache: RwLock::new(cache),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Write the built-in prompt files that do not exist yet.
    pub fn write_defaults(dir: &Path) -> Result<Vec<PathBuf>, PromptError> {
        fs::create_dir_all(dir).map_err(|source| PromptError::Io {
            path: dir.to_path_buf(),
            source,
        })?;

        let mut written = Vec::new();
        for name in PromptName::ALL {
            let path = dir.join(name.file_name());
            if path.exists() {
                continue;
            }
            fs::write(&path, name.default_text()).map_err(|source| PromptError::Io {
                path: path.clone(),
                source,
            })?;
            written.push(path);
        }
        Ok(written)
    }

    fn current_mtime(&self, name: PromptName) -> Option<SystemTime> {
        fs::metadata(self.dir.join(name.file_name()))
            .and_then(|meta| meta.modified())
            .ok()
    }
}

impl PromptSource for FilePromptLoader {
    fn get(&self, name: PromptName) -> String {
        if self.reload {
            let mtime = self.current_mtime(name);
            let stale = self
                .cache
                .read()
                .get(&name)
                .map_or(true, |cached| cached.mtime != mtime);
            if stale {
                let fresh = read_prompt(&self.dir, name);
                self.cache.write().insert(name, fresh);
            }
        }

        self.cache
            .read()
            .get(&name)
            .map(|cached| cached.text.clone())
            .unwrap_or_else(|| name.default_text().to_string())
    }
}

fn read_prompt(dir: &Path, name: PromptName) -> CachedPrompt {
    let path = dir.join(name.file_name());
    match fs::read_to_string(&path) {
        Ok(text) => {
            tracing::debug!(prompt = %name, path = %path.display(), "Loaded prompt");
            CachedPrompt {
                text,
                mtime: fs::metadata(&path).and_then(|m| m.modified()).ok(),
            }
        }
        Err(e) => {
            tracing::warn!(prompt = %name, path = %path.display(), error = %e, "Prompt file unavailable, using built-in text");
            CachedPrompt {
                text: name.default_text().to_string(),
                mtime: None,
            }
        }
    }
}
