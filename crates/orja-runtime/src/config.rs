//! Runtime configuration.
//!
//! Loaded from YAML. Every field has a default so a partial file (or no
//! file at all) yields a working configuration. Durations are written as
//! human strings such as `"45s"` or `"500ms"`; bare integers are seconds.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use orja_core::HeuristicRules;

/// Errors loading or saving configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to access config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrjaConfig {
    pub assistant: AssistantConfig,
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
    pub llm: LlmConfig,
    pub pipeline: PipelineConfig,
    pub agents: AgentsConfig,
    pub routing: HeuristicRules,
    pub prompts: PromptsConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AssistantConfig {
    pub name: String,

    /// Phrase every interactive request must start with
    pub wake_phrase: String,
}

impl Default for AssistantConfig {
    fn default() -> Self {
        Self {
            name: "orja".to_string(),
            wake_phrase: "hey orja".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("data/orja.sqlite"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter directive, e.g. `info` or `orja_runtime=debug`
    pub level: String,

    /// Log to this file instead of stderr
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: None,
        }
    }
}

/// Inference backend selection and tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// `placeholder`, `llama_cpp_cli` or `llama_server`
    pub backend: String,

    /// System prompt used when a call supplies none
    pub system_prompt: String,

    /// Trailing turns kept when flattening a conversation
    pub history_messages: usize,

    /// Ask the evaluator and router for strict JSON
    pub json_strict: bool,

    pub llama_cpp: LlamaCppConfig,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            backend: "placeholder".to_string(),
            system_prompt: String::new(),
            history_messages: 6,
            json_strict: true,
            llama_cpp: LlamaCppConfig::default(),
        }
    }
}

/// llama.cpp binaries, model and sampling defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LlamaCppConfig {
    pub bin_path: PathBuf,

    /// Defaults to `llama-server` next to `bin_path`
    pub server_bin_path: Option<PathBuf>,

    pub model_path: PathBuf,
    pub threads: u32,
    pub ctx_size: u32,
    pub max_tokens: u32,
    pub temperature: f32,
    pub top_p: f32,
    pub repeat_penalty: f32,
    pub batch_size: u32,

    /// Hard wall-clock limit per generation
    #[serde(with = "human_duration")]
    pub timeout: Duration,

    pub server: ServerConfig,
}

impl Default for LlamaCppConfig {
    fn default() -> Self {
        Self {
            bin_path: PathBuf::from("llama.cpp/build/bin/llama-cli"),
            server_bin_path: None,
            model_path: PathBuf::from("models/model.gguf"),
            threads: 4,
            ctx_size: 2048,
            max_tokens: 160,
            temperature: 0.7,
            top_p: 0.9,
            repeat_penalty: 1.1,
            batch_size: 256,
            timeout: Duration::from_secs(45),
            server: ServerConfig::default(),
        }
    }
}

impl LlamaCppConfig {
    /// The `llama-server` binary to launch.
    pub fn resolved_server_bin(&self) -> PathBuf {
        match &self.server_bin_path {
            Some(path) => path.clone(),
            None => self
                .bin_path
                .parent()
                .unwrap_or_else(|| Path::new(""))
                .join("llama-server"),
        }
    }
}

/// Persistent completion server settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub enabled: bool,
    pub host: String,
    pub port: u16,

    /// How long to wait for the port to accept connections
    #[serde(with = "human_duration")]
    pub startup_timeout: Duration,

    /// Delay between readiness probes
    #[serde(with = "human_duration")]
    pub poll_interval: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            host: "127.0.0.1".to_string(),
            port: 8080,
            startup_timeout: Duration::from_secs(45),
            poll_interval: Duration::from_millis(500),
        }
    }
}

impl ServerConfig {
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub enabled: bool,

    /// Conversation turns loaded per request
    pub max_history_messages: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_history_messages: 6,
        }
    }
}

/// Switch and token limit for one stage agent.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub enabled: bool,
    pub max_tokens: u32,
}

impl AgentConfig {
    pub fn with_max_tokens(max_tokens: u32) -> Self {
        Self {
            enabled: true,
            max_tokens,
        }
    }

    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self::with_max_tokens(80)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentsConfig {
    pub evaluator: AgentConfig,
    pub router: AgentConfig,
    pub responder: AgentConfig,
}

impl Default for AgentsConfig {
    fn default() -> Self {
        Self {
            evaluator: AgentConfig::with_max_tokens(80),
            router: AgentConfig::with_max_tokens(80),
            responder: AgentConfig::with_max_tokens(200),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PromptsConfig {
    /// Directory holding `<name>.txt` prompt files
    pub dir: PathBuf,

    /// Re-read a prompt file when its mtime changes
    pub reload: bool,
}

impl Default for PromptsConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("prompts"),
            reload: false,
        }
    }
}

impl OrjaConfig {
    /// Parse configuration from YAML text.
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// Serialize to YAML text.
    pub fn to_yaml(&self) -> Result<String, ConfigError> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Load from `path`, writing the defaults there first if it is missing,
    /// then apply `ORJA_*` environment overrides.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            let config = Self::default();
            config.save(path)?;
            tracing::info!(path = %path.display(), "Wrote default configuration");
        }

        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config = Self::from_yaml(&text)?;
        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Write this configuration to `path`, creating parent directories.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let io_err = |source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(io_err)?;
        }
        fs::write(path, self.to_yaml()?).map_err(io_err)
    }

    /// Apply overrides from a variable lookup (`ORJA_LLM_BACKEND`,
    /// `ORJA_DATABASE_PATH`, `ORJA_LOG_LEVEL`).
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(backend) = lookup("ORJA_LLM_BACKEND") {
            self.llm.backend = backend;
        }
        if let Some(path) = lookup("ORJA_DATABASE_PATH") {
            self.database.path = PathBuf::from(path);
        }
        if let Some(level) = lookup("ORJA_LOG_LEVEL") {
            self.logging.level = level;
        }
    }

    /// Resolve relative paths against `root`.
    pub fn resolve_paths(&mut self, root: &Path) {
        let resolve = |p: &mut PathBuf| {
            if p.is_relative() {
                *p = root.join(&*p);
            }
        };
        resolve(&mut self.database.path);
        resolve(&mut self.prompts.dir);
        if let Some(file) = self.logging.file.as_mut() {
            resolve(file);
        }
    }
}

mod human_duration {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Seconds(u64),
        Text(String),
    }

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&humantime::format_duration(*duration).to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        match Raw::deserialize(deserializer)? {
            Raw::Seconds(secs) => Ok(Duration::from_secs(secs)),
            Raw::Text(text) => {
                humantime::parse_duration(text.trim()).map_err(serde::de::Error::custom)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = OrjaConfig::default();
        assert!(config.pipeline.enabled);
        assert_eq!(config.pipeline.max_history_messages, 6);
        assert_eq!(config.llm.backend, "placeholder");
        assert_eq!(config.agents.evaluator.max_tokens, 80);
        assert_eq!(config.agents.responder.max_tokens, 200);
        assert_eq!(config.llm.llama_cpp.timeout, Duration::from_secs(45));
        assert_eq!(config.llm.llama_cpp.server.address(), "127.0.0.1:8080");
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let yaml = r#"
llm:
  backend: llama_cpp_cli
  llama_cpp:
    timeout: 20s
    server:
      enabled: true
      port: 9090
      poll_interval: 250ms
pipeline:
  max_history_messages: 4
"#;
        let config = OrjaConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.llm.backend, "llama_cpp_cli");
        assert_eq!(config.llm.llama_cpp.timeout, Duration::from_secs(20));
        assert_eq!(config.llm.llama_cpp.threads, 4);
        assert!(config.llm.llama_cpp.server.enabled);
        assert_eq!(config.llm.llama_cpp.server.port, 9090);
        assert_eq!(config.llm.llama_cpp.server.poll_interval, Duration::from_millis(250));
        assert_eq!(config.pipeline.max_history_messages, 4);
        assert!(config.pipeline.enabled);
        assert_eq!(config.assistant.wake_phrase, "hey orja");
    }

    #[test]
    fn test_integer_duration_is_seconds() {
        let config = OrjaConfig::from_yaml("llm:\n  llama_cpp:\n    timeout: 30\n").unwrap();
        assert_eq!(config.llm.llama_cpp.timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_invalid_duration_is_an_error() {
        let result = OrjaConfig::from_yaml("llm:\n  llama_cpp:\n    timeout: soon\n");
        assert!(matches!(result, Err(ConfigError::Yaml(_))));
    }

    #[test]
    fn test_routing_rules_from_yaml() {
        let yaml = r#"
routing:
  prefixes:
    - skill: help
      prefixes: [apua]
  timer_keywords: [ajastin]
"#;
        let config = OrjaConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.routing.prefixes.len(), 1);
        assert_eq!(config.routing.prefixes[0].prefixes, vec!["apua"]);
        assert_eq!(config.routing.timer_skill, "timer");
    }

    #[test]
    fn test_yaml_round_trip() {
        let config = OrjaConfig::default();
        let parsed = OrjaConfig::from_yaml(&config.to_yaml().unwrap()).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_load_writes_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config").join("config.yaml");

        let config = OrjaConfig::load(&path).unwrap();
        assert!(path.exists());
        assert_eq!(config.assistant.name, "orja");
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = [
            ("ORJA_LLM_BACKEND", "llama_server"),
            ("ORJA_LOG_LEVEL", "debug"),
        ]
        .into_iter()
        .collect();

        let mut config = OrjaConfig::default();
        config.apply_overrides(|key| vars.get(key).map(|v| v.to_string()));

        assert_eq!(config.llm.backend, "llama_server");
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.database.path, PathBuf::from("data/orja.sqlite"));
    }

    #[test]
    fn test_server_bin_defaults_next_to_cli() {
        let mut llama = LlamaCppConfig {
            bin_path: PathBuf::from("/opt/llama/bin/llama-cli"),
            ..Default::default()
        };
        assert_eq!(
            llama.resolved_server_bin(),
            PathBuf::from("/opt/llama/bin/llama-server")
        );

        llama.server_bin_path = Some(PathBuf::from("/usr/bin/llama-server"));
        assert_eq!(llama.resolved_server_bin(), PathBuf::from("/usr/bin/llama-server"));
    }

    #[test]
    fn test_resolve_paths() {
        let mut config = OrjaConfig::default();
        config.resolve_paths(Path::new("/srv/orja"));
        assert_eq!(config.database.path, PathBuf::from("/srv/orja/data/orja.sqlite"));
        assert_eq!(config.prompts.dir, PathBuf::from("/srv/orja/prompts"));
    }
}
