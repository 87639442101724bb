//! `orja`: local assistant front-end.
//!
//! Loads the YAML configuration, wires the configured inference backend,
//! prompt directory and conversation store into a pipeline, and talks to it
//! from the terminal.

use anyhow::{bail, Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

use orja_core::{ChatTurn, PipelineEvent, Role};
use orja_runtime::config::LoggingConfig;
use orja_runtime::{
    FilePromptLoader, GenerateOptions, InMemoryStore, LlamaServerProvider, LlmProvider,
    MemoryStore, OrjaConfig, Pipeline, ProviderRegistry, SqliteMemoryStore,
};

const PROBE_PROMPT: &str = "Say hello in one short sentence.";

/// Orja assistant CLI
#[derive(Parser, Debug)]
#[command(name = "orja")]
#[command(about = "Orja - local assistant with a small-model request pipeline", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file (created with defaults if missing)
    #[arg(long, global = true, default_value = "config/orja.yaml")]
    config: PathBuf,

    /// Keep conversation and audit records in memory only
    #[arg(long, global = true)]
    ephemeral: bool,

    /// Subcommand (defaults to `chat`)
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Interactive session; lines must start with the wake phrase
    Chat,

    /// Answer a single request and exit
    Ask {
        /// Request text
        #[arg(required = true, num_args = 1..)]
        text: Vec<String>,
    },

    /// Check the configured backend with a fixed prompt
    Probe,

    /// Print the most recent pipeline audit events of a session
    Events {
        /// Session id as logged at session start
        #[arg(long)]
        session: String,

        /// Number of events to show
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },

    /// Write the default configuration and prompt files
    InitConfig {
        /// Overwrite an existing configuration file
        #[arg(long)]
        force: bool,
    },
}

/// Everything a session needs, plus the server handle for shutdown.
struct Assistant {
    config: OrjaConfig,
    pipeline: Pipeline,
    memory: Arc<dyn MemoryStore>,
    server: Option<Arc<LlamaServerProvider>>,
}

impl Assistant {
    async fn build(config: OrjaConfig, ephemeral: bool) -> Result<Self> {
        let (provider, server) = build_provider(&config).await?;
        let memory = open_memory(&config, ephemeral)?;
        let prompts = FilePromptLoader::new(&config.prompts.dir, config.prompts.reload)
            .context("Failed to load prompts")?;

        let pipeline = Pipeline::builder()
            .config(config.clone())
            .provider(provider)
            .memory(memory.clone())
            .prompts(Arc::new(prompts))
            .build()?;

        Ok(Self {
            config,
            pipeline,
            memory,
            server,
        })
    }

    /// Run one request, then record both turns.
    ///
    /// The user turn is stored after the pipeline call so the request is not
    /// also part of its own history.
    async fn respond(&self, text: &str, session_id: &str) -> String {
        let reply = self.pipeline.handle_request(text, session_id).await;
        self.remember(Role::User, text, session_id);
        self.remember(Role::Assistant, &reply, session_id);
        reply
    }

    fn remember(&self, role: Role, content: &str, session_id: &str) {
        if let Err(e) = self
            .memory
            .append_message(role, content, session_id, Utc::now())
        {
            tracing::warn!(role = role.as_str(), error = %e, "Failed to store message");
        }
    }

    async fn shutdown(&self) {
        if let Some(server) = &self.server {
            server.shutdown().await;
        }
    }
}

fn open_memory(config: &OrjaConfig, ephemeral: bool) -> Result<Arc<dyn MemoryStore>> {
    if ephemeral {
        return Ok(Arc::new(InMemoryStore::new()));
    }
    let store = SqliteMemoryStore::open(&config.database.path)
        .context("Failed to open conversation store")?;
    Ok(Arc::new(store))
}

/// Select and start the backend; the server variant is kept so it can be
/// stopped.
async fn build_provider(
    config: &OrjaConfig,
) -> Result<(Arc<dyn LlmProvider>, Option<Arc<LlamaServerProvider>>)> {
    let registry = ProviderRegistry::with_defaults();
    if ProviderRegistry::resolve_backend(&config.llm) == "llama_server" {
        if let Err(e) = registry.validate("llama_server", &config.llm) {
            tracing::warn!(error = %e, "Backend not ready");
        }
        let server = Arc::new(LlamaServerProvider::from_config(&config.llm)?);
        server
            .initialize()
            .await
            .context("llama-server did not become ready")?;
        return Ok((server.clone(), Some(server)));
    }
    Ok((registry.create_from_config(&config.llm).await?, None))
}

fn init_logging(config: &LoggingConfig) -> Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&config.level)
            .with_context(|| format!("Invalid log level '{}'", config.level))?,
    };
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false);

    match &config.file {
        Some(path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)?;
            }
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {}", path.display()))?;
            subscriber
                .with_ansi(false)
                .with_writer(std::sync::Mutex::new(file))
                .init();
        }
        None => subscriber.with_writer(std::io::stderr).init(),
    }
    Ok(())
}

/// The request after the wake phrase, or `None` if it is not addressed to us.
fn strip_wake_phrase<'a>(line: &'a str, wake_phrase: &str) -> Option<&'a str> {
    let line = line.trim();
    let wake_phrase = wake_phrase.trim();
    let head = line.get(..wake_phrase.len())?;
    if !head.eq_ignore_ascii_case(wake_phrase) {
        return None;
    }
    let rest = &line[wake_phrase.len()..];
    // "hey orjaa" is not the wake phrase
    if rest.starts_with(|c: char| c.is_alphanumeric()) {
        return None;
    }
    Some(rest.trim_start_matches(|c: char| c.is_whitespace() || ",.:;!".contains(c)))
}

fn new_session_id() -> String {
    format!("session-{}", uuid::Uuid::new_v4())
}

async fn chat(assistant: &Assistant) -> Result<()> {
    let name = &assistant.config.assistant.name;
    let wake_phrase = &assistant.config.assistant.wake_phrase;
    let session_id = new_session_id();
    tracing::info!(session = %session_id, "Session started");

    println!("{name} is ready. Start with \"{wake_phrase}\"; type \"exit\" to quit.");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut hint_shown = false;

    loop {
        print!("> ");
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line.eq_ignore_ascii_case("exit") || line.eq_ignore_ascii_case("quit") {
            break;
        }

        let Some(request) = strip_wake_phrase(line, wake_phrase) else {
            if !hint_shown {
                println!("(Start with \"{wake_phrase}\", for example \"{wake_phrase}, what time is it\")");
                hint_shown = true;
            }
            continue;
        };
        if request.is_empty() {
            println!("{name}: Yes?");
            continue;
        }

        let reply = assistant.respond(request, &session_id).await;
        println!("{name}: {reply}");
    }
    Ok(())
}

async fn probe(config: &OrjaConfig) -> Result<()> {
    let (provider, server) = build_provider(config).await?;
    let description = ProviderRegistry::with_defaults()
        .description(provider.name())
        .unwrap_or("custom backend");
    println!("Backend: {} ({description})", provider.name());
    println!("Healthy: {}", provider.health_check().await);

    let options = GenerateOptions::new()
        .system_prompt(config.llm.system_prompt.clone())
        .max_tokens(32);
    let reply = match &server {
        Some(server) => server
            .try_generate(&[ChatTurn::user(PROBE_PROMPT)], &options)
            .await
            .context("Server backend failed")?,
        None => provider
            .generate(&[ChatTurn::user(PROBE_PROMPT)], &options)
            .await?,
    };
    println!("Reply: {reply}");

    if let Some(server) = server {
        server.shutdown().await;
    }
    Ok(())
}

fn show_events(memory: &dyn MemoryStore, session_id: &str, limit: usize) -> Result<()> {
    let mut events = memory
        .recent_events(session_id, limit)
        .context("Failed to read audit events")?;
    if events.is_empty() {
        println!("No events for {session_id}");
        return Ok(());
    }
    events.reverse();
    for event in &events {
        println!("{}", format_event(event));
    }
    Ok(())
}

fn format_event(event: &PipelineEvent) -> String {
    let latency = event
        .latency_ms
        .map(|ms| format!("{ms:.1}ms"))
        .unwrap_or_else(|| "-".to_string());
    format!(
        "{} {:<16} {:<4} {:>9}  {} -> {}",
        event.timestamp.format("%H:%M:%S"),
        event.step_name,
        if event.success { "ok" } else { "FAIL" },
        latency,
        event.input_summary,
        event.output_summary
    )
}

/// Write the defaults; prompt files land under `root`.
fn init_config(path: &Path, root: &Path, force: bool) -> Result<()> {
    if path.exists() && !force {
        bail!("{} already exists (use --force to overwrite)", path.display());
    }
    let config = OrjaConfig::default();
    config.save(path)?;
    println!("Wrote {}", path.display());

    for written in FilePromptLoader::write_defaults(&root.join(&config.prompts.dir))? {
        println!("Wrote {}", written.display());
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Some(Commands::InitConfig { force }) = &cli.command {
        return init_config(&cli.config, &std::env::current_dir()?, *force);
    }

    let mut config = OrjaConfig::load(&cli.config)
        .with_context(|| format!("Failed to load {}", cli.config.display()))?;
    config.resolve_paths(&std::env::current_dir()?);
    init_logging(&config.logging)?;

    match cli.command.unwrap_or(Commands::Chat) {
        Commands::Chat => {
            let assistant = Assistant::build(config, cli.ephemeral).await?;
            let result = chat(&assistant).await;
            assistant.shutdown().await;
            result
        }
        Commands::Ask { text } => {
            let assistant = Assistant::build(config, cli.ephemeral).await?;
            let reply = assistant.respond(&text.join(" "), &new_session_id()).await;
            println!("{reply}");
            assistant.shutdown().await;
            Ok(())
        }
        Commands::Probe => probe(&config).await,
        Commands::Events { session, limit } => {
            let memory = open_memory(&config, cli.ephemeral)?;
            show_events(memory.as_ref(), &session, limit)
        }
        Commands::InitConfig { .. } => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use orja_runtime::ProviderError;
    use std::sync::Mutex;

    /// Answers every call with the same text and keeps the prompts it saw.
    #[derive(Default)]
    struct RecordingProvider {
        prompts: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl LlmProvider for RecordingProvider {
        async fn generate(
            &self,
            turns: &[ChatTurn],
            _options: &GenerateOptions,
        ) -> Result<String, ProviderError> {
            let prompt = turns
                .iter()
                .map(|turn| turn.content())
                .collect::<Vec<_>>()
                .join("\n");
            self.prompts.lock().unwrap().push(prompt);
            Ok("Hi there".to_string())
        }

        async fn health_check(&self) -> bool {
            true
        }

        fn name(&self) -> &str {
            "recording"
        }
    }

    fn assistant_with(provider: Arc<RecordingProvider>) -> Assistant {
        let memory: Arc<dyn MemoryStore> = Arc::new(InMemoryStore::new());
        let pipeline = Pipeline::builder()
            .provider(provider)
            .memory(memory.clone())
            .build()
            .unwrap();
        Assistant {
            config: OrjaConfig::default(),
            pipeline,
            memory,
            server: None,
        }
    }

    #[tokio::test]
    async fn test_request_not_in_its_own_history() {
        let provider = Arc::new(RecordingProvider::default());
        let assistant = assistant_with(provider.clone());

        let reply = assistant.respond("hello", "s1").await;
        assert_eq!(reply, "Hi there");

        let prompts = provider.prompts.lock().unwrap().clone();
        assert!(!prompts.is_empty());
        assert!(prompts.iter().all(|p| !p.contains("user: hello")));

        let stored = assistant.memory.recent_messages("s1", 10).unwrap();
        let turns: Vec<_> = stored
            .iter()
            .rev()
            .map(|m| (m.role, m.content.as_str()))
            .collect();
        assert_eq!(
            turns,
            vec![(Role::User, "hello"), (Role::Assistant, "Hi there")]
        );
    }

    #[tokio::test]
    async fn test_previous_turns_reach_the_next_request() {
        let provider = Arc::new(RecordingProvider::default());
        let assistant = assistant_with(provider.clone());

        assistant.respond("hello", "s1").await;
        provider.prompts.lock().unwrap().clear();
        assistant.respond("and again", "s1").await;

        let prompts = provider.prompts.lock().unwrap().clone();
        assert!(prompts.iter().any(|p| p.contains("user: hello")));
        assert!(prompts.iter().all(|p| !p.contains("user: and again")));
    }

    #[test]
    fn test_show_events_for_session() {
        let store = InMemoryStore::new();
        store
            .append_event(&PipelineEvent::new("s1", "evaluator", "hi", "{}", true, Some(12.5)))
            .unwrap();
        store
            .append_event(&PipelineEvent::new("s1", "responder", "hi", "boom", false, None))
            .unwrap();

        let events = store.recent_events("s1", 10).unwrap();
        let ok = format_event(&events[1]);
        assert!(ok.contains("evaluator"));
        assert!(ok.contains("12.5ms"));
        let failed = format_event(&events[0]);
        assert!(failed.contains("FAIL"));
        assert!(failed.contains("boom"));

        show_events(&store, "s1", 10).unwrap();
        show_events(&store, "other", 10).unwrap();
    }

    #[test]
    fn test_wake_phrase_required() {
        assert_eq!(strip_wake_phrase("what time is it", "hey orja"), None);
        assert_eq!(strip_wake_phrase("hey orjaa time", "hey orja"), None);
        assert_eq!(strip_wake_phrase("hey", "hey orja"), None);
    }

    #[test]
    fn test_wake_phrase_stripped() {
        assert_eq!(
            strip_wake_phrase("Hey Orja, what time is it", "hey orja"),
            Some("what time is it")
        );
        assert_eq!(strip_wake_phrase("  hey orja  ", "hey orja"), Some(""));
        assert_eq!(
            strip_wake_phrase("hey orja: timer 5", "hey orja"),
            Some("timer 5")
        );
    }

    #[test]
    fn test_session_id_shape() {
        let id = new_session_id();
        assert!(id.starts_with("session-"));
        assert_eq!(id.len(), "session-".len() + 36);
    }

    #[test]
    fn test_cli_parsing() {
        let cli = Cli::try_parse_from(["orja", "--ephemeral", "ask", "set", "a", "timer"]).unwrap();
        assert!(cli.ephemeral);
        assert_eq!(cli.config, PathBuf::from("config/orja.yaml"));
        match cli.command {
            Some(Commands::Ask { text }) => assert_eq!(text.join(" "), "set a timer"),
            other => panic!("unexpected command: {other:?}"),
        }

        let cli = Cli::try_parse_from(["orja", "init-config", "--force"]).unwrap();
        assert!(matches!(cli.command, Some(Commands::InitConfig { force: true })));

        let cli = Cli::try_parse_from(["orja", "events", "--session", "session-1"]).unwrap();
        match cli.command {
            Some(Commands::Events { session, limit }) => {
                assert_eq!(session, "session-1");
                assert_eq!(limit, 20);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_init_config_writes_files_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("orja.yaml");
        init_config(&path, dir.path(), false).unwrap();
        assert!(init_config(&path, dir.path(), false).is_err());
        init_config(&path, dir.path(), true).unwrap();

        let config = OrjaConfig::from_yaml(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert!(dir.path().join(&config.prompts.dir).is_dir());
    }
}
