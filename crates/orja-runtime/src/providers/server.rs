//! Persistent `llama-server` backend.
//!
//! The server process is started once, by [`LlamaServerProvider::start`]
//! (which the provider registry runs at construction), and reused by every
//! later call. A
//! single async mutex guards both the child handle and the readiness wait,
//! so concurrent first calls never spawn two processes. If the process has
//! exited, or is alive but no longer accepts connections, the next call
//! restarts it.

use async_trait::async_trait;
use backon::{ConstantBuilder, Retryable};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::process::Stdio;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::process::{Child, Command};
use tokio::sync::Mutex;

use orja_core::ChatTurn;

use super::chatml::{build_prompt, clean_completion, history_window, Sampling};
use super::{fallback_reply, GenerateOptions, LlmProvider, ProviderError};
use crate::config::{LlamaCppConfig, LlmConfig, ServerConfig};

/// Connect timeout for a single readiness probe.
const PROBE_TIMEOUT: Duration = Duration::from_secs(1);

/// Lifecycle of the managed server process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServerStatus {
    NotStarted,
    Starting,
    Ready,
    Crashed,
}

/// True if something accepts TCP connections at `address` within `timeout`.
pub async fn probe_tcp(address: &str, timeout: Duration) -> bool {
    matches!(
        tokio::time::timeout(timeout, TcpStream::connect(address)).await,
        Ok(Ok(_))
    )
}

/// Poll `address` every `poll_interval` until it accepts connections or
/// `startup_timeout` elapses.
async fn wait_until_ready(address: &str, config: &ServerConfig) -> Result<(), ProviderError> {
    let interval = config.poll_interval.max(Duration::from_millis(10));
    let attempts = (config.startup_timeout.as_millis() / interval.as_millis()).max(1) as usize;

    let probe = move || async move {
        if probe_tcp(address, PROBE_TIMEOUT).await {
            Ok(())
        } else {
            Err(ProviderError::Transport(format!("{address} not accepting connections")))
        }
    };

    let polling = probe
        .retry(
            ConstantBuilder::default()
                .with_delay(interval)
                .with_max_times(attempts),
        )
        .sleep(tokio::time::sleep);

    match tokio::time::timeout(config.startup_timeout, polling).await {
        Ok(Ok(())) => Ok(()),
        _ => Err(ProviderError::StartupTimeout {
            address: address.to_string(),
            timeout: config.startup_timeout,
        }),
    }
}

/// Body of `POST /completion`.
#[derive(Debug, Serialize)]
struct CompletionRequest<'a> {
    prompt: &'a str,
    n_predict: u32,
    temperature: f32,
    top_p: f32,
    repeat_penalty: f32,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct CompletionBody {
    content: Option<String>,
    completion: Option<String>,
}

/// Pull the generated text out of a completion response.
///
/// Servers report it under `content` or, in older builds, `completion`.
fn parse_completion_body(body: JsonValue) -> Result<String, ProviderError> {
    let body: CompletionBody = serde_json::from_value(body)
        .map_err(|e| ProviderError::MalformedResponse(e.to_string()))?;
    body.content.or(body.completion).ok_or_else(|| {
        ProviderError::MalformedResponse("response has neither content nor completion".to_string())
    })
}

/// HTTP client for the server's completion endpoint.
#[derive(Debug, Clone)]
pub struct CompletionClient {
    http: reqwest::Client,
    base_url: String,
    timeout: Duration,
}

impl CompletionClient {
    pub fn new(address: &str, timeout: Duration) -> Result<Self, ProviderError> {
        // loopback traffic must not go through an environment proxy
        let http = reqwest::Client::builder()
            .no_proxy()
            .build()
            .map_err(|e| ProviderError::Transport(e.to_string()))?;
        Ok(Self {
            http,
            base_url: format!("http://{address}"),
            timeout,
        })
    }

    async fn complete(&self, request: &CompletionRequest<'_>) -> Result<String, ProviderError> {
        let response = self
            .http
            .post(format!("{}/completion", self.base_url))
            .timeout(self.timeout)
            .json(request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ProviderError::Timeout(self.timeout)
                } else {
                    ProviderError::Transport(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(ProviderError::Transport(format!(
                "server returned {status}: {}",
                orja_core::text::prefix_chars(&text, 200)
            )));
        }

        let body: JsonValue = response.json().await.map_err(|e| {
            if e.is_timeout() {
                ProviderError::Timeout(self.timeout)
            } else {
                ProviderError::MalformedResponse(e.to_string())
            }
        })?;
        parse_completion_body(body)
    }
}

/// Provider backed by a long-lived `llama-server` process.
pub struct LlamaServerProvider {
    config: LlamaCppConfig,
    system_prompt: String,
    history_messages: usize,
    client: CompletionClient,
    child: Mutex<Option<Child>>,
    status: RwLock<ServerStatus>,
}

impl std::fmt::Debug for LlamaServerProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlamaServerProvider")
            .field("address", &self.config.server.address())
            .field("status", &self.status())
            .finish()
    }
}

impl LlamaServerProvider {
    /// Create the provider without starting the server.
    pub fn new(
        config: LlamaCppConfig,
        system_prompt: impl Into<String>,
        history_messages: usize,
    ) -> Result<Self, ProviderError> {
        let client = CompletionClient::new(&config.server.address(), config.timeout)?;
        Ok(Self {
            config,
            system_prompt: system_prompt.into(),
            history_messages,
            client,
            child: Mutex::new(None),
            status: RwLock::new(ServerStatus::NotStarted),
        })
    }

    pub fn from_config(llm: &LlmConfig) -> Result<Self, ProviderError> {
        Self::new(
            llm.llama_cpp.clone(),
            llm.system_prompt.clone(),
            llm.history_messages,
        )
    }

    pub fn status(&self) -> ServerStatus {
        *self.status.read()
    }

    fn set_status(&self, status: ServerStatus) {
        *self.status.write() = status;
    }

    /// Start the server now and wait until it accepts connections.
    pub async fn start(&self) -> Result<(), ProviderError> {
        self.ensure_ready().await
    }

    /// Stop the server process if one is running.
    pub async fn shutdown(&self) {
        let mut guard = self.child.lock().await;
        if let Some(mut child) = guard.take() {
            if let Err(e) = child.kill().await {
                tracing::warn!(error = %e, "Failed to stop llama-server");
            } else {
                tracing::info!("llama-server stopped");
            }
        }
        self.set_status(ServerStatus::NotStarted);
    }

    fn server_args(&self) -> Vec<String> {
        let server = &self.config.server;
        vec![
            "--model".to_string(),
            self.config.model_path.display().to_string(),
            "--host".to_string(),
            server.host.clone(),
            "--port".to_string(),
            server.port.to_string(),
            "--ctx-size".to_string(),
            self.config.ctx_size.to_string(),
            "--threads".to_string(),
            self.config.threads.to_string(),
            "--batch-size".to_string(),
            self.config.batch_size.to_string(),
        ]
    }

    /// Make sure a reachable server is running, spawning or restarting it
    /// as needed.
    async fn ensure_ready(&self) -> Result<(), ProviderError> {
        let address = self.config.server.address();
        let mut guard = self.child.lock().await;

        if let Some(child) = guard.as_mut() {
            match child.try_wait() {
                Ok(None) => {
                    if probe_tcp(&address, PROBE_TIMEOUT).await {
                        self.set_status(ServerStatus::Ready);
                        return Ok(());
                    }
                    tracing::warn!(address = %address, "llama-server unreachable, restarting");
                    if let Err(e) = child.kill().await {
                        tracing::warn!(error = %e, "Failed to kill unreachable llama-server");
                    }
                }
                Ok(Some(exit)) => {
                    tracing::warn!(status = %exit, "llama-server exited, restarting");
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Could not poll llama-server, restarting");
                }
            }
            *guard = None;
            self.set_status(ServerStatus::Crashed);
        }

        let binary = self.config.resolved_server_bin();
        if !binary.exists() {
            return Err(ProviderError::MissingArtifact {
                what: "llama-server binary",
                path: binary,
            });
        }
        if !self.config.model_path.exists() {
            return Err(ProviderError::MissingArtifact {
                what: "model file",
                path: self.config.model_path.clone(),
            });
        }

        tracing::info!(binary = %binary.display(), address = %address, "Starting llama-server");
        self.set_status(ServerStatus::Starting);

        let spawned = Command::new(&binary)
            .args(self.server_args())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn();
        let mut child = match spawned {
            Ok(child) => child,
            Err(source) => {
                self.set_status(ServerStatus::Crashed);
                return Err(ProviderError::Spawn {
                    binary,
                    source,
                });
            }
        };

        match wait_until_ready(&address, &self.config.server).await {
            Ok(()) => {
                tracing::info!(address = %address, "llama-server ready");
                *guard = Some(child);
                self.set_status(ServerStatus::Ready);
                Ok(())
            }
            Err(e) => {
                if let Err(kill_err) = child.kill().await {
                    tracing::warn!(error = %kill_err, "Failed to kill llama-server after startup timeout");
                }
                self.set_status(ServerStatus::Crashed);
                Err(e)
            }
        }
    }

    /// Generate without the fallback wrapper.
    pub async fn try_generate(
        &self,
        turns: &[ChatTurn],
        options: &GenerateOptions,
    ) -> Result<String, ProviderError> {
        self.ensure_ready().await?;

        let window = history_window(turns, self.history_messages);
        let system_prompt = options
            .system_prompt
            .as_deref()
            .unwrap_or(&self.system_prompt);
        let prompt = build_prompt(system_prompt, window);
        let sampling = Sampling::resolve(options, &self.config);

        let request = CompletionRequest {
            prompt: &prompt,
            n_predict: sampling.max_tokens,
            temperature: sampling.temperature,
            top_p: sampling.top_p,
            repeat_penalty: sampling.repeat_penalty,
            stream: false,
        };
        let raw = self.client.complete(&request).await?;
        Ok(clean_completion(&raw, &prompt))
    }
}

#[async_trait]
impl LlmProvider for LlamaServerProvider {
    async fn generate(
        &self,
        turns: &[ChatTurn],
        options: &GenerateOptions,
    ) -> Result<String, ProviderError> {
        match self.try_generate(turns, options).await {
            Ok(text) => Ok(text),
            Err(e) => {
                tracing::error!(provider = "llama_server", error = %e, "Generation failed, using fallback reply");
                Ok(fallback_reply(turns))
            }
        }
    }

    async fn initialize(&self) -> Result<(), ProviderError> {
        self.start().await
    }

    async fn health_check(&self) -> bool {
        self.status() == ServerStatus::Ready
            && probe_tcp(&self.config.server.address(), PROBE_TIMEOUT).await
    }

    fn name(&self) -> &str {
        "llama_server"
    }
}
