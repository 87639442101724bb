//! Provider factory pattern for selecting the inference backend by name.
//!
//! ## Usage
//!
//! ```ignore
//! let registry = ProviderRegistry::with_defaults();
//! let provider = registry.create_from_config(&config.llm).await?;
//! ```

use std::collections::BTreeMap;
use std::sync::Arc;

use super::{
    LlamaCliProvider, LlamaServerProvider, LlmProvider, PlaceholderProvider, ProviderError,
};
use crate::config::LlmConfig;

/// Factory for creating LLM providers from configuration.
///
/// `create` never starts a process; [`ProviderRegistry::create_from_config`]
/// initializes the provider afterwards.
pub trait ProviderFactory: Send + Sync {
    /// Unique backend name, as written in `llm.backend`.
    fn provider_type(&self) -> &'static str;

    /// Create a provider instance.
    fn create(&self, config: &LlmConfig) -> Result<Arc<dyn LlmProvider>, ProviderError>;

    /// Check that the files this backend needs exist.
    fn validate_config(&self, _config: &LlmConfig) -> Result<(), ProviderError> {
        Ok(())
    }

    /// Human-readable description of this provider.
    fn description(&self) -> &'static str {
        "LLM Provider"
    }
}

struct PlaceholderFactory;

impl ProviderFactory for PlaceholderFactory {
    fn provider_type(&self) -> &'static str {
        "placeholder"
    }

    fn create(&self, _config: &LlmConfig) -> Result<Arc<dyn LlmProvider>, ProviderError> {
        Ok(Arc::new(PlaceholderProvider::new()))
    }

    fn description(&self) -> &'static str {
        "Canned replies, no model required"
    }
}

struct LlamaCliFactory;

impl ProviderFactory for LlamaCliFactory {
    fn provider_type(&self) -> &'static str {
        "llama_cpp_cli"
    }

    fn create(&self, config: &LlmConfig) -> Result<Arc<dyn LlmProvider>, ProviderError> {
        Ok(Arc::new(LlamaCliProvider::from_config(config)))
    }

    fn validate_config(&self, config: &LlmConfig) -> Result<(), ProviderError> {
        require(&config.llama_cpp.bin_path, "llama-cli binary")?;
        require(&config.llama_cpp.model_path, "model file")
    }

    fn description(&self) -> &'static str {
        "One llama-cli subprocess per request"
    }
}

struct LlamaServerFactory;

impl ProviderFactory for LlamaServerFactory {
    fn provider_type(&self) -> &'static str {
        "llama_server"
    }

    fn create(&self, config: &LlmConfig) -> Result<Arc<dyn LlmProvider>, ProviderError> {
        Ok(Arc::new(LlamaServerProvider::from_config(config)?))
    }

    fn validate_config(&self, config: &LlmConfig) -> Result<(), ProviderError> {
        require(&config.llama_cpp.resolved_server_bin(), "llama-server binary")?;
        require(&config.llama_cpp.model_path, "model file")
    }

    fn description(&self) -> &'static str {
        "Persistent llama-server over HTTP"
    }
}

fn require(path: &std::path::Path, what: &'static str) -> Result<(), ProviderError> {
    if path.exists() {
        Ok(())
    } else {
        Err(ProviderError::MissingArtifact {
            what,
            path: path.to_path_buf(),
        })
    }
}

/// Registry of available provider factories.
#[derive(Default)]
pub struct ProviderRegistry {
    factories: BTreeMap<String, Arc<dyn ProviderFactory>>,
}

impl ProviderRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry with the built-in backends registered.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(PlaceholderFactory));
        registry.register(Arc::new(LlamaCliFactory));
        registry.register(Arc::new(LlamaServerFactory));
        registry
    }

    /// Register a provider factory, replacing one of the same type.
    pub fn register(&mut self, factory: Arc<dyn ProviderFactory>) {
        self.factories
            .insert(factory.provider_type().to_string(), factory);
    }

    /// Create a provider by backend name.
    pub fn create(
        &self,
        provider_type: &str,
        config: &LlmConfig,
    ) -> Result<Arc<dyn LlmProvider>, ProviderError> {
        self.factory(provider_type)?.create(config)
    }

    /// Backend name to use for `config`.
    ///
    /// `llama_cpp_cli` with the server enabled selects `llama_server`.
    pub fn resolve_backend(config: &LlmConfig) -> &str {
        match config.backend.as_str() {
            "llama_cpp_cli" if config.llama_cpp.server.enabled => "llama_server",
            other => other,
        }
    }

    /// Create and initialize the provider selected by `config.backend`.
    ///
    /// A server backend is started here; if it never becomes ready the
    /// error (e.g. [`ProviderError::StartupTimeout`]) is returned and no
    /// provider is handed out.
    pub async fn create_from_config(
        &self,
        config: &LlmConfig,
    ) -> Result<Arc<dyn LlmProvider>, ProviderError> {
        let backend = Self::resolve_backend(config);
        if let Err(e) = self.validate(backend, config) {
            // still usable: the provider falls back per call
            tracing::warn!(backend = backend, error = %e, "Backend not ready");
        }
        let provider = self.create(backend, config)?;
        provider.initialize().await?;
        tracing::info!(backend = provider.name(), "Inference provider selected");
        Ok(provider)
    }

    /// Validate configuration for a provider type.
    pub fn validate(&self, provider_type: &str, config: &LlmConfig) -> Result<(), ProviderError> {
        self.factory(provider_type)?.validate_config(config)
    }

    fn factory(&self, provider_type: &str) -> Result<&Arc<dyn ProviderFactory>, ProviderError> {
        self.factories.get(provider_type).ok_or_else(|| {
            ProviderError::NotConfigured(format!(
                "Unknown provider type: '{}'. Available: {:?}",
                provider_type,
                self.available_types()
            ))
        })
    }

    /// List available provider types.
    pub fn available_types(&self) -> Vec<&str> {
        self.factories.keys().map(|s| s.as_str()).collect()
    }

    /// Description of a registered provider type.
    pub fn description(&self, provider_type: &str) -> Option<&'static str> {
        self.factories.get(provider_type).map(|f| f.description())
    }
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("providers", &self.available_types())
            .finish()
    }
}
