use std::time::Duration;

use async_trait::async_trait;

use remorph_types::{ProviderConfig, RemorphError, Result};

use crate::{AnthropicClient, OllamaClient, OpenAiClient};

// ---------------------------------------------------------------------------
// ProviderClient
// ---------------------------------------------------------------------------

/// Uniform interface over the supported LLM backends.
///
/// `generate` is one full prompt round trip returning the model's text reply.
/// It fails on network, auth, or malformed-response conditions; it never
/// fails merely because the requested model name is unknown to the backend
/// (the probe warns about that instead).
#[async_trait]
pub trait ProviderClient: Send + Sync {
    async fn generate(&self, prompt: &str, system: Option<&str>) -> Result<String>;

    /// Best-effort reachability probe, run once when the provider is
    /// constructed. A `false` here is logged by callers and never aborts.
    async fn test_connection(&self) -> bool;

    fn name(&self) -> &str;
    fn model(&self) -> &str;
}

// ---------------------------------------------------------------------------
// DynProvider
// ---------------------------------------------------------------------------

pub struct DynProvider(Box<dyn ProviderClient>);

impl std::fmt::Debug for DynProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DynProvider")
            .field("name", &self.0.name())
            .field("model", &self.0.model())
            .finish()
    }
}

impl DynProvider {
    pub fn new(client: impl ProviderClient + 'static) -> Self {
        Self(Box::new(client))
    }

    /// Build the client selected by `config`. `timeout` applies to the
    /// OpenAI and Anthropic request paths; the Ollama path carries its own
    /// fixed timeout. Fails fast with a configuration error when a required
    /// credential is empty.
    pub fn from_config(config: &ProviderConfig, timeout: Duration) -> Result<Self> {
        match config {
            ProviderConfig::Ollama { host, model } => {
                Ok(Self::new(OllamaClient::new(host.clone(), model.clone())))
            }
            ProviderConfig::OpenAi { api_key, model } => {
                if api_key.is_empty() {
                    return Err(RemorphError::Config(
                        "missing API key for openai (set OPENAI_API_KEY)".into(),
                    ));
                }
                Ok(Self::new(
                    OpenAiClient::new(api_key.clone(), model.clone()).with_timeout(timeout),
                ))
            }
            ProviderConfig::Anthropic { api_key, model } => {
                if api_key.is_empty() {
                    return Err(RemorphError::Config(
                        "missing API key for anthropic (set ANTHROPIC_API_KEY)".into(),
                    ));
                }
                Ok(Self::new(
                    AnthropicClient::new(api_key.clone(), model.clone()).with_timeout(timeout),
                ))
            }
        }
    }

    /// `from_config` plus the construction-time reachability probe. A failed
    /// probe is logged and the provider is returned anyway.
    pub async fn connect(config: &ProviderConfig, timeout: Duration) -> Result<Self> {
        let provider = Self::from_config(config, timeout)?;
        if provider.test_connection().await {
            tracing::info!(
                provider = provider.name(),
                model = provider.model(),
                "provider reachable"
            );
        } else {
            tracing::warn!(
                provider = provider.name(),
                model = provider.model(),
                "provider connection probe failed, continuing anyway"
            );
        }
        Ok(provider)
    }

    pub async fn generate(&self, prompt: &str, system: Option<&str>) -> Result<String> {
        self.0.generate(prompt, system).await
    }

    pub async fn test_connection(&self) -> bool {
        self.0.test_connection().await
    }

    pub fn name(&self) -> &str {
        self.0.name()
    }

    pub fn model(&self) -> &str {
        self.0.model()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
