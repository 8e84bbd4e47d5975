// Provider module
// External embedding and completion services behind two small capabilities,
// one implementation per vendor, chosen from configuration at startup

pub mod anthropic;
pub mod http;
pub mod ollama;
pub mod openai;

use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;

use crate::config::{Config, ConfigError, EmbeddingProviderKind, LlmProviderKind};

pub use anthropic::AnthropicClient;
pub use http::HttpTransport;
pub use ollama::OllamaClient;
pub use openai::OpenAiClient;

/// Turns text into fixed-length vectors
pub trait EmbeddingProvider: Send + Sync {
    /// Short vendor name, e.g. "ollama"
    fn name(&self) -> &str;

    /// Vendor-qualified model identifier, persisted alongside the index
    fn model_id(&self) -> &str;

    /// Embed every input, preserving order. Fails as a whole if any input fails.
    fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// Turns a prompt into a completion
pub trait LlmProvider: Send + Sync {
    fn name(&self) -> &str;

    fn model_id(&self) -> &str;

    fn complete(&self, request: &CompletionRequest) -> Result<String>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub system: String,
    pub prompt: String,
    pub temperature: f32,
    pub max_tokens: Option<u32>,
}

fn transport(config: &Config) -> HttpTransport {
    HttpTransport::new(
        Duration::from_secs(config.providers.timeout_secs),
        config.providers.retry_attempts,
    )
}

/// Build the embedding provider selected in `[providers]`
#[inline]
pub fn build_embedding_provider(
    config: &Config,
) -> Result<Arc<dyn EmbeddingProvider>, ConfigError> {
    let transport = transport(config);
    match config.providers.embedding {
        EmbeddingProviderKind::Ollama => {
            Ok(Arc::new(OllamaClient::new(&config.ollama, transport)?))
        }
        EmbeddingProviderKind::OpenAi => Ok(Arc::new(OpenAiClient::from_config(config, transport)?)),
    }
}

/// Build the LLM provider selected in `[providers]`
#[inline]
pub fn build_llm_provider(config: &Config) -> Result<Arc<dyn LlmProvider>, ConfigError> {
    let transport = transport(config);
    match config.providers.llm {
        LlmProviderKind::Ollama => Ok(Arc::new(OllamaClient::new(&config.ollama, transport)?)),
        LlmProviderKind::OpenAi => Ok(Arc::new(OpenAiClient::from_config(config, transport)?)),
        LlmProviderKind::Anthropic => {
            Ok(Arc::new(AnthropicClient::from_config(config, transport)?))
        }
    }
}

/// Parse a base URL, forcing a trailing slash so `join` appends
pub(crate) fn base_url(raw: &str) -> Result<url::Url, ConfigError> {
    let normalized = if raw.ends_with('/') {
        raw.to_string()
    } else {
        format!("{}/", raw)
    };
    url::Url::parse(&normalized).map_err(|_| ConfigError::InvalidUrl(raw.to_string()))
}
