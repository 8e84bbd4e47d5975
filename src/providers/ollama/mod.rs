
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use url::Url;

use super::{CompletionRequest, EmbeddingProvider, HttpTransport, LlmProvider};
use crate::config::{ConfigError, OllamaConfig};

/// Client for a local Ollama server, serving both embeddings and chat
#[derive(Debug, Clone)]
pub struct OllamaClient {
    base_url: Url,
    embedding_model: String,
    chat_model: String,
    embedding_id: String,
    chat_id: String,
    batch_size: usize,
    transport: HttpTransport,
}

#[derive(Debug, Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    #[serde(rename = "input")]
    inputs: &'a [String],
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    system: &'a str,
    stream: bool,
    options: GenerateOptions,
}

#[derive(Debug, Serialize)]
struct GenerateOptions {
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    num_predict: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    response: String,
}

#[derive(Debug, Deserialize)]
pub struct ModelInfo {
    pub name: String,
    pub size: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct ModelsResponse {
    models: Vec<ModelInfo>,
}

impl OllamaClient {
    #[inline]
    pub fn new(config: &OllamaConfig, transport: HttpTransport) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            base_url: config.ollama_url()?,
            embedding_model: config.embedding_model.clone(),
            chat_model: config.chat_model.clone(),
            embedding_id: format!("ollama/{}", config.embedding_model),
            chat_id: format!("ollama/{}", config.chat_model),
            batch_size: config.batch_size as usize,
            transport,
        })
    }

    /// Check the server is reachable and both configured models are pulled
    #[inline]
    pub fn health_check(&self) -> Result<()> {
        let models = self.list_models().context("Failed to reach Ollama server")?;

        for wanted in [&self.embedding_model, &self.chat_model] {
            if !models.iter().any(|m| &m.name == wanted) {
                let available: Vec<&str> = models.iter().map(|m| m.name.as_str()).collect();
                warn!("Model {} not found. Available models: {:?}", wanted, available);
                return Err(anyhow::anyhow!(
                    "Model '{}' is not available. Available models: {:?}",
                    wanted,
                    available
                ));
            }
        }

        info!("Health check passed for Ollama server at {}", self.base_url);
        Ok(())
    }

    #[inline]
    pub fn list_models(&self) -> Result<Vec<ModelInfo>> {
        let url = self
            .base_url
            .join("/api/tags")
            .context("Failed to build models URL")?;

        let response_text = self
            .transport
            .get(&url, &[])
            .context("Failed to fetch models list")?;

        let response: ModelsResponse =
            serde_json::from_str(&response_text).context("Failed to parse models response")?;

        debug!("Found {} available models", response.models.len());
        Ok(response.models)
    }

    fn embed_batch(&self, url: &Url, batch: &[String]) -> Result<Vec<Vec<f32>>> {
        let request = EmbedRequest {
            model: &self.embedding_model,
            inputs: batch,
        };

        let response_text = self
            .transport
            .post_json(url, &[], &request)
            .context("Failed to generate embeddings")?;

        let response: EmbedResponse =
            serde_json::from_str(&response_text).context("Failed to parse embed response")?;

        if response.embeddings.len() != batch.len() {
            return Err(anyhow::anyhow!(
                "Embedding count mismatch: expected {}, got {}",
                batch.len(),
                response.embeddings.len()
            ));
        }

        Ok(response.embeddings)
    }
}

impl EmbeddingProvider for OllamaClient {
    fn name(&self) -> &str {
        "ollama"
    }

    fn model_id(&self) -> &str {
        &self.embedding_id
    }

    fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let url = self
            .base_url
            .join("/api/embed")
            .context("Failed to build embed URL")?;

        let mut embeddings = Vec::with_capacity(texts.len());
        for (batch_index, batch) in texts.chunks(self.batch_size.max(1)).enumerate() {
            debug!(
                "Embedding batch {} ({} texts) with {}",
                batch_index + 1,
                batch.len(),
                self.embedding_model
            );
            embeddings.extend(self.embed_batch(&url, batch)?);
        }

        Ok(embeddings)
    }
}

impl LlmProvider for OllamaClient {
    fn name(&self) -> &str {
        "ollama"
    }

    fn model_id(&self) -> &str {
        &self.chat_id
    }

    fn complete(&self, request: &CompletionRequest) -> Result<String> {
        let url = self
            .base_url
            .join("/api/generate")
            .context("Failed to build generate URL")?;

        let body = GenerateRequest {
            model: &self.chat_model,
            prompt: &request.prompt,
            system: &request.system,
            stream: false,
            options: GenerateOptions {
                temperature: request.temperature,
                num_predict: request.max_tokens,
            },
        };

        let response_text = self
            .transport
            .post_json(&url, &[], &body)
            .context("Ollama generation failed")?;

        let response: GenerateResponse =
            serde_json::from_str(&response_text).context("Failed to parse generate response")?;

        Ok(response.response)
    }
}
