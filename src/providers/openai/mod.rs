
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

use super::{CompletionRequest, EmbeddingProvider, HttpTransport, LlmProvider, base_url};
use crate::config::{Config, ConfigError, OPENAI_API_KEY_ENV};

/// OpenAI-compatible client for `/embeddings` and `/chat/completions`
#[derive(Debug, Clone)]
pub struct OpenAiClient {
    base_url: Url,
    authorization: String,
    embedding_model: String,
    chat_model: String,
    embedding_id: String,
    chat_id: String,
    batch_size: usize,
    transport: HttpTransport,
}

#[derive(Debug, Serialize)]
struct EmbeddingsRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Debug, Deserialize)]
struct EmbeddingsResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
    index: usize,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    content: Option<String>,
}

impl OpenAiClient {
    #[inline]
    pub fn new(
        base: &str,
        api_key: &str,
        embedding_model: &str,
        chat_model: &str,
        batch_size: u32,
        transport: HttpTransport,
    ) -> Result<Self, ConfigError> {
        Ok(Self {
            base_url: base_url(base)?,
            authorization: format!("Bearer {}", api_key),
            embedding_model: embedding_model.to_string(),
            chat_model: chat_model.to_string(),
            embedding_id: format!("openai/{}", embedding_model),
            chat_id: format!("openai/{}", chat_model),
            batch_size: batch_size.max(1) as usize,
            transport,
        })
    }

    #[inline]
    pub fn from_config(config: &Config, transport: HttpTransport) -> Result<Self, ConfigError> {
        let api_key = config
            .secrets
            .openai_api_key
            .as_deref()
            .ok_or(ConfigError::MissingCredentials(OPENAI_API_KEY_ENV))?;

        Self::new(
            &config.openai.base_url,
            api_key,
            &config.openai.embedding_model,
            &config.openai.chat_model,
            config.openai.batch_size,
            transport,
        )
    }

    fn endpoint(&self, name: &str) -> Result<Url> {
        self.base_url
            .join(name)
            .with_context(|| format!("Failed to build {} URL", name))
    }
}

impl EmbeddingProvider for OpenAiClient {
    fn name(&self) -> &str {
        "openai"
    }

    fn model_id(&self) -> &str {
        &self.embedding_id
    }

    fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let url = self.endpoint("embeddings")?;
        let headers = [("Authorization", self.authorization.as_str())];

        let mut embeddings = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.batch_size) {
            debug!("Embedding {} texts with {}", batch.len(), self.embedding_model);

            let request = EmbeddingsRequest {
                model: &self.embedding_model,
                input: batch,
            };
            let response_text = self
                .transport
                .post_json(&url, &headers, &request)
                .context("OpenAI embedding request failed")?;
            let mut response: EmbeddingsResponse = serde_json::from_str(&response_text)
                .context("Failed to parse embeddings response")?;

            if response.data.len() != batch.len() {
                return Err(anyhow::anyhow!(
                    "Embedding count mismatch: expected {}, got {}",
                    batch.len(),
                    response.data.len()
                ));
            }

            response.data.sort_by_key(|item| item.index);
            embeddings.extend(response.data.into_iter().map(|item| item.embedding));
        }

        Ok(embeddings)
    }
}

impl LlmProvider for OpenAiClient {
    fn name(&self) -> &str {
        "openai"
    }

    fn model_id(&self) -> &str {
        &self.chat_id
    }

    fn complete(&self, request: &CompletionRequest) -> Result<String> {
        let url = self.endpoint("chat/completions")?;
        let headers = [("Authorization", self.authorization.as_str())];

        let mut messages = Vec::with_capacity(2);
        if !request.system.is_empty() {
            messages.push(ChatMessage {
                role: "system",
                content: &request.system,
            });
        }
        messages.push(ChatMessage {
            role: "user",
            content: &request.prompt,
        });

        let body = ChatRequest {
            model: &self.chat_model,
            messages,
            temperature: request.temperature,
            max_tokens: request.max_tokens,
        };

        let response_text = self
            .transport
            .post_json(&url, &headers, &body)
            .context("OpenAI chat request failed")?;
        let response: ChatResponse =
            serde_json::from_str(&response_text).context("Failed to parse chat response")?;

        response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| anyhow::anyhow!("OpenAI returned no completion"))
    }
}
