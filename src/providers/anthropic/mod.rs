
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use url::Url;

use super::{CompletionRequest, HttpTransport, LlmProvider, base_url};
use crate::config::{ANTHROPIC_API_KEY_ENV, Config, ConfigError};

const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Messages API client. Anthropic has no embedding endpoint, so this is an
/// LLM provider only.
#[derive(Debug, Clone)]
pub struct AnthropicClient {
    base_url: Url,
    api_key: String,
    model: String,
    model_id: String,
    max_tokens: u32,
    transport: HttpTransport,
}

#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    #[serde(skip_serializing_if = "str::is_empty")]
    system: &'a str,
    messages: [Message<'a>; 1],
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct Message<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: String,
}

impl AnthropicClient {
    #[inline]
    pub fn new(
        base: &str,
        api_key: &str,
        model: &str,
        max_tokens: u32,
        transport: HttpTransport,
    ) -> Result<Self, ConfigError> {
        Ok(Self {
            base_url: base_url(base)?,
            api_key: api_key.to_string(),
            model: model.to_string(),
            model_id: format!("anthropic/{}", model),
            max_tokens,
            transport,
        })
    }

    #[inline]
    pub fn from_config(config: &Config, transport: HttpTransport) -> Result<Self, ConfigError> {
        let api_key = config
            .secrets
            .anthropic_api_key
            .as_deref()
            .ok_or(ConfigError::MissingCredentials(ANTHROPIC_API_KEY_ENV))?;

        Self::new(
            &config.anthropic.base_url,
            api_key,
            &config.anthropic.model,
            config.anthropic.max_tokens,
            transport,
        )
    }
}

impl LlmProvider for AnthropicClient {
    fn name(&self) -> &str {
        "anthropic"
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }

    fn complete(&self, request: &CompletionRequest) -> Result<String> {
        let url = self
            .base_url
            .join("messages")
            .context("Failed to build messages URL")?;
        let headers = [
            ("x-api-key", self.api_key.as_str()),
            ("anthropic-version", ANTHROPIC_VERSION),
        ];

        let body = MessagesRequest {
            model: &self.model,
            max_tokens: request.max_tokens.unwrap_or(self.max_tokens),
            system: &request.system,
            messages: [Message {
                role: "user",
                content: &request.prompt,
            }],
            temperature: request.temperature,
        };

        let response_text = self
            .transport
            .post_json(&url, &headers, &body)
            .context("Anthropic request failed")?;
        let response: MessagesResponse =
            serde_json::from_str(&response_text).context("Failed to parse messages response")?;

        let text: String = response
            .content
            .into_iter()
            .filter(|block| block.kind == "text")
            .map(|block| block.text)
            .collect();

        if text.is_empty() {
            return Err(anyhow::anyhow!("Anthropic returned no text content"));
        }
        Ok(text)
    }
}
