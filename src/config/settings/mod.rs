
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use url::Url;

use crate::ingest::splitter::SplitterConfig;

pub const OPENAI_API_KEY_ENV: &str = "OPENAI_API_KEY";
pub const ANTHROPIC_API_KEY_ENV: &str = "ANTHROPIC_API_KEY";
pub const API_TOKEN_ENV: &str = "AKAS_API_TOKEN";
pub const HOME_ENV: &str = "AKAS_HOME";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub providers: ProvidersConfig,
    #[serde(default)]
    pub ollama: OllamaConfig,
    #[serde(default)]
    pub openai: OpenAiConfig,
    #[serde(default)]
    pub anthropic: AnthropicConfig,
    #[serde(default)]
    pub chunking: SplitterConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub history: HistoryConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(skip)]
    pub base_dir: PathBuf,
    #[serde(skip)]
    pub secrets: Secrets,
}

/// Credentials resolved from the environment, never written to disk
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Secrets {
    pub openai_api_key: Option<String>,
    pub anthropic_api_key: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Shared bearer token; when set every `/api` route but health requires it
    pub api_token: Option<String>,
    pub cors_allow_any: bool,
    pub query_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8000,
            api_token: None,
            cors_allow_any: true,
            query_timeout_secs: 120,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingProviderKind {
    Ollama,
    OpenAi,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LlmProviderKind {
    Ollama,
    OpenAi,
    Anthropic,
}

impl LlmProviderKind {
    #[inline]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ollama => "ollama",
            Self::OpenAi => "openai",
            Self::Anthropic => "anthropic",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ProvidersConfig {
    pub embedding: EmbeddingProviderKind,
    pub llm: LlmProviderKind,
    pub timeout_secs: u64,
    pub retry_attempts: u32,
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        Self {
            embedding: EmbeddingProviderKind::Ollama,
            llm: LlmProviderKind::Ollama,
            timeout_secs: 60,
            retry_attempts: 2,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct OllamaConfig {
    pub protocol: String,
    pub host: String,
    pub port: u16,
    pub embedding_model: String,
    pub chat_model: String,
    pub batch_size: u32,
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            protocol: "http".to_string(),
            host: "localhost".to_string(),
            port: 11434,
            embedding_model: "nomic-embed-text:latest".to_string(),
            chat_model: "llama3.1:8b".to_string(),
            batch_size: 16,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct OpenAiConfig {
    pub base_url: String,
    pub embedding_model: String,
    pub chat_model: String,
    pub batch_size: u32,
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1/".to_string(),
            embedding_model: "text-embedding-3-small".to_string(),
            chat_model: "gpt-4o-mini".to_string(),
            batch_size: 64,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AnthropicConfig {
    pub base_url: String,
    pub model: String,
    pub max_tokens: u32,
}

impl Default for AnthropicConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.anthropic.com/v1/".to_string(),
            model: "claude-3-5-haiku-latest".to_string(),
            max_tokens: 1024,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RetrievalConfig {
    pub default_k: usize,
    pub max_context_chars: usize,
    pub mmr_lambda: f32,
    pub mmr_fetch_multiplier: usize,
    pub temperature: f32,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            default_k: 5,
            max_context_chars: 6000,
            mmr_lambda: 0.5,
            mmr_fetch_multiplier: 3,
            temperature: 0.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct HistoryConfig {
    pub max_queries: usize,
    pub max_feedback: usize,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            max_queries: 100,
            max_feedback: 1000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct StorageConfig {
    /// Persist the index after every ingest that added records
    pub autosave: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self { autosave: true }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration directory not found or could not be created")]
    DirectoryError,
    #[error("Invalid URL format: {0}")]
    InvalidUrl(String),
    #[error("Invalid port: {0} (must be between 1 and 65535)")]
    InvalidPort(u16),
    #[error("Invalid batch size: {0} (must be between 1 and 1000)")]
    InvalidBatchSize(u32),
    #[error("Invalid model name: {0} (cannot be empty)")]
    InvalidModel(String),
    #[error("Invalid protocol: {0} (must be 'http' or 'https')")]
    InvalidProtocol(String),
    #[error("Invalid chunk size: {0} (must be between 1 and 100000)")]
    InvalidChunkSize(usize),
    #[error("Overlap ({0}) must be smaller than chunk size ({1})")]
    OverlapTooLarge(usize, usize),
    #[error("Invalid default k: {0} (must be between 1 and 20)")]
    InvalidDefaultK(usize),
    #[error("Invalid max context size: {0} (must be at least 100 characters)")]
    InvalidContextSize(usize),
    #[error("Invalid MMR lambda: {0} (must be between 0.0 and 1.0)")]
    InvalidMmrLambda(f32),
    #[error("Invalid timeout: {0} (must be between 1 and 600 seconds)")]
    InvalidTimeout(u64),
    #[error("Invalid history capacity: {0} (must be between 1 and 100000)")]
    InvalidHistoryCapacity(usize),
    #[error("Missing credentials: {0} is not set")]
    MissingCredentials(&'static str),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parsing error: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("TOML serialization error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            providers: ProvidersConfig::default(),
            ollama: OllamaConfig::default(),
            openai: OpenAiConfig::default(),
            anthropic: AnthropicConfig::default(),
            chunking: SplitterConfig::default(),
            retrieval: RetrievalConfig::default(),
            history: HistoryConfig::default(),
            storage: StorageConfig::default(),
            base_dir: PathBuf::new(),
            secrets: Secrets::default(),
        }
    }
}

impl Config {
    /// Default base directory: `$AKAS_HOME`, else `~/.akas`
    #[inline]
    pub fn default_dir() -> Result<PathBuf, ConfigError> {
        if let Ok(home) = std::env::var(HOME_ENV) {
            if !home.trim().is_empty() {
                return Ok(PathBuf::from(home));
            }
        }
        dirs::home_dir()
            .map(|home| home.join(".akas"))
            .or_else(|| dirs::data_dir().map(|data| data.join("akas")))
            .ok_or(ConfigError::DirectoryError)
    }

    /// Load `config.toml` from `config_dir`, falling back to defaults when the
    /// file does not exist, then apply environment overrides.
    #[inline]
    pub fn load<P: AsRef<Path>>(config_dir: P) -> Result<Self> {
        let config_path = config_dir.as_ref().join("config.toml");

        let mut config = if config_path.exists() {
            let content = fs::read_to_string(&config_path).with_context(|| {
                format!("Failed to read config file: {}", config_path.display())
            })?;
            toml::from_str::<Config>(&content).with_context(|| {
                format!("Failed to parse config file: {}", config_path.display())
            })?
        } else {
            Self::default()
        };
        config.base_dir = config_dir.as_ref().to_path_buf();
        config.apply_env_overrides();

        config
            .validate()
            .with_context(|| "Configuration validation failed")?;

        Ok(config)
    }

    /// Read credentials and the shared token from the environment
    #[inline]
    pub fn apply_env_overrides(&mut self) {
        self.secrets.openai_api_key = non_empty_env(OPENAI_API_KEY_ENV);
        self.secrets.anthropic_api_key = non_empty_env(ANTHROPIC_API_KEY_ENV);
        if let Some(token) = non_empty_env(API_TOKEN_ENV) {
            self.server.api_token = Some(token);
        }
    }

    #[inline]
    pub fn save(&self) -> Result<()> {
        self.validate()
            .context("Configuration validation failed before saving")?;

        let config_dir = self.get_base_dir();

        fs::create_dir_all(config_dir).with_context(|| {
            format!(
                "Failed to create config directory: {}",
                config_dir.display()
            )
        })?;

        let config_path = self.config_file_path();
        let content = toml::to_string_pretty(self).context("Failed to serialize config to TOML")?;

        fs::write(&config_path, content)
            .with_context(|| format!("Failed to write config file: {}", config_path.display()))?;

        Ok(())
    }

    /// Get the base directory for the application
    #[inline]
    pub fn get_base_dir(&self) -> &Path {
        &self.base_dir
    }

    #[inline]
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.ollama.validate()?;
        self.chunking
            .validate()
            .map_err(|_| self.chunking_error())?;
        self.validate_retrieval()?;
        self.validate_limits()?;
        Ok(())
    }

    fn chunking_error(&self) -> ConfigError {
        if self.chunking.chunk_size == 0 || self.chunking.chunk_size > 100_000 {
            ConfigError::InvalidChunkSize(self.chunking.chunk_size)
        } else {
            ConfigError::OverlapTooLarge(self.chunking.overlap, self.chunking.chunk_size)
        }
    }

    fn validate_retrieval(&self) -> Result<(), ConfigError> {
        let retrieval = &self.retrieval;

        if !(1..=20).contains(&retrieval.default_k) {
            return Err(ConfigError::InvalidDefaultK(retrieval.default_k));
        }

        if retrieval.max_context_chars < 100 {
            return Err(ConfigError::InvalidContextSize(retrieval.max_context_chars));
        }

        if !(0.0..=1.0).contains(&retrieval.mmr_lambda) {
            return Err(ConfigError::InvalidMmrLambda(retrieval.mmr_lambda));
        }

        Ok(())
    }

    fn validate_limits(&self) -> Result<(), ConfigError> {
        for timeout in [self.providers.timeout_secs, self.server.query_timeout_secs] {
            if !(1..=600).contains(&timeout) {
                return Err(ConfigError::InvalidTimeout(timeout));
            }
        }

        for capacity in [self.history.max_queries, self.history.max_feedback] {
            if !(1..=100_000).contains(&capacity) {
                return Err(ConfigError::InvalidHistoryCapacity(capacity));
            }
        }

        if self.server.port == 0 {
            return Err(ConfigError::InvalidPort(self.server.port));
        }

        Ok(())
    }

    /// Check that the selected providers can actually be constructed.
    ///
    /// Run once at startup so a missing key fails fast instead of on the first
    /// query.
    #[inline]
    pub fn validate_credentials(&self) -> Result<(), ConfigError> {
        let needs_openai = self.providers.embedding == EmbeddingProviderKind::OpenAi
            || self.providers.llm == LlmProviderKind::OpenAi;
        if needs_openai && self.secrets.openai_api_key.is_none() {
            return Err(ConfigError::MissingCredentials(OPENAI_API_KEY_ENV));
        }

        if self.providers.llm == LlmProviderKind::Anthropic
            && self.secrets.anthropic_api_key.is_none()
        {
            return Err(ConfigError::MissingCredentials(ANTHROPIC_API_KEY_ENV));
        }

        Ok(())
    }

    /// LLM providers that have what they need to run
    #[inline]
    pub fn available_llm_providers(&self) -> Vec<LlmProviderKind> {
        let mut providers = vec![LlmProviderKind::Ollama];
        if self.secrets.openai_api_key.is_some() {
            providers.push(LlmProviderKind::OpenAi);
        }
        if self.secrets.anthropic_api_key.is_some() {
            providers.push(LlmProviderKind::Anthropic);
        }
        providers
    }

    #[inline]
    pub fn config_file_path(&self) -> PathBuf {
        self.get_base_dir().join("config.toml")
    }

    /// Directory holding the persisted vector index snapshot
    #[inline]
    pub fn index_path(&self) -> PathBuf {
        self.get_base_dir().join("index")
    }

    /// Directory where uploaded files are saved before processing
    #[inline]
    pub fn uploads_path(&self) -> PathBuf {
        self.get_base_dir().join("uploads")
    }
}

impl OllamaConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.protocol != "http" && self.protocol != "https" {
            return Err(ConfigError::InvalidProtocol(self.protocol.clone()));
        }

        let url_str = format!("{}://{}:{}", self.protocol, self.host, self.port);
        Url::parse(&url_str).map_err(|_| ConfigError::InvalidUrl(url_str))?;

        if self.port == 0 {
            return Err(ConfigError::InvalidPort(self.port));
        }

        for model in [&self.embedding_model, &self.chat_model] {
            if model.trim().is_empty() {
                return Err(ConfigError::InvalidModel(model.clone()));
            }
        }

        if self.batch_size == 0 || self.batch_size > 1000 {
            return Err(ConfigError::InvalidBatchSize(self.batch_size));
        }

        Ok(())
    }

    pub fn ollama_url(&self) -> Result<Url, ConfigError> {
        let url_str = format!("{}://{}:{}", self.protocol, self.host, self.port);
        Url::parse(&url_str).map_err(|_| ConfigError::InvalidUrl(url_str))
    }
}

fn non_empty_env(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}
