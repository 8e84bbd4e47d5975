// Configuration management module
// TOML settings, environment overrides and a printable summary for the CLI

pub mod settings;

pub use settings::{
    ANTHROPIC_API_KEY_ENV, API_TOKEN_ENV, AnthropicConfig, Config, ConfigError,
    EmbeddingProviderKind, HistoryConfig, LlmProviderKind, OPENAI_API_KEY_ENV, OllamaConfig,
    OpenAiConfig, ProvidersConfig, RetrievalConfig, ServerConfig, StorageConfig,
};

use console::style;

/// Print the effective configuration, masking secrets
#[inline]
pub fn show_config(config: &Config) {
    eprintln!("{}", style("AKAS configuration").bold().cyan());
    eprintln!("  File: {}", config.config_file_path().display());
    eprintln!();

    eprintln!("{}", style("Server").bold().yellow());
    eprintln!("  Listen: {}:{}", config.server.host, config.server.port);
    eprintln!(
        "  Shared token: {}",
        if config.server.api_token.is_some() {
            "set"
        } else {
            "not set"
        }
    );
    eprintln!("  Query timeout: {}s", config.server.query_timeout_secs);
    eprintln!();

    eprintln!("{}", style("Providers").bold().yellow());
    eprintln!("  Embedding: {:?}", config.providers.embedding);
    eprintln!("  LLM: {}", config.providers.llm.as_str());
    eprintln!(
        "  Ollama: {}://{}:{} (embed {}, chat {})",
        config.ollama.protocol,
        config.ollama.host,
        config.ollama.port,
        config.ollama.embedding_model,
        config.ollama.chat_model
    );
    eprintln!(
        "  OpenAI key: {}",
        mask(config.secrets.openai_api_key.is_some())
    );
    eprintln!(
        "  Anthropic key: {}",
        mask(config.secrets.anthropic_api_key.is_some())
    );
    eprintln!();

    eprintln!("{}", style("Retrieval").bold().yellow());
    eprintln!(
        "  Chunk size: {} (overlap {})",
        config.chunking.chunk_size, config.chunking.overlap
    );
    eprintln!("  Default k: {}", config.retrieval.default_k);
    eprintln!(
        "  Max context: {} chars",
        config.retrieval.max_context_chars
    );
    eprintln!("  Index: {}", config.index_path().display());
}

fn mask(present: bool) -> console::StyledObject<&'static str> {
    if present {
        style("present").green()
    } else {
        style("missing").red()
    }
}
