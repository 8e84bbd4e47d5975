use anyhow::{Context, Result};
use console::style;
use std::time::Duration;
use tracing::{info, warn};

use crate::config::{Config, EmbeddingProviderKind, LlmProviderKind};
use crate::index::{IndexError, SearchType, snapshot};
use crate::pipeline::{InputStatus, Pipeline};
use crate::providers::{HttpTransport, OllamaClient, build_embedding_provider, build_llm_provider};

/// Build the pipeline from configuration and load the saved index, if any
async fn open_pipeline(config: &Config) -> Result<Pipeline> {
    let embedder = build_embedding_provider(config).context("Failed to set up embeddings")?;
    let llm = build_llm_provider(config).context("Failed to set up the LLM")?;
    let pipeline = Pipeline::from_config(config, embedder, llm);

    let restored = pipeline
        .restore_or_empty()
        .await
        .context("Failed to restore the saved index")?;
    info!("Loaded {} records", restored);
    Ok(pipeline)
}

/// Run the HTTP service until interrupted
#[inline]
pub async fn serve(config: &Config) -> Result<()> {
    crate::server::serve(config).await
}

/// Ingest files, directories or URLs into the saved index
#[inline]
pub async fn ingest_inputs(config: &Config, inputs: &[String]) -> Result<()> {
    let pipeline = open_pipeline(config).await?;
    let report = pipeline.ingest(inputs).await?;

    for input in &report.inputs {
        match input.status {
            InputStatus::Processed => println!(
                "{} {} ({} documents, {} chunks{})",
                style("✓").green(),
                input.input,
                input.documents,
                input.chunks_created,
                if input.chunks_skipped > 0 {
                    format!(", {} skipped", input.chunks_skipped)
                } else {
                    String::new()
                }
            ),
            InputStatus::Error | InputStatus::Saved => println!(
                "{} {}: {}",
                style("✗").red(),
                input.input,
                input.error.as_deref().unwrap_or("not processed")
            ),
        }
    }
    println!();
    println!(
        "Added {} chunks. Index is {}.",
        report.total_chunks,
        style(report.stage).bold()
    );

    if let Some(error) = &report.persist_error {
        warn!("Index was not saved: {}", error);
        println!("{} index was not saved: {}", style("Warning:").yellow(), error);
    } else if !config.storage.autosave && report.total_chunks > 0 {
        pipeline.persist().await.context("Failed to save the index")?;
    }

    Ok(())
}

/// Answer one question against the saved index
#[inline]
pub async fn ask_question(
    config: &Config,
    question: &str,
    k: Option<usize>,
    search_type: SearchType,
) -> Result<()> {
    let pipeline = open_pipeline(config).await?;
    let answer = pipeline.ask(question, k, search_type).await?;

    println!("{}", answer.answer);
    println!();
    if !answer.sources.is_empty() {
        println!("{}", style("Sources:").bold());
        for (i, source) in answer.sources.iter().enumerate() {
            println!(
                "  [{}] {} (chunk {}, score {:.3})",
                i + 1,
                source.source,
                source.chunk_index,
                source.score
            );
        }
    }
    println!(
        "{}",
        style(format!("Answered in {:.2}s", answer.processing_time)).dim()
    );

    Ok(())
}

/// Print what is saved on disk and whether the providers are reachable
#[inline]
pub async fn show_status(config: &Config) -> Result<()> {
    println!("{}", style("AKAS status").bold().cyan());
    println!();

    let location = config.index_path();
    println!("{}", style("Index").bold().yellow());
    println!("  Location: {}", location.display());
    match snapshot::read_manifest(&location) {
        Ok(manifest) => {
            println!("  Records: {}", manifest.record_count);
            println!(
                "  Embedding model: {}",
                manifest.model_id.as_deref().unwrap_or("(none)")
            );
            println!("  Dimension: {}", manifest.dimension);
            println!("  Saved: {}", manifest.written_at.to_rfc3339());
        }
        Err(IndexError::Missing(_)) => println!("  {}", style("Nothing ingested yet").dim()),
        Err(e) => println!("  {} {}", style("Unreadable:").red(), e),
    }
    println!();

    println!("{}", style("Providers").bold().yellow());
    println!("  Embedding: {:?}", config.providers.embedding);
    println!("  LLM: {}", config.providers.llm.as_str());
    match config.validate_credentials() {
        Ok(()) => println!("  Credentials: {}", style("ok").green()),
        Err(e) => println!("  Credentials: {}", style(e).red()),
    }

    let uses_ollama = config.providers.embedding == EmbeddingProviderKind::Ollama
        || config.providers.llm == LlmProviderKind::Ollama;
    if uses_ollama {
        let transport = HttpTransport::new(Duration::from_secs(config.providers.timeout_secs), 0);
        let client = OllamaClient::new(&config.ollama, transport)?;
        let check = tokio::task::spawn_blocking(move || client.health_check())
            .await
            .context("Health check task failed")?;
        match check {
            Ok(()) => println!("  Ollama: {}", style("reachable, models present").green()),
            Err(e) => println!("  Ollama: {} ({:#})", style("unavailable").red(), e),
        }
    }

    Ok(())
}

/// Write the effective configuration to `config.toml`
#[inline]
pub fn init_config(config: &Config) -> Result<()> {
    let path = config.config_file_path();
    if path.exists() {
        println!("Configuration already exists at {}", path.display());
        return Ok(());
    }
    // With no file yet, a token can only have come from the environment
    let mut fresh = config.clone();
    fresh.server.api_token = None;
    fresh.save()?;
    println!("Wrote default configuration to {}", path.display());
    Ok(())
}
