//! HTTP shell around the pipeline: upload and URL ingestion, questions,
//! feedback, history and health, plus a small browser UI.

pub mod activity;
pub mod auth;
pub mod errors;
pub mod handlers;
pub mod router;
pub mod state;

use anyhow::Context;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::config::Config;
use crate::pipeline::Pipeline;
use crate::providers::{build_embedding_provider, build_llm_provider};
use state::AppState;

/// Wire providers and the pipeline from `config`, restore any saved index,
/// then serve until Ctrl-C.
#[inline]
pub async fn serve(config: &Config) -> anyhow::Result<()> {
    let embedder = build_embedding_provider(config).context("Failed to set up embeddings")?;
    let llm = build_llm_provider(config).context("Failed to set up the LLM")?;
    if let Err(e) = config.validate_credentials() {
        warn!("LLM is not fully configured: {}", e);
    }

    let pipeline = Arc::new(Pipeline::from_config(config, embedder, llm));
    let restored = pipeline
        .restore_or_empty()
        .await
        .context("Failed to restore the saved index")?;
    if restored > 0 {
        info!("Restored {} records from {}", restored, config.index_path().display());
    } else {
        info!("Starting with an empty index");
    }

    let state = Arc::new(AppState::new(config, pipeline));
    let app = router::router(state, config.server.cors_allow_any);

    let bind_addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", bind_addr))?;
    info!("Listening on http://{}", bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
}
