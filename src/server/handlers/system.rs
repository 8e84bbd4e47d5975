use axum::Json;
use axum::extract::State;
use serde::Serialize;
use serde_json::{Value, json};
use std::sync::Arc;
use tracing::info;

use crate::pipeline::IngestStage;
use crate::server::activity::UsageAnalytics;
use crate::server::errors::ApiError;
use crate::server::state::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub index_ready: bool,
    pub stage: IngestStage,
    pub records: usize,
    pub llm_configured: bool,
    pub llm_provider: &'static str,
    pub embedding_provider: String,
    pub embedding_model: String,
}

#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub total_documents: usize,
    pub total_chunks: usize,
    pub total_queries: u64,
    pub average_response_time: f64,
    pub uptime_seconds: u64,
}

#[derive(Debug, Serialize)]
pub struct ProvidersResponse {
    pub available: Vec<&'static str>,
    pub default: &'static str,
}

/// `GET /api/health`, open without a token
#[inline]
pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let status = state.pipeline.status().await;
    Json(HealthResponse {
        status: "healthy",
        index_ready: status.ready,
        stage: status.stage,
        records: status.records,
        llm_configured: state.llm_configured,
        llm_provider: state.llm_provider.as_str(),
        embedding_provider: status.embedding_provider,
        embedding_model: status.embedding_model,
    })
}

/// `GET /api/stats`
#[inline]
pub async fn stats(State(state): State<Arc<AppState>>) -> Json<StatsResponse> {
    let status = state.pipeline.status().await;
    let queries = state.activity.query_stats().await;
    Json(StatsResponse {
        total_documents: status.documents,
        total_chunks: status.records,
        total_queries: queries.total_queries,
        average_response_time: queries.average_response_time,
        uptime_seconds: state.started_at.elapsed().as_secs(),
    })
}

/// `GET /api/analytics`
#[inline]
pub async fn analytics(State(state): State<Arc<AppState>>) -> Json<UsageAnalytics> {
    Json(state.activity.usage_analytics().await)
}

/// `GET /api/providers`
#[inline]
pub async fn providers(State(state): State<Arc<AppState>>) -> Json<ProvidersResponse> {
    Json(ProvidersResponse {
        available: state.available_llms.iter().map(|p| p.as_str()).collect(),
        default: state.llm_provider.as_str(),
    })
}

/// `POST /api/admin/reset`: clears history, feedback and counters, not the index
#[inline]
pub async fn admin_reset(State(state): State<Arc<AppState>>) -> Json<Value> {
    state.activity.reset().await;
    info!("Activity log reset");
    Json(json!({ "status": "reset" }))
}

/// `POST /api/index/reset`: drops every record and the persisted snapshot
#[inline]
pub async fn index_reset(State(state): State<Arc<AppState>>) -> Result<Json<Value>, ApiError> {
    let removed = state.pipeline.reset_index().await?;
    Ok(Json(json!({ "status": "reset", "records_removed": removed })))
}
