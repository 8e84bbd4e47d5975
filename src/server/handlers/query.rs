use axum::Json;
use axum::extract::{Query, State};
use axum::http::HeaderMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::index::SearchType;
use crate::pipeline::QueryAnswer;
use crate::server::activity::QueryRecord;
use crate::server::auth::user_from;
use crate::server::errors::{ApiError, ApiJson};
use crate::server::state::AppState;

const DEFAULT_HISTORY_LIMIT: usize = 10;

#[derive(Debug, Deserialize)]
pub struct QueryRequest {
    pub question: String,
    pub max_results: Option<usize>,
    #[serde(default)]
    pub search_type: SearchType,
}

#[derive(Debug, Deserialize)]
pub struct HistoryParams {
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct HistoryResponse {
    pub queries: Vec<QueryRecord>,
    pub total: usize,
}

/// `POST /api/query`. The answer is logged only once it has been produced,
/// so an abandoned request leaves no trace.
#[inline]
pub async fn ask(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    ApiJson(request): ApiJson<QueryRequest>,
) -> Result<Json<QueryAnswer>, ApiError> {
    let answer = state
        .pipeline
        .ask(&request.question, request.max_results, request.search_type)
        .await?;

    state
        .activity
        .record_query(QueryRecord {
            query_id: answer.query_id,
            query: answer.question.clone(),
            answer: answer.answer.clone(),
            sources: answer.sources.iter().map(|s| s.source.clone()).collect(),
            processing_time: answer.processing_time,
            timestamp: answer.timestamp,
            user: user_from(&headers),
        })
        .await;

    Ok(Json(answer))
}

/// `GET /api/query/history?limit=N`, restricted to the caller when `X-User`
/// is sent
#[inline]
pub async fn history(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(params): Query<HistoryParams>,
) -> Json<HistoryResponse> {
    let user = user_from(&headers);
    let queries = state
        .activity
        .history(
            params.limit.unwrap_or(DEFAULT_HISTORY_LIMIT),
            user.as_deref(),
        )
        .await;

    Json(HistoryResponse {
        total: queries.len(),
        queries,
    })
}
