use axum::Json;
use axum::extract::State;
use axum::http::HeaderMap;
use chrono::Utc;
use serde::Deserialize;
use serde_json::{Value, json};
use std::sync::Arc;

use crate::server::activity::{FeedbackAnalytics, FeedbackRecord};
use crate::server::auth::user_from;
use crate::server::errors::{ApiError, ApiJson};
use crate::server::state::AppState;

#[derive(Debug, Deserialize)]
pub struct FeedbackRequest {
    pub query: String,
    pub response: String,
    pub rating: u8,
    pub comment: Option<String>,
}

/// `POST /api/feedback`
#[inline]
pub async fn submit(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    ApiJson(request): ApiJson<FeedbackRequest>,
) -> Result<Json<Value>, ApiError> {
    if !(1..=5).contains(&request.rating) {
        return Err(ApiError::BadRequest(format!(
            "rating must be between 1 and 5, got {}",
            request.rating
        )));
    }
    if request.query.trim().is_empty() {
        return Err(ApiError::BadRequest("query must not be empty".to_string()));
    }

    state
        .activity
        .record_feedback(FeedbackRecord {
            query: request.query,
            response: request.response,
            rating: request.rating,
            comment: request.comment.filter(|c| !c.trim().is_empty()),
            timestamp: Utc::now(),
            user: user_from(&headers),
        })
        .await;

    Ok(Json(json!({ "status": "recorded" })))
}

/// `GET /api/feedback/analytics`
#[inline]
pub async fn analytics(State(state): State<Arc<AppState>>) -> Json<FeedbackAnalytics> {
    Json(state.activity.feedback_analytics().await)
}
