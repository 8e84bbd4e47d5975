use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::middleware;
use axum::routing::{get, post};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use super::auth;
use super::handlers::{feedback, ingest, query, system, ui};
use super::state::AppState;

/// Uploads may carry whole PDFs and workbooks
const UPLOAD_BODY_LIMIT: usize = 64 * 1024 * 1024;

/// Build the application router.
///
/// `/` and `/api/health` stay open; every other `/api` route requires the
/// bearer token when one is configured.
#[inline]
pub fn router(state: Arc<AppState>, cors_allow_any: bool) -> Router {
    let protected = Router::new()
        .route(
            "/api/ingest/upload",
            post(ingest::upload).layer(DefaultBodyLimit::max(UPLOAD_BODY_LIMIT)),
        )
        .route("/api/ingest/urls", post(ingest::urls))
        .route("/api/query", post(query::ask))
        .route("/api/query/history", get(query::history))
        .route("/api/feedback", post(feedback::submit))
        .route("/api/feedback/analytics", get(feedback::analytics))
        .route("/api/stats", get(system::stats))
        .route("/api/analytics", get(system::analytics))
        .route("/api/providers", get(system::providers))
        .route("/api/admin/reset", post(system::admin_reset))
        .route("/api/index/reset", post(system::index_reset))
        .route_layer(middleware::from_fn_with_state(
            Arc::clone(&state),
            auth::token_layer,
        ));

    let public = Router::new()
        .route("/", get(ui::index))
        .route("/api/health", get(system::health));

    let app = public
        .merge(protected)
        .with_state(state)
        .layer(TraceLayer::new_for_http());

    if cors_allow_any {
        app.layer(CorsLayer::permissive())
    } else {
        app
    }
}

#[cfg(test)]
mod tests;
