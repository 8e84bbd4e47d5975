use axum::extract::{Request, State};
use axum::http::{HeaderMap, header};
use axum::middleware::Next;
use axum::response::Response;
use std::sync::Arc;
use subtle::ConstantTimeEq;

use super::errors::ApiError;
use super::state::AppState;

const BEARER_PREFIX: &str = "Bearer ";
pub const USER_HEADER: &str = "x-user";

/// Check `Authorization: Bearer <token>` against the shared token. With no
/// token configured every request passes.
#[inline]
pub fn require_token(headers: &HeaderMap, expected: Option<&str>) -> Result<(), ApiError> {
    let Some(expected) = expected else {
        return Ok(());
    };

    let presented = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix(BEARER_PREFIX))
        .unwrap_or("");

    if presented.is_empty() {
        return Err(ApiError::Unauthorized);
    }

    if bool::from(presented.as_bytes().ct_eq(expected.as_bytes())) {
        Ok(())
    } else {
        Err(ApiError::Unauthorized)
    }
}

/// Middleware guarding the protected API routes
#[inline]
pub async fn token_layer(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    require_token(request.headers(), state.api_token.as_deref())?;
    Ok(next.run(request).await)
}

/// Caller identity from the `X-User` header, if any
#[inline]
pub fn user_from(headers: &HeaderMap) -> Option<String> {
    headers
        .get(USER_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}
