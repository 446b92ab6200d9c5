//! Bearer-secret guard for the trigger and status routes.

use super::state::AppState;
use crate::error::MonitorError;
use axum::{
    extract::{Request, State},
    http::header,
    middleware::Next,
    response::Response,
};
use tracing::warn;

/// Compare two byte strings without short-circuiting on the first
/// mismatch.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

fn bearer_token(request: &Request) -> Option<&str> {
    request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
}

/// Reject the request unless it carries `Authorization: Bearer <CRON_SECRET>`.
/// With no secret configured nothing gets through.
pub async fn require_secret(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, MonitorError> {
    let Some(secret) = state.cron_secret() else {
        warn!(path = %request.uri().path(), "🔒 Request refused: no trigger secret configured");
        return Err(MonitorError::Unauthorized("trigger secret is not configured".to_string()));
    };

    match bearer_token(&request) {
        Some(token) if constant_time_eq(token.as_bytes(), secret.as_bytes()) => Ok(next.run(request).await),
        Some(_) => {
            warn!(path = %request.uri().path(), "🔒 Request refused: invalid bearer token");
            Err(MonitorError::Unauthorized("invalid bearer token".to_string()))
        }
        None => Err(MonitorError::Unauthorized("missing bearer token".to_string())),
    }
}
