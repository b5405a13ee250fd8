//! # API Key Middleware
//!
//! When `web.api_key` is configured, every `/v1` request must carry it in
//! `X-API-Key`. Without a configured key the check is skipped.

use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::Response;
use tracing::{debug, warn};

use crate::constants::API_KEY_HEADER;
use crate::web::errors::ApiError;
use crate::web::state::AppState;

pub async fn conditional_api_key(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let Some(expected) = state.api_key() else {
        return Ok(next.run(request).await);
    };

    let provided = match request.headers().get(API_KEY_HEADER) {
        Some(value) => match value.to_str() {
            Ok(value) => value,
            Err(_) => {
                warn!("API key header contains non-UTF-8 bytes");
                return Err(ApiError::Unauthorized);
            }
        },
        None => {
            debug!(path = %request.uri().path(), "Missing API key");
            return Err(ApiError::Unauthorized);
        }
    };

    if !keys_match(provided.as_bytes(), expected.as_bytes()) {
        warn!(path = %request.uri().path(), "Invalid API key");
        return Err(ApiError::Unauthorized);
    }

    Ok(next.run(request).await)
}

/// Length-then-content comparison that does not stop at the first mismatch
fn keys_match(provided: &[u8], expected: &[u8]) -> bool {
    if provided.len() != expected.len() {
        return false;
    }
    provided
        .iter()
        .zip(expected)
        .fold(0u8, |acc, (a, b)| acc | (a ^ b))
        == 0
}
