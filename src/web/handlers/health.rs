//! # Health Check Handlers

use axum::extract::State;
use axum::Json;

use crate::types::HealthResponse;
use crate::web::state::AppState;

/// Basic health check endpoint: GET /health
pub async fn basic_health(_state: State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        timestamp: chrono::Utc::now().to_rfc3339(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}
