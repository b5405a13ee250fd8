//! # Operations Handlers
//!
//! The "select action" step: which bulk operations this server can run.

use axum::extract::State;
use axum::Json;

use crate::types::{JsonEnvelope, OperationsResponse};
use crate::web::state::AppState;

/// List registered operations: GET /v1/operations
pub async fn list_operations(
    State(state): State<AppState>,
) -> Json<JsonEnvelope<OperationsResponse>> {
    Json(JsonEnvelope::ok(OperationsResponse {
        operations: state.context.operations(),
    }))
}
