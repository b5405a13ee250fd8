//! # Web API Route Definitions

use axum::routing::{get, post};
use axum::Router;

use crate::web::handlers;
use crate::web::state::AppState;

/// `/v1` routes: operations listing and the run lifecycle
pub fn api_v1_routes() -> Router<AppState> {
    Router::new()
        .route("/operations", get(handlers::operations::list_operations))
        .route("/runs", post(handlers::runs::start_run))
        .route(
            "/runs/:run_id",
            get(handlers::runs::get_run).delete(handlers::runs::abort_run),
        )
        .route("/runs/:run_id/batch", post(handlers::runs::process_batch))
        .route("/runs/:run_id/summary", get(handlers::runs::get_summary))
}

pub fn health_routes() -> Router<AppState> {
    Router::new().route("/health", get(handlers::health::basic_health))
}
