//! # Run Handlers
//!
//! Start a run, answer batch calls, report status, show the summary and abort.
//! Token checks happen in the context before any processing.

use axum::extract::rejection::{JsonRejection, PathRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use tracing::{debug, info};
use uuid::Uuid;

use crate::context::{RunSummary, StartedRun};
use crate::ledger::RunSnapshot;
use crate::types::{
    BatchRequestBody, BatchResponseData, JsonEnvelope, SecurityQuery, StartRunRequest,
    SummaryQuery,
};
use crate::web::errors::ApiError;
use crate::web::state::AppState;

type ApiResult<T> = Result<Json<JsonEnvelope<T>>, ApiError>;

/// Start a run: POST /v1/runs
pub async fn start_run(
    State(state): State<AppState>,
    body: Result<Json<StartRunRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<JsonEnvelope<StartedRun>>), ApiError> {
    let Json(request) = body?;
    let action = request.action_name.trim();
    if action.is_empty() {
        return Err(ApiError::bad_request("action_name must not be empty"));
    }

    let started = state.context.start_run(action).await?;
    info!(
        run_id = %started.run_id,
        action = %started.action_name,
        total_items = started.total_items,
        "Run started via API"
    );

    Ok((StatusCode::CREATED, Json(JsonEnvelope::ok(started))))
}

/// One invocation: POST /v1/runs/:run_id/batch
pub async fn process_batch(
    State(state): State<AppState>,
    run_id: Result<Path<Uuid>, PathRejection>,
    body: Result<Json<BatchRequestBody>, JsonRejection>,
) -> ApiResult<BatchResponseData> {
    let Path(run_id) = run_id?;
    let Json(request) = body?;

    debug!(
        run_id = %run_id,
        action = %request.action_name,
        position = %request.position,
        "Batch requested"
    );

    let outcome = state
        .context
        .process_batch(
            run_id,
            &request.action_name,
            request.position,
            &request.security,
        )
        .await?;

    Ok(Json(JsonEnvelope::ok(BatchResponseData::from(outcome))))
}

/// Run snapshot for resuming: GET /v1/runs/:run_id?security=
pub async fn get_run(
    State(state): State<AppState>,
    run_id: Result<Path<Uuid>, PathRejection>,
    query: Result<Query<SecurityQuery>, QueryRejection>,
) -> ApiResult<RunSnapshot> {
    let Path(run_id) = run_id?;
    let Query(query) = query?;

    let snapshot = state.context.run_status(run_id, &query.security).await?;
    Ok(Json(JsonEnvelope::ok(snapshot)))
}

/// Completion view: GET /v1/runs/:run_id/summary?_token=&success=&failed=&skipped=
pub async fn get_summary(
    State(state): State<AppState>,
    run_id: Result<Path<Uuid>, PathRejection>,
    query: Result<Query<SummaryQuery>, QueryRejection>,
) -> ApiResult<RunSummary> {
    let Path(run_id) = run_id?;
    let Query(query) = query?;

    let summary = state.context.summary(run_id, &query.token).await?;
    let totals = summary.run.totals;
    if query.success.is_some_and(|n| n != totals.success)
        || query.failed.is_some_and(|n| n != totals.failed)
        || query.skipped.is_some_and(|n| n != totals.skipped)
    {
        debug!(
            run_id = %run_id,
            "Summary link counts differ from recorded totals; using recorded totals"
        );
    }

    Ok(Json(JsonEnvelope::ok(summary)))
}

/// Abort a run and release its lease: DELETE /v1/runs/:run_id?security=
pub async fn abort_run(
    State(state): State<AppState>,
    run_id: Result<Path<Uuid>, PathRejection>,
    query: Result<Query<SecurityQuery>, QueryRejection>,
) -> ApiResult<RunSnapshot> {
    let Path(run_id) = run_id?;
    let Query(query) = query?;

    let snapshot = state.context.abort_run(run_id, &query.security).await?;
    Ok(Json(JsonEnvelope::ok(snapshot)))
}
