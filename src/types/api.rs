//! # API Types
//!
//! Request and response bodies for the `/v1` routes. Successful responses are
//! wrapped in [`JsonEnvelope`]; errors use `{"error": {"code", "message"}}`.

use serde::{Deserialize, Serialize};

use crate::context::BatchOutcome;
use crate::controller::{Position, Tallies};
use crate::operation::OperationDescriptor;

/// `{"success": true, "data": ...}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonEnvelope<T> {
    pub success: bool,
    pub data: T,
}

impl<T> JsonEnvelope<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: String,
    pub version: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationsResponse {
    pub operations: Vec<OperationDescriptor>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartRunRequest {
    pub action_name: String,
}

/// Body of `POST /v1/runs/:run_id/batch`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchRequestBody {
    pub action_name: String,
    #[serde(default)]
    pub position: Position,
    pub security: String,
}

/// Data of a batch response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchResponseData {
    pub position: Position,
    pub percentage: f64,
    /// This invocation's counts
    pub success: u64,
    pub failed: u64,
    pub skipped: u64,
    pub html: String,
    /// Cumulative counts for the run
    pub totals: Tallies,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default)]
    pub replayed: bool,
}

impl From<BatchOutcome> for BatchResponseData {
    fn from(outcome: BatchOutcome) -> Self {
        Self {
            position: outcome.result.position,
            percentage: outcome.result.percentage,
            success: outcome.result.tallies.success,
            failed: outcome.result.tallies.failed,
            skipped: outcome.result.tallies.skipped,
            html: outcome.result.html,
            totals: outcome.totals,
            url: outcome.summary_url,
            replayed: outcome.replayed,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityQuery {
    pub security: String,
}

/// Query of the summary link. The counts mirror the link the client was
/// given; the server's own totals are authoritative.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SummaryQuery {
    #[serde(rename = "_token")]
    pub token: String,
    pub success: Option<u64>,
    pub failed: Option<u64>,
    pub skipped: Option<u64>,
}
