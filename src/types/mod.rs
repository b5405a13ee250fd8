//! Wire types shared by the web API and the client driver.

pub mod api;

pub use api::{
    BatchRequestBody, BatchResponseData, HealthResponse, JsonEnvelope, OperationsResponse,
    SecurityQuery, StartRunRequest, SummaryQuery,
};
