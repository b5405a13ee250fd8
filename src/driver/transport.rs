//! # Batch Transport
//!
//! How the driver reaches the server. [`HttpTransport`] speaks the `/v1` JSON
//! API over reqwest; tests substitute their own implementation.

use async_trait::async_trait;
use reqwest::{Client, Response, Url};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::DriverConfig;
use crate::constants::API_KEY_HEADER;
use crate::context::{RunSummary, StartedRun};
use crate::driver::error::{ClientError, ClientResult};
use crate::ledger::RunSnapshot;
use crate::operation::OperationDescriptor;
use crate::types::{
    BatchRequestBody, BatchResponseData, JsonEnvelope, OperationsResponse, StartRunRequest,
};

#[async_trait]
pub trait BatchTransport: Send + Sync {
    async fn list_operations(&self) -> ClientResult<Vec<OperationDescriptor>>;

    async fn start_run(&self, action: &str) -> ClientResult<StartedRun>;

    async fn run_batch(&self, run_id: Uuid, body: &BatchRequestBody)
        -> ClientResult<BatchResponseData>;

    async fn run_status(&self, run_id: Uuid, security: &str) -> ClientResult<RunSnapshot>;

    async fn abort_run(&self, run_id: Uuid, security: &str) -> ClientResult<RunSnapshot>;

    /// Follow a summary link returned with the final batch
    async fn fetch_summary(&self, summary_url: &str) -> ClientResult<RunSummary>;
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    base_url: Url,
}

impl HttpTransport {
    pub fn new(config: &DriverConfig) -> ClientResult<Self> {
        let mut base_url = Url::parse(&config.base_url)
            .map_err(|e| ClientError::config_error(format!("Invalid base URL: {e}")))?;
        if base_url.cannot_be_a_base() {
            return Err(ClientError::config_error(format!(
                "Invalid base URL: {} cannot carry a path",
                config.base_url
            )));
        }
        // Request paths are joined relative to the base, keeping any prefix
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        let mut builder = Client::builder()
            .timeout(config.timeout())
            .connect_timeout(Duration::from_secs(10))
            .user_agent(format!("bulk-process/{}", env!("CARGO_PKG_VERSION")));

        if let Some(api_key) = config.api_key.as_deref().filter(|k| !k.is_empty()) {
            let mut headers = reqwest::header::HeaderMap::new();
            headers.insert(
                API_KEY_HEADER,
                api_key
                    .parse()
                    .map_err(|e| ClientError::config_error(format!("Invalid API key: {e}")))?,
            );
            builder = builder.default_headers(headers);
            debug!("Configured API key authentication");
        }

        let client = builder
            .build()
            .map_err(|e| ClientError::config_error(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self { client, base_url })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn url(&self, path: &str) -> ClientResult<Url> {
        self.base_url
            .join(path.trim_start_matches('/'))
            .map_err(|e| ClientError::config_error(format!("Failed to construct URL: {e}")))
    }

    /// Unwrap the success envelope, or turn an error body into [`ClientError::ApiError`]
    async fn handle_response<T: DeserializeOwned>(response: Response) -> ClientResult<T> {
        let status = response.status();
        if status.is_success() {
            let envelope = response.json::<JsonEnvelope<T>>().await?;
            if !envelope.success {
                return Err(ClientError::invalid_response(
                    "success",
                    "envelope reported failure with a success status",
                ));
            }
            return Ok(envelope.data);
        }

        let text = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());
        let (code, message) = match serde_json::from_str::<ErrorBody>(&text) {
            Ok(body) => (body.error.code, body.error.message),
            Err(_) => ("HTTP_ERROR".to_string(), text),
        };
        warn!(status = %status, code = %code, message = %message, "Request failed");
        Err(ClientError::api_error(status.as_u16(), code, message))
    }
}

#[async_trait]
impl BatchTransport for HttpTransport {
    async fn list_operations(&self) -> ClientResult<Vec<OperationDescriptor>> {
        let response = self.client.get(self.url("/v1/operations")?).send().await?;
        let data: OperationsResponse = Self::handle_response(response).await?;
        Ok(data.operations)
    }

    async fn start_run(&self, action: &str) -> ClientResult<StartedRun> {
        let response = self
            .client
            .post(self.url("/v1/runs")?)
            .json(&StartRunRequest {
                action_name: action.to_string(),
            })
            .send()
            .await?;
        Self::handle_response(response).await
    }

    async fn run_batch(
        &self,
        run_id: Uuid,
        body: &BatchRequestBody,
    ) -> ClientResult<BatchResponseData> {
        let response = self
            .client
            .post(self.url(&format!("/v1/runs/{run_id}/batch"))?)
            .json(body)
            .send()
            .await?;
        Self::handle_response(response).await
    }

    async fn run_status(&self, run_id: Uuid, security: &str) -> ClientResult<RunSnapshot> {
        let response = self
            .client
            .get(self.url(&format!("/v1/runs/{run_id}"))?)
            .query(&[("security", security)])
            .send()
            .await?;
        Self::handle_response(response).await
    }

    async fn abort_run(&self, run_id: Uuid, security: &str) -> ClientResult<RunSnapshot> {
        let response = self
            .client
            .delete(self.url(&format!("/v1/runs/{run_id}"))?)
            .query(&[("security", security)])
            .send()
            .await?;
        Self::handle_response(response).await
    }

    async fn fetch_summary(&self, summary_url: &str) -> ClientResult<RunSummary> {
        let response = self.client.get(self.url(summary_url)?).send().await?;
        Self::handle_response(response).await
    }
}
