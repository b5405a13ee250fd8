//! # Driver Integration Tests
//!
//! The client driver against a real server: full runs, lost responses
//! recovered through replay, resume after interruption, and cancellation.

mod common;

use async_trait::async_trait;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use uuid::Uuid;

use bulk_process::constants::RunStatus;
use bulk_process::context::{RunSummary, StartedRun};
use bulk_process::controller::Position;
use bulk_process::driver::{
    BatchDriver, BatchTransport, ClientError, ClientResult, DriverError, DriverState,
    HttpTransport, NoopObserver, RecordingObserver,
};
use bulk_process::ledger::RunSnapshot;
use bulk_process::operation::OperationDescriptor;
use bulk_process::types::{BatchRequestBody, BatchResponseData};
use common::*;

/// Forwards to the server but drops every `drop_every`th response on the floor
struct LossyTransport {
    inner: HttpTransport,
    drop_every: u32,
    calls: AtomicU32,
}

#[async_trait]
impl BatchTransport for LossyTransport {
    async fn list_operations(&self) -> ClientResult<Vec<OperationDescriptor>> {
        self.inner.list_operations().await
    }

    async fn start_run(&self, action: &str) -> ClientResult<StartedRun> {
        self.inner.start_run(action).await
    }

    async fn run_batch(
        &self,
        run_id: Uuid,
        body: &BatchRequestBody,
    ) -> ClientResult<BatchResponseData> {
        let response = self.inner.run_batch(run_id, body).await?;
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if call % self.drop_every == 0 {
            return Err(ClientError::Timeout {
                operation: "batch".to_string(),
            });
        }
        Ok(response)
    }

    async fn run_status(&self, run_id: Uuid, security: &str) -> ClientResult<RunSnapshot> {
        self.inner.run_status(run_id, security).await
    }

    async fn abort_run(&self, run_id: Uuid, security: &str) -> ClientResult<RunSnapshot> {
        self.inner.abort_run(run_id, security).await
    }

    async fn fetch_summary(&self, summary_url: &str) -> ClientResult<RunSummary> {
        self.inner.fetch_summary(summary_url).await
    }
}

#[tokio::test]
async fn test_driver_completes_run() {
    let server = TestServer::start(test_config()).await;
    let transport = Arc::new(HttpTransport::new(&server.driver_config()).unwrap());
    let observer = RecordingObserver::new();

    let mut driver = BatchDriver::new(transport.clone(), server.driver_config());
    let outcome = driver.run(NUMBERS, &observer).await.unwrap();

    assert_eq!(outcome.state, DriverState::Done);
    assert_eq!(outcome.iterations, 3);
    assert_eq!(outcome.totals.success, 120);
    assert_eq!(observer.total_items(), Some(120));
    assert_eq!(observer.percentages(), vec![41.67, 83.33, 100.0]);
    assert_eq!(
        observer.results_html().matches("bulk-process-item").count(),
        120
    );

    let summary = transport
        .fetch_summary(outcome.summary_url.as_deref().unwrap())
        .await
        .unwrap();
    assert_eq!(summary.run.status, RunStatus::Completed);
    assert_eq!(summary.run.totals, outcome.totals);

    server.stop().await;
}

#[tokio::test]
async fn test_lost_responses_are_replayed_not_reprocessed() {
    let server = TestServer::start(test_config()).await;
    let transport = Arc::new(LossyTransport {
        inner: HttpTransport::new(&server.driver_config()).unwrap(),
        drop_every: 2,
        calls: AtomicU32::new(0),
    });
    let observer = RecordingObserver::new();

    let mut driver = BatchDriver::new(transport, server.driver_config());
    let outcome = driver.run(NUMBERS, &observer).await.unwrap();

    assert_eq!(outcome.state, DriverState::Done);
    assert!(outcome.retries >= 1);
    // Tallies are counted once per offset even though some offsets were sent twice
    assert_eq!(outcome.totals.success, 120);
    assert!(observer.batches().iter().any(|b| b.replayed));

    server.stop().await;
}

#[tokio::test]
async fn test_resume_continues_from_recorded_offset() {
    let server = TestServer::start(test_config()).await;
    let transport = Arc::new(HttpTransport::new(&server.driver_config()).unwrap());

    // First client gets one batch in, then goes away
    let started = transport.start_run(NUMBERS).await.unwrap();
    let first = transport
        .run_batch(
            started.run_id,
            &BatchRequestBody {
                action_name: NUMBERS.to_string(),
                position: Position::Offset(0),
                security: started.security.clone(),
            },
        )
        .await
        .unwrap();
    assert_eq!(first.position, Position::Offset(50));

    let observer = RecordingObserver::new();
    let mut driver = BatchDriver::new(transport, server.driver_config());
    let outcome = driver
        .resume(started.run_id, NUMBERS, &started.security, &observer)
        .await
        .unwrap();

    assert_eq!(outcome.iterations, 2);
    assert_eq!(outcome.totals.success, 120);
    assert_eq!(observer.percentages(), vec![83.33, 100.0]);

    server.stop().await;
}

#[tokio::test]
async fn test_resume_of_completed_run_reports_totals() {
    let server = TestServer::start(test_config()).await;
    let transport = Arc::new(HttpTransport::new(&server.driver_config()).unwrap());

    let mut driver = BatchDriver::new(transport.clone(), server.driver_config());
    let first = driver.run(MIXED, &NoopObserver).await.unwrap();

    let security = server
        .context
        .tokens()
        .issue(&bulk_process::security::security_scope(first.run_id));
    let mut driver = BatchDriver::new(transport, server.driver_config());
    let again = driver
        .resume(first.run_id, MIXED, &security, &NoopObserver)
        .await
        .unwrap();

    assert_eq!(again.state, DriverState::Done);
    assert_eq!(again.iterations, 0);
    assert_eq!(again.totals, first.totals);

    server.stop().await;
}

#[tokio::test]
async fn test_cancelled_driver_aborts_server_run() {
    let server = TestServer::start(test_config()).await;
    let transport = Arc::new(HttpTransport::new(&server.driver_config()).unwrap());

    let mut driver = BatchDriver::new(transport.clone(), server.driver_config());
    driver.cancellation_token().cancel();
    let err = driver.run(NUMBERS, &NoopObserver).await.unwrap_err();
    assert!(matches!(err, DriverError::Aborted { position: 0 }));

    // The lease was released, so a new run can start
    let mut driver = BatchDriver::new(transport, server.driver_config());
    let outcome = driver.run(NUMBERS, &NoopObserver).await.unwrap();
    assert_eq!(outcome.totals.success, 120);

    server.stop().await;
}

#[tokio::test]
async fn test_unreachable_server_exhausts_retries() {
    let server = TestServer::start(test_config()).await;
    let mut config = server.driver_config();
    let started = HttpTransport::new(&config)
        .unwrap()
        .start_run(NUMBERS)
        .await
        .unwrap();
    server.stop().await;

    // Fresh client so no pooled connection outlives the server
    config.max_retries = 1;
    let transport = Arc::new(HttpTransport::new(&config).unwrap());
    let mut driver = BatchDriver::new(transport, config);
    let handle = bulk_process::driver::RunHandle::from(started);
    let err = driver.drive(handle, 0, &NoopObserver).await.unwrap_err();

    assert!(matches!(err, DriverError::RetriesExhausted { attempts: 2, .. }));
    assert_eq!(driver.state(), DriverState::Failed);
}
