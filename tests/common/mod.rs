//! Shared fixtures: a context with in-memory operations and a real server on
//! an ephemeral port.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use bulk_process::budget::StaticMemoryProbe;
use bulk_process::config::{BulkProcessConfig, DriverConfig};
use bulk_process::context::BulkProcessContext;
use bulk_process::error::BulkProcessError;
use bulk_process::operation::ItemOutcome;
use bulk_process::operations::InMemoryOperation;
use bulk_process::registry::OperationRegistry;
use bulk_process::web::{create_app, AppState};

pub const TEST_SECRET: &str = "integration-test-secret-0123456789";
pub const TEST_API_KEY: &str = "integration-api-key";

/// 120 items, batch size 50, all succeed
pub const NUMBERS: &str = "numbers";
/// 30 items: every third is skipped, every fifth fails
pub const MIXED: &str = "mixed";
/// No items at all
pub const EMPTY: &str = "empty";

pub fn test_config() -> BulkProcessConfig {
    let mut config = BulkProcessConfig::default();
    config.batch.batch_size = 50;
    config.batch.memory_limit = Some("-1".to_string());
    config.security.token_secret = Some(TEST_SECRET.to_string());
    config.web.bind_address = "127.0.0.1:0".to_string();
    config
}

pub fn test_registry() -> Arc<OperationRegistry> {
    let registry = Arc::new(OperationRegistry::new());
    registry
        .register(Arc::new(
            InMemoryOperation::with_items(NUMBERS, 120).with_label("Number crunch"),
        ))
        .expect("register numbers");
    registry
        .register(Arc::new(
            InMemoryOperation::with_items(MIXED, 30)
                .with_label("Mixed outcomes")
                .with_batch_size(10)
                .with_processor(|item| {
                    let n: u64 = item.key.parse().unwrap_or(0);
                    if n % 5 == 0 {
                        Err(BulkProcessError::operation_failed(MIXED, format!("item {n} broke")))
                    } else if n % 3 == 0 {
                        Ok(ItemOutcome::skipped("nothing to do"))
                    } else {
                        Ok(ItemOutcome::success())
                    }
                }),
        ))
        .expect("register mixed");
    registry
        .register(Arc::new(InMemoryOperation::with_items(EMPTY, 0)))
        .expect("register empty");
    registry
}

pub fn test_context(config: BulkProcessConfig) -> Arc<BulkProcessContext> {
    Arc::new(
        BulkProcessContext::with_probe(config, test_registry(), Arc::new(StaticMemoryProbe::new(0)))
            .expect("context"),
    )
}

/// Server bound to an ephemeral port, shut down on drop
pub struct TestServer {
    pub addr: SocketAddr,
    pub context: Arc<BulkProcessContext>,
    shutdown: Option<oneshot::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl TestServer {
    pub async fn start(config: BulkProcessConfig) -> Self {
        let context = test_context(config);
        let app = create_app(AppState::new(context.clone()));
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("local addr");
        let (tx, rx) = oneshot::channel::<()>();

        let handle = tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    let _ = rx.await;
                })
                .await
                .expect("server");
        });

        Self {
            addr,
            context,
            shutdown: Some(tx),
            handle: Some(handle),
        }
    }

    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url(), path)
    }

    pub fn driver_config(&self) -> DriverConfig {
        DriverConfig {
            base_url: self.base_url(),
            timeout_ms: 5_000,
            initial_backoff_ms: 10,
            max_backoff_ms: 50,
            ..DriverConfig::default()
        }
    }

    pub async fn stop(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }
}
