//! # Bulk Process Server
//!
//! Serves the batch API for the registered operations. The demo operations
//! run against an in-memory store seeded at startup.
//!
//! ## Usage
//!
//! ```bash
//! # Run with default configuration
//! cargo run --bin bulk-process-server
//!
//! # Run with a specific config file and environment
//! BULK_PROCESS_CONFIG_PATH=config/bulk-process.toml BULK_PROCESS_ENV=production \
//!     cargo run --bin bulk-process-server
//! ```

use anyhow::Context;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{info, warn};

use bulk_process::config::ConfigLoader;
use bulk_process::context::BulkProcessContext;
use bulk_process::logging;
use bulk_process::operations::{register_demo_operations, DemoStore};
use bulk_process::registry::OperationRegistry;
use bulk_process::web::{create_app, AppState};

const DEMO_USERS: u64 = 240;
const DEMO_POSTS: u64 = 500;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init_tracing();

    info!("Starting bulk-process server");
    info!("   Version: {}", env!("CARGO_PKG_VERSION"));
    info!("   Environment: {}", ConfigLoader::detect_environment());

    let config = ConfigLoader::load_from_env().context("failed to load configuration")?;
    info!(
        config = %ConfigLoader::sanitize_for_logging(&config),
        "Configuration loaded"
    );

    let registry = Arc::new(OperationRegistry::new());
    let store = Arc::new(DemoStore::seeded(DEMO_USERS, DEMO_POSTS));
    register_demo_operations(&registry, store).context("failed to register operations")?;

    let bind_address = config.web.bind_address.clone();
    let context = BulkProcessContext::new(config, registry)
        .context("failed to initialize bulk-process context")?;
    let app = create_app(AppState::new(Arc::new(context)));

    let listener = TcpListener::bind(&bind_address)
        .await
        .with_context(|| format!("failed to bind {bind_address}"))?;
    info!("   Listening on {}", bind_address);
    info!("   Press Ctrl+C to shutdown gracefully");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    info!("Bulk-process server shutdown complete");
    Ok(())
}

/// Wait for Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C"),
        _ = terminate => info!("Received SIGTERM"),
    }
}
