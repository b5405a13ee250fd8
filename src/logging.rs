//! # Tracing Module
//!
//! Environment-aware console logging using the tracing ecosystem.
//!
//! - Environment-based log level (`LOG_LEVEL`, then `RUST_LOG`, then per-environment defaults)
//! - TTY-aware ANSI color output
//! - JSON output when `BULK_PROCESS_LOG_FORMAT=json`, for log shippers
//! - Structured helpers for run and batch operations so every record carries `run_id`

use chrono::Utc;
use std::io::IsTerminal;
use std::sync::OnceLock;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};
use uuid::Uuid;

use crate::constants::env;

static TRACING_INITIALIZED: OnceLock<()> = OnceLock::new();

/// Initialize the global subscriber once; later calls are no-ops.
///
/// If another subscriber is already installed (tests, embedding hosts) the
/// existing one is kept.
pub fn init_tracing() {
    TRACING_INITIALIZED.get_or_init(|| {
        let environment = get_environment();
        let log_level = get_log_level(&environment);
        let json = use_json_format();
        let use_ansi = IsTerminal::is_terminal(&std::io::stdout());

        let console_layer = if json {
            fmt::layer()
                .json()
                .with_target(true)
                .with_current_span(true)
                .with_filter(EnvFilter::new(&log_level))
                .boxed()
        } else {
            fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .with_level(true)
                .with_ansi(use_ansi)
                .with_filter(EnvFilter::new(&log_level))
                .boxed()
        };

        if tracing_subscriber::registry()
            .with(console_layer)
            .try_init()
            .is_err()
        {
            tracing::debug!(
                "Global tracing subscriber already initialized - continuing with existing subscriber"
            );
        } else {
            tracing::info!(
                environment = %environment,
                log_level = %log_level,
                json_format = json,
                ansi_colors = use_ansi && !json,
                "Logging initialized"
            );
        }
    });
}

fn get_environment() -> String {
    std::env::var(env::ENVIRONMENT).unwrap_or_else(|_| "development".to_string())
}

fn use_json_format() -> bool {
    std::env::var(env::LOG_FORMAT)
        .map(|format| format.eq_ignore_ascii_case("json"))
        .unwrap_or(false)
}

/// Get log level based on environment variables or environment defaults
fn get_log_level(environment: &str) -> String {
    if let Ok(level) = std::env::var("LOG_LEVEL") {
        return level.to_lowercase();
    }

    if let Ok(level) = std::env::var("RUST_LOG") {
        return level.to_lowercase();
    }

    match environment {
        "test" => "debug".to_string(),
        "development" => "debug".to_string(),
        "production" => "info".to_string(),
        _ => "debug".to_string(),
    }
}

/// Log a run lifecycle event (started, completed, aborted, abandoned, resumed)
pub fn log_run_operation(
    operation: &str,
    run_id: Uuid,
    action: &str,
    status: &str,
    details: Option<&str>,
) {
    tracing::info!(
        run_id = %run_id,
        action = %action,
        operation = %operation,
        status = %status,
        details = details,
        timestamp = %Utc::now().to_rfc3339(),
        "RUN_OPERATION: {}", operation
    );
}

/// Log one controller invocation with its outcome counts
#[allow(clippy::too_many_arguments)]
pub fn log_batch_invocation(
    run_id: Uuid,
    action: &str,
    start_offset: u64,
    processed: u64,
    position: &str,
    percentage: f64,
    stop_reason: Option<&str>,
    duration_ms: u64,
) {
    tracing::info!(
        run_id = %run_id,
        action = %action,
        start_offset = start_offset,
        processed = processed,
        position = %position,
        percentage = percentage,
        stop_reason = stop_reason,
        duration_ms = duration_ms,
        "BATCH_INVOCATION"
    );
}

/// Generic error logging with unified format
pub fn log_error(component: &str, operation: &str, error: &str, context: Option<&str>) {
    tracing::error!(
        component = %component,
        operation = %operation,
        error = %error,
        context = context,
        timestamp = %Utc::now().to_rfc3339(),
        "ERROR: {} failed in {}: {}", operation, component, error
    );
}
