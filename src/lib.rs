#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Bulk Process
//!
//! Budgeted, resumable batch processing for bulk operations that touch every
//! record of a large dataset one at a time.
//!
//! ## Overview
//!
//! A run is split into short invocations. Each invocation fetches a page of
//! items starting at the client's offset, processes them one by one, and stops
//! early when its wall-clock or memory budget is spent. The response carries
//! the next offset, a percentage and an HTML fragment describing each item.
//! The client calls again with the returned offset until the server reports
//! `"done"`, at which point it receives a signed link to the run summary.
//!
//! ## Module Organization
//!
//! - [`operation`] - The `BulkOperation` trait and item/outcome types
//! - [`registry`] - Operations available by name
//! - [`controller`] - One budgeted invocation: offsets, percentages, tallies
//! - [`budget`] - Time and memory budgets
//! - [`ledger`] - Server-side run tracking: leases, offset checks, replay
//! - [`security`] - HMAC anti-forgery tokens scoped to a run
//! - [`context`] - Ties the above together for a server
//! - [`web`] - Axum HTTP API
//! - [`driver`] - Client loop with retries, cancellation and progress
//! - [`config`] - TOML configuration with environment substitution
//! - [`logging`] - Tracing subscriber setup and structured log helpers
//! - [`error`] - Structured error handling
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use bulk_process::config::BulkProcessConfig;
//! use bulk_process::context::BulkProcessContext;
//! use bulk_process::controller::Position;
//! use bulk_process::operations::InMemoryOperation;
//! use bulk_process::registry::OperationRegistry;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let registry = Arc::new(OperationRegistry::new());
//! registry.register(Arc::new(InMemoryOperation::with_items("numbers", 120)))?;
//!
//! let context = BulkProcessContext::new(BulkProcessConfig::default(), registry)?;
//! let run = context.start_run("numbers").await?;
//!
//! let mut position = Position::Offset(0);
//! while !position.is_done() {
//!     let outcome = context
//!         .process_batch(run.run_id, "numbers", position, &run.security)
//!         .await?;
//!     position = outcome.result.position;
//! }
//! # Ok(())
//! # }
//! ```

pub mod budget;
pub mod config;
pub mod constants;
pub mod context;
pub mod controller;
pub mod driver;
pub mod error;
pub mod fragment;
pub mod ledger;
pub mod logging;
pub mod operation;
pub mod operations;
pub mod registry;
pub mod security;
pub mod types;
pub mod web;

pub use config::{BulkProcessConfig, ConfigLoader, DriverConfig};
pub use constants::{OutcomeKind, RunStatus};
pub use context::{BatchOutcome, BulkProcessContext, RunSummary, StartedRun};
pub use controller::{percent_complete, BatchResult, Position, ProgressController, Tallies};
pub use driver::{BatchDriver, DriverError, DriverOutcome};
pub use error::{BulkProcessError, Result};
pub use operation::{BatchItem, BulkOperation, ItemOutcome, ItemReport};
pub use registry::OperationRegistry;
