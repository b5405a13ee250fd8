//! # Bulk Operations
//!
//! The boundary between the batch controller and the per-record logic supplied
//! by the crate user. An operation knows how many records exist, how to fetch
//! an ordered page of them, and how to process one record.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use crate::constants::OutcomeKind;
use crate::error::Result;

/// One record handed to [`BulkOperation::process`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchItem {
    /// Stable identifier shown as `#key` in the results view
    pub key: String,
    /// Human-readable name of the record
    pub label: String,
    #[serde(default)]
    pub data: Value,
}

impl BatchItem {
    pub fn new(key: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            label: label.into(),
            data: Value::Null,
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = data;
        self
    }
}

/// Result of processing a single record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemOutcome {
    pub kind: OutcomeKind,
    pub message: Option<String>,
}

impl ItemOutcome {
    pub fn success() -> Self {
        Self {
            kind: OutcomeKind::Success,
            message: None,
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            kind: OutcomeKind::Failed,
            message: Some(message.into()),
        }
    }

    pub fn skipped(message: impl Into<String>) -> Self {
        Self {
            kind: OutcomeKind::Skipped,
            message: Some(message.into()),
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// Message shown in the results view, falling back to a per-kind default
    pub fn display_message(&self) -> &str {
        match (&self.message, self.kind) {
            (Some(message), _) => message,
            (None, OutcomeKind::Success) => "updated successfully",
            (None, OutcomeKind::Failed) => "failed",
            (None, OutcomeKind::Skipped) => "skipped",
        }
    }
}

/// A processed record with its absolute (1-based) position in the run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemReport {
    pub position: u64,
    pub key: String,
    pub label: String,
    pub outcome: OutcomeKind,
    pub message: String,
}

impl ItemReport {
    pub fn new(position: u64, item: &BatchItem, outcome: &ItemOutcome) -> Self {
        Self {
            position,
            key: item.key.clone(),
            label: item.label.clone(),
            outcome: outcome.kind,
            message: outcome.display_message().to_string(),
        }
    }
}

/// Public description of a registered operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationDescriptor {
    pub name: String,
    pub label: String,
    pub description: String,
    pub batch_size: Option<u32>,
}

/// Per-record bulk operation driven by the progress controller
///
/// Implementations must return pages in a stable order so that an offset
/// means the same record across invocations.
#[async_trait]
pub trait BulkOperation: Send + Sync + fmt::Debug {
    /// Action identifier used on the wire
    fn name(&self) -> &str;

    /// Label shown when selecting an action
    fn label(&self) -> &str;

    fn description(&self) -> &str {
        ""
    }

    /// Items per invocation; `None` uses the configured batch size
    fn batch_size(&self) -> Option<u32> {
        None
    }

    /// Total number of records in the dataset
    async fn total_items(&self) -> Result<u64>;

    /// Up to `limit` records starting at `offset`
    async fn fetch_page(&self, offset: u64, limit: u32) -> Result<Vec<BatchItem>>;

    /// Process one record.
    ///
    /// An `Err` is tallied as a failed item and does not stop the invocation.
    async fn process(&self, item: &BatchItem) -> Result<ItemOutcome>;

    fn descriptor(&self) -> OperationDescriptor {
        OperationDescriptor {
            name: self.name().to_string(),
            label: self.label().to_string(),
            description: self.description().to_string(),
            batch_size: self.batch_size(),
        }
    }
}
