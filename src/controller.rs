//! # Progress Controller
//!
//! One invocation of a bulk run: fetch a page starting at the caller's
//! offset, process items until the page or the [`RunBudget`] runs out, and
//! report the new offset with the percentage complete.
//!
//! The controller holds no state between invocations. The offset travels with
//! the client; cumulative bookkeeping lives in the run ledger.

use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

use crate::budget::{BudgetLimits, MemoryProbe, RunBudget};
use crate::config::{BatchConfig, ConfigResult};
use crate::constants::{OutcomeKind, PERCENT_COMPLETE, POSITION_DONE};
use crate::error::{BulkProcessError, Result};
use crate::fragment;
use crate::operation::{BulkOperation, ItemOutcome, ItemReport};

/// Wire form of the next offset: an integer, or `"done"` once complete
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Position {
    Offset(u64),
    Done,
}

impl Position {
    pub fn is_done(&self) -> bool {
        matches!(self, Position::Done)
    }

    pub fn offset(&self) -> Option<u64> {
        match self {
            Position::Offset(offset) => Some(*offset),
            Position::Done => None,
        }
    }
}

impl Default for Position {
    fn default() -> Self {
        Position::Offset(0)
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Position::Offset(offset) => write!(f, "{offset}"),
            Position::Done => f.write_str(POSITION_DONE),
        }
    }
}

impl Serialize for Position {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            Position::Offset(offset) => serializer.serialize_u64(*offset),
            Position::Done => serializer.serialize_str(POSITION_DONE),
        }
    }
}

struct PositionVisitor;

impl<'de> Visitor<'de> for PositionVisitor {
    type Value = Position;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a non-negative integer offset or \"done\"")
    }

    fn visit_u64<E: de::Error>(self, value: u64) -> std::result::Result<Position, E> {
        Ok(Position::Offset(value))
    }

    fn visit_i64<E: de::Error>(self, value: i64) -> std::result::Result<Position, E> {
        u64::try_from(value)
            .map(Position::Offset)
            .map_err(|_| E::invalid_value(de::Unexpected::Signed(value), &self))
    }

    fn visit_str<E: de::Error>(self, value: &str) -> std::result::Result<Position, E> {
        let trimmed = value.trim();
        if trimmed.eq_ignore_ascii_case(POSITION_DONE) {
            return Ok(Position::Done);
        }
        trimmed
            .parse::<u64>()
            .map(Position::Offset)
            .map_err(|_| E::invalid_value(de::Unexpected::Str(value), &self))
    }
}

impl<'de> Deserialize<'de> for Position {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        deserializer.deserialize_any(PositionVisitor)
    }
}

/// Success, failed and skipped counts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tallies {
    pub success: u64,
    pub failed: u64,
    pub skipped: u64,
}

impl Tallies {
    pub fn record(&mut self, kind: OutcomeKind) {
        match kind {
            OutcomeKind::Success => self.success += 1,
            OutcomeKind::Failed => self.failed += 1,
            OutcomeKind::Skipped => self.skipped += 1,
        }
    }

    pub fn add(&mut self, other: &Tallies) {
        self.success += other.success;
        self.failed += other.failed;
        self.skipped += other.skipped;
    }

    pub fn total(&self) -> u64 {
        self.success + self.failed + self.skipped
    }
}

/// Percentage of `total_items` covered by `offset`, rounded to two decimals.
///
/// Exactly 100 only when the offset covers the dataset (or it is empty), so
/// rounding never reports completion early.
pub fn percent_complete(offset: u64, total_items: u64) -> f64 {
    if total_items == 0 || offset >= total_items {
        return PERCENT_COMPLETE;
    }

    let raw = offset as f64 * 100.0 / total_items as f64;
    let rounded = (raw * 100.0).round() / 100.0;
    rounded.min(99.99)
}

/// Input of one invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchRequest {
    pub offset: u64,
    pub action: String,
    /// Server-side limit; never taken from the client
    pub batch_size: u32,
}

/// Output of one invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchResult {
    pub start_offset: u64,
    pub next_offset: u64,
    pub position: Position,
    pub percentage: f64,
    pub total_items: u64,
    /// Counts for this invocation only
    pub tallies: Tallies,
    pub reports: Vec<ItemReport>,
    pub html: String,
    /// Set when the budget ended the invocation before the page did
    pub stop_reason: Option<String>,
}

impl BatchResult {
    fn finished(request: &BatchRequest, total_items: u64) -> Self {
        Self {
            start_offset: request.offset,
            next_offset: request.offset,
            position: Position::Done,
            percentage: PERCENT_COMPLETE,
            total_items,
            tallies: Tallies::default(),
            reports: Vec::new(),
            html: String::new(),
            stop_reason: None,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.position.is_done()
    }

    pub fn processed(&self) -> u64 {
        self.next_offset - self.start_offset
    }
}

/// Executes single invocations under a fresh [`RunBudget`]
#[derive(Debug, Clone)]
pub struct ProgressController {
    limits: BudgetLimits,
    probe: Arc<dyn MemoryProbe>,
    default_batch_size: u32,
}

impl ProgressController {
    pub fn new(limits: BudgetLimits, probe: Arc<dyn MemoryProbe>, default_batch_size: u32) -> Self {
        Self {
            limits,
            probe,
            default_batch_size: default_batch_size.max(1),
        }
    }

    pub fn from_config(config: &BatchConfig, probe: Arc<dyn MemoryProbe>) -> ConfigResult<Self> {
        Ok(Self::new(
            BudgetLimits::from_config(config)?,
            probe,
            config.batch_size,
        ))
    }

    pub fn limits(&self) -> &BudgetLimits {
        &self.limits
    }

    /// The operation's own batch size if set, else the configured default
    pub fn batch_size_for(&self, operation: &dyn BulkOperation) -> u32 {
        operation
            .batch_size()
            .filter(|size| *size > 0)
            .unwrap_or(self.default_batch_size)
    }

    pub fn request_for(&self, operation: &dyn BulkOperation, offset: u64) -> BatchRequest {
        BatchRequest {
            offset,
            action: operation.name().to_string(),
            batch_size: self.batch_size_for(operation),
        }
    }

    /// Process one slice of `operation` starting at `offset`
    pub async fn run_batch(&self, operation: &dyn BulkOperation, offset: u64) -> Result<BatchResult> {
        let request = self.request_for(operation, offset);
        self.execute(operation, &request).await
    }

    /// Process one slice described by `request`.
    ///
    /// At least one item is processed whenever the page is non-empty; the
    /// budget is checked after each item.
    pub async fn execute(
        &self,
        operation: &dyn BulkOperation,
        request: &BatchRequest,
    ) -> Result<BatchResult> {
        if request.action != operation.name() {
            return Err(BulkProcessError::UnknownOperation(request.action.clone()));
        }

        let invocation_started = Instant::now();
        let budget = RunBudget::start(self.limits, self.probe.clone());

        let total_items = operation.total_items().await?;
        if total_items == 0 {
            debug!(action = %request.action, "Dataset is empty, reporting completion");
            return Ok(BatchResult::finished(request, total_items));
        }

        let items = operation
            .fetch_page(request.offset, request.batch_size)
            .await?;
        if items.is_empty() {
            debug!(
                action = %request.action,
                offset = request.offset,
                total_items = total_items,
                "No items at offset, reporting completion"
            );
            return Ok(BatchResult::finished(request, total_items));
        }

        let mut tallies = Tallies::default();
        let mut reports = Vec::with_capacity(items.len());
        let mut processed: u64 = 0;
        let mut stop_reason = None;

        for item in &items {
            let outcome = match operation.process(item).await {
                Ok(outcome) => outcome,
                Err(error) => {
                    warn!(
                        action = %request.action,
                        key = %item.key,
                        error = %error,
                        "Item processing failed"
                    );
                    ItemOutcome::failed(error.to_string())
                }
            };

            processed += 1;
            tallies.record(outcome.kind);
            reports.push(ItemReport::new(request.offset + processed, item, &outcome));

            if let Some(exhaustion) = budget.exhausted() {
                debug!(
                    action = %request.action,
                    processed = processed,
                    elapsed_ms = budget.elapsed().as_millis() as u64,
                    reason = %exhaustion,
                    "Run budget exhausted, stopping invocation"
                );
                stop_reason = Some(exhaustion.to_string());
                break;
            }
        }

        let next_offset = request.offset + processed;
        let percentage = percent_complete(next_offset, total_items);
        let position = if percentage >= PERCENT_COMPLETE {
            Position::Done
        } else {
            Position::Offset(next_offset)
        };
        let html = fragment::render_items(&reports)?;

        debug!(
            action = %request.action,
            start_offset = request.offset,
            processed = processed,
            position = %position,
            percentage = percentage,
            duration_ms = invocation_started.elapsed().as_millis() as u64,
            "Invocation finished"
        );

        Ok(BatchResult {
            start_offset: request.offset,
            next_offset,
            position,
            percentage,
            total_items,
            tallies,
            reports,
            html,
            stop_reason,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::budget::StaticMemoryProbe;
    use crate::operations::InMemoryOperation;
    use std::time::Duration;

    const MIB: u64 = 1024 * 1024;

    fn controller(batch_size: u32) -> ProgressController {
        ProgressController::new(
            BudgetLimits {
                max_duration: Duration::from_secs(20),
                memory_ceiling_bytes: 128 * MIB,
                memory_threshold: 0.9,
            },
            Arc::new(StaticMemoryProbe::new(0)),
            batch_size,
        )
    }

    #[test]
    fn test_percent_complete() {
        assert_eq!(percent_complete(0, 0), 100.0);
        assert_eq!(percent_complete(5, 0), 100.0);
        assert_eq!(percent_complete(50, 120), 41.67);
        assert_eq!(percent_complete(100, 120), 83.33);
        assert_eq!(percent_complete(120, 120), 100.0);
        assert_eq!(percent_complete(500, 120), 100.0);
        assert_eq!(percent_complete(0, 10), 0.0);
        assert_eq!(percent_complete(99_999, 100_000), 99.99);
    }

    #[test]
    fn test_position_serde() {
        assert_eq!(serde_json::to_string(&Position::Offset(50)).unwrap(), "50");
        assert_eq!(serde_json::to_string(&Position::Done).unwrap(), "\"done\"");

        let parsed: Position = serde_json::from_str("\"done\"").unwrap();
        assert_eq!(parsed, Position::Done);
        let parsed: Position = serde_json::from_str("100").unwrap();
        assert_eq!(parsed, Position::Offset(100));
        let parsed: Position = serde_json::from_str("\"25\"").unwrap();
        assert_eq!(parsed, Position::Offset(25));
        assert!(serde_json::from_str::<Position>("-1").is_err());
        assert!(serde_json::from_str::<Position>("\"later\"").is_err());
    }

    #[test]
    fn test_tallies() {
        let mut tallies = Tallies::default();
        tallies.record(OutcomeKind::Success);
        tallies.record(OutcomeKind::Success);
        tallies.record(OutcomeKind::Skipped);

        let mut total = Tallies {
            success: 1,
            failed: 1,
            skipped: 0,
        };
        total.add(&tallies);
        assert_eq!(total.success, 3);
        assert_eq!(total.failed, 1);
        assert_eq!(total.skipped, 1);
        assert_eq!(total.total(), 5);
    }

    #[tokio::test]
    async fn test_three_invocations_cover_120_items() {
        let op = InMemoryOperation::with_items("numbers", 120);
        let controller = controller(50);

        let first = controller.run_batch(&op, 0).await.unwrap();
        assert_eq!(first.position, Position::Offset(50));
        assert_eq!(first.percentage, 41.67);
        assert_eq!(first.tallies.success, 50);

        let second = controller.run_batch(&op, 50).await.unwrap();
        assert_eq!(second.position, Position::Offset(100));
        assert_eq!(second.percentage, 83.33);

        let third = controller.run_batch(&op, 100).await.unwrap();
        assert_eq!(third.position, Position::Done);
        assert_eq!(third.next_offset, 120);
        assert_eq!(third.percentage, 100.0);
        assert_eq!(third.processed(), 20);
        assert_eq!(op.process_count(), 120);
    }

    #[tokio::test]
    async fn test_empty_dataset_completes_immediately() {
        let op = InMemoryOperation::with_items("empty", 0);
        let result = controller(50).run_batch(&op, 7).await.unwrap();

        assert!(result.is_complete());
        assert_eq!(result.next_offset, 7);
        assert_eq!(result.percentage, 100.0);
        assert!(result.html.is_empty());
    }

    #[tokio::test]
    async fn test_offset_past_end_completes() {
        let op = InMemoryOperation::with_items("numbers", 10);
        let result = controller(50).run_batch(&op, 10).await.unwrap();

        assert!(result.is_complete());
        assert_eq!(result.next_offset, 10);
        assert_eq!(op.process_count(), 0);
    }

    #[tokio::test]
    async fn test_item_errors_are_tallied_as_failed() {
        let op = InMemoryOperation::with_items("numbers", 4).with_processor(|item| {
            if item.key == "2" {
                Err(BulkProcessError::operation_failed("numbers", "row locked"))
            } else if item.key == "3" {
                Ok(ItemOutcome::skipped("nothing to do"))
            } else {
                Ok(ItemOutcome::success())
            }
        });

        let result = controller(50).run_batch(&op, 0).await.unwrap();
        assert_eq!(result.tallies, Tallies { success: 2, failed: 1, skipped: 1 });
        assert!(result.is_complete());
        assert_eq!(result.reports[1].outcome, OutcomeKind::Failed);
        assert!(result.reports[1].message.contains("row locked"));
        assert!(result.html.contains("bulk-process-failed"));
    }

    #[tokio::test]
    async fn test_fetch_error_aborts_invocation() {
        let op = InMemoryOperation::with_items("numbers", 4);
        op.set_fetch_failure(Some("connection reset".to_string()));

        let err = controller(50).run_batch(&op, 0).await.unwrap_err();
        assert!(matches!(err, BulkProcessError::OperationFailed { .. }));
        assert_eq!(op.process_count(), 0);
    }

    #[tokio::test]
    async fn test_time_budget_stops_after_current_item() {
        let op = InMemoryOperation::with_items("slow", 10).with_item_delay(Duration::from_millis(30));
        let controller = ProgressController::new(
            BudgetLimits {
                max_duration: Duration::from_millis(50),
                memory_ceiling_bytes: 128 * MIB,
                memory_threshold: 0.9,
            },
            Arc::new(StaticMemoryProbe::new(0)),
            10,
        );

        let result = controller.run_batch(&op, 0).await.unwrap();
        assert!(result.next_offset >= 1 && result.next_offset <= 3);
        assert_eq!(result.position, Position::Offset(result.next_offset));
        assert!(result.stop_reason.unwrap().contains("time limit"));
    }

    #[tokio::test]
    async fn test_memory_budget_stops_independently_of_time() {
        let op = InMemoryOperation::with_items("numbers", 10);
        let probe = Arc::new(StaticMemoryProbe::new(120 * MIB));
        let controller = ProgressController::new(
            BudgetLimits {
                max_duration: Duration::from_secs(3_600),
                memory_ceiling_bytes: 128 * MIB,
                memory_threshold: 0.9,
            },
            probe,
            10,
        );

        let result = controller.run_batch(&op, 0).await.unwrap();
        assert_eq!(result.next_offset, 1);
        assert!(result.stop_reason.unwrap().contains("memory"));
    }

    #[tokio::test]
    async fn test_operation_batch_size_overrides_default() {
        let op = InMemoryOperation::with_items("numbers", 30).with_batch_size(7);
        let controller = controller(50);

        assert_eq!(controller.batch_size_for(&op), 7);
        let result = controller.run_batch(&op, 0).await.unwrap();
        assert_eq!(result.next_offset, 7);
    }

    #[tokio::test]
    async fn test_mismatched_request_action_rejected() {
        let op = InMemoryOperation::with_items("numbers", 3);
        let request = BatchRequest {
            offset: 0,
            action: "other".to_string(),
            batch_size: 10,
        };
        assert!(controller(50).execute(&op, &request).await.is_err());
    }
}
