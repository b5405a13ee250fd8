//! # Application Context
//!
//! Everything a server needs to answer batch requests, built once at startup
//! and shared behind an `Arc`. Handlers and tests go through these methods so
//! token checks, leases and offset validation are applied the same way
//! everywhere.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, info};
use uuid::Uuid;

use crate::budget::{MemoryProbe, ProcessMemoryProbe};
use crate::config::{BulkProcessConfig, ConfigResult};
use crate::controller::{BatchResult, Position, ProgressController, Tallies};
use crate::error::{BulkProcessError, Result};
use crate::fragment;
use crate::ledger::{OffsetCheck, RunLedger, RunRecord, RunSnapshot};
use crate::logging::log_batch_invocation;
use crate::operation::{BulkOperation, OperationDescriptor};
use crate::registry::OperationRegistry;
use crate::security::{complete_scope, security_scope, TokenIssuer};

/// Handed to the client when a run starts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StartedRun {
    pub run_id: Uuid,
    pub action_name: String,
    pub security: String,
    pub total_items: u64,
    pub batch_size: u32,
    pub started_at: DateTime<Utc>,
}

/// One answered batch call
#[derive(Debug, Clone, PartialEq)]
pub struct BatchOutcome {
    pub run_id: Uuid,
    pub result: BatchResult,
    /// Cumulative over the run
    pub totals: Tallies,
    /// Answered from the replay cache
    pub replayed: bool,
    /// Summary link, present once the run is complete
    pub summary_url: Option<String>,
}

/// The "done" step of a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub run: RunSnapshot,
    pub label: String,
    pub html: String,
}

#[derive(Debug)]
pub struct BulkProcessContext {
    config: BulkProcessConfig,
    registry: Arc<OperationRegistry>,
    controller: ProgressController,
    ledger: Arc<RunLedger>,
    tokens: TokenIssuer,
}

impl BulkProcessContext {
    /// Build a context measuring this process's memory
    pub fn new(config: BulkProcessConfig, registry: Arc<OperationRegistry>) -> ConfigResult<Self> {
        Self::with_probe(config, registry, Arc::new(ProcessMemoryProbe::new()))
    }

    pub fn with_probe(
        config: BulkProcessConfig,
        registry: Arc<OperationRegistry>,
        probe: Arc<dyn MemoryProbe>,
    ) -> ConfigResult<Self> {
        config.validate()?;
        let controller = ProgressController::from_config(&config.batch, probe)?;
        let tokens = TokenIssuer::from_config(&config.security)?;
        let ledger = Arc::new(RunLedger::from_config(&config.ledger));

        info!(
            operations = registry.len(),
            batch_size = config.batch.batch_size,
            time_limit_seconds = config.batch.time_limit_seconds,
            memory_ceiling_bytes = controller.limits().memory_ceiling_bytes,
            "Bulk process context initialized"
        );

        Ok(Self {
            config,
            registry,
            controller,
            ledger,
            tokens,
        })
    }

    pub fn config(&self) -> &BulkProcessConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<OperationRegistry> {
        &self.registry
    }

    pub fn ledger(&self) -> &RunLedger {
        &self.ledger
    }

    pub fn tokens(&self) -> &TokenIssuer {
        &self.tokens
    }

    pub fn operations(&self) -> Vec<OperationDescriptor> {
        self.registry.list()
    }

    /// Take the action's lease and issue the run's security token
    pub async fn start_run(&self, action: &str) -> Result<StartedRun> {
        let operation = self.registry.get(action)?;
        let total_items = operation.total_items().await?;
        let snapshot = self.ledger.begin(action, total_items).await?;

        Ok(StartedRun {
            run_id: snapshot.run_id,
            action_name: snapshot.action,
            security: self.tokens.issue(&security_scope(snapshot.run_id)),
            total_items,
            batch_size: self.controller.batch_size_for(operation.as_ref()),
            started_at: snapshot.started_at,
        })
    }

    /// Answer one batch call for a run.
    ///
    /// The token is checked before anything else; the run stays locked until
    /// the invocation has been recorded.
    pub async fn process_batch(
        &self,
        run_id: Uuid,
        action: &str,
        position: Position,
        security: &str,
    ) -> Result<BatchOutcome> {
        self.verify_security(run_id, security)?;
        let operation = self.registry.get(action)?;

        let run = self.ledger.lock(run_id).await?;
        run.ensure_action(action)?;

        let offset = match position {
            Position::Offset(offset) => offset,
            Position::Done => {
                return Err(BulkProcessError::InvalidRequest(
                    "position \"done\" cannot be processed".to_string(),
                ))
            }
        };

        let check = run.check_offset(offset)?;
        let (result, totals, replayed) = match check {
            OffsetCheck::Replay(result) => {
                debug!(
                    run_id = %run_id,
                    action = %action,
                    offset = offset,
                    "Replaying cached result for repeated offset"
                );
                (result, run.tallies, true)
            }
            OffsetCheck::Fresh => {
                let (result, snapshot) = self.spawn_invocation(run, operation, offset).await?;
                (result, snapshot.totals, false)
            }
        };

        let summary_url = result
            .is_complete()
            .then(|| self.summary_url(run_id, &totals));

        Ok(BatchOutcome {
            run_id,
            result,
            totals,
            replayed,
            summary_url,
        })
    }

    /// Process and record one invocation on its own task.
    ///
    /// The task owns the run's guard, so a caller that goes away (request
    /// timeout, client disconnect) does not stop the items already started
    /// from being recorded; a retry of the same offset then replays.
    async fn spawn_invocation(
        &self,
        mut run: OwnedMutexGuard<RunRecord>,
        operation: Arc<dyn BulkOperation>,
        offset: u64,
    ) -> Result<(BatchResult, RunSnapshot)> {
        let controller = self.controller.clone();
        let ledger = Arc::clone(&self.ledger);

        let task = tokio::spawn(async move {
            let started = Instant::now();
            let mut result = controller.run_batch(operation.as_ref(), offset).await?;
            let snapshot = ledger.record(&mut run, offset, &mut result);

            log_batch_invocation(
                run.run_id,
                &run.action,
                offset,
                result.processed(),
                &result.position.to_string(),
                result.percentage,
                result.stop_reason.as_deref(),
                started.elapsed().as_millis() as u64,
            );
            Ok::<_, BulkProcessError>((result, snapshot))
        });

        task.await
            .map_err(|e| BulkProcessError::Internal(format!("batch invocation task failed: {e}")))?
    }

    /// Run state for resuming, guarded by the run's security token
    pub async fn run_status(&self, run_id: Uuid, security: &str) -> Result<RunSnapshot> {
        self.verify_security(run_id, security)?;
        self.ledger.snapshot(run_id).await
    }

    pub async fn abort_run(&self, run_id: Uuid, security: &str) -> Result<RunSnapshot> {
        self.verify_security(run_id, security)?;
        self.ledger.abort(run_id).await
    }

    /// Completion view, guarded by the completion token from the summary URL
    pub async fn summary(&self, run_id: Uuid, token: &str) -> Result<RunSummary> {
        if !self.tokens.verify(&complete_scope(run_id), token) {
            return Err(BulkProcessError::InvalidToken);
        }

        let run = self.ledger.snapshot(run_id).await?;
        let label = self
            .registry
            .get(&run.action)
            .map(|operation| operation.label().to_string())
            .unwrap_or_else(|_| run.action.clone());
        let html = fragment::render_summary(&label, &run.totals)?;

        Ok(RunSummary { run, label, html })
    }

    /// Relative summary link carrying the completion token and final counts
    pub fn summary_url(&self, run_id: Uuid, totals: &Tallies) -> String {
        format!(
            "/v1/runs/{run_id}/summary?_token={}&success={}&failed={}&skipped={}",
            self.tokens.issue(&complete_scope(run_id)),
            totals.success,
            totals.failed,
            totals.skipped
        )
    }

    fn verify_security(&self, run_id: Uuid, security: &str) -> Result<()> {
        if self.tokens.verify(&security_scope(run_id), security) {
            Ok(())
        } else {
            Err(BulkProcessError::InvalidToken)
        }
    }
}
