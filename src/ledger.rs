//! # Run Ledger
//!
//! In-memory bookkeeping for runs between invocations:
//!
//! - one lease per action, so two runs of the same action cannot interleave
//! - the next expected offset, with a replay cache for the previous invocation
//! - cumulative success/failed/skipped tallies
//!
//! Each run sits behind its own async mutex; callers hold the guard for the
//! whole invocation so overlapping requests for one run are serialised.
//! Nothing here survives a restart.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::LedgerConfig;
use crate::constants::{RunStatus, PERCENT_COMPLETE};
use crate::controller::{BatchResult, Position, Tallies};
use crate::error::{BulkProcessError, Result};
use crate::logging::log_run_operation;

#[derive(Debug, Clone)]
struct LastInvocation {
    start_offset: u64,
    result: BatchResult,
}

/// Server-side state of one run
#[derive(Debug)]
pub struct RunRecord {
    pub run_id: Uuid,
    pub action: String,
    pub total_items: u64,
    pub next_offset: u64,
    pub status: RunStatus,
    /// Cumulative across all invocations
    pub tallies: Tallies,
    pub started_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    /// Highest percentage reported so far
    percentage: f64,
    last_touch: Instant,
    last_invocation: Option<LastInvocation>,
}

/// Outcome of checking a requested offset against the run
#[derive(Debug, Clone, PartialEq)]
pub enum OffsetCheck {
    /// Offset is the run's next offset; process it
    Fresh,
    /// Offset repeats the previous invocation; answer from cache
    Replay(BatchResult),
}

/// Serializable view of a run, used for resume and summary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSnapshot {
    pub run_id: Uuid,
    pub action: String,
    pub status: RunStatus,
    pub total_items: u64,
    pub next_offset: u64,
    pub position: Position,
    pub percentage: f64,
    pub totals: Tallies,
    pub started_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl RunRecord {
    fn new(action: &str, total_items: u64) -> Self {
        let now = Utc::now();
        Self {
            run_id: Uuid::new_v4(),
            action: action.to_string(),
            total_items,
            next_offset: 0,
            status: RunStatus::Running,
            tallies: Tallies::default(),
            started_at: now,
            last_activity_at: now,
            finished_at: None,
            percentage: 0.0,
            last_touch: Instant::now(),
            last_invocation: None,
        }
    }

    fn touch(&mut self) {
        self.last_touch = Instant::now();
        self.last_activity_at = Utc::now();
    }

    fn finish(&mut self, status: RunStatus) {
        self.status = status;
        self.finished_at = Some(Utc::now());
    }

    fn idle_for(&self) -> Duration {
        self.last_touch.elapsed()
    }

    /// Classify a requested offset.
    ///
    /// The previous invocation's start offset replays its cached result even
    /// after completion, so a client whose last response was lost can retry.
    pub fn check_offset(&self, offset: u64) -> Result<OffsetCheck> {
        if self.status == RunStatus::Aborted || self.status == RunStatus::Abandoned {
            return Err(BulkProcessError::RunNotActive {
                run_id: self.run_id,
                status: self.status.to_string(),
            });
        }

        if let Some(last) = &self.last_invocation {
            if last.start_offset == offset {
                return Ok(OffsetCheck::Replay(last.result.clone()));
            }
        }

        if !self.status.is_active() {
            return Err(BulkProcessError::RunNotActive {
                run_id: self.run_id,
                status: self.status.to_string(),
            });
        }

        if offset == self.next_offset {
            Ok(OffsetCheck::Fresh)
        } else {
            Err(BulkProcessError::OffsetMismatch {
                requested: offset,
                expected: self.next_offset,
            })
        }
    }

    pub fn ensure_action(&self, action: &str) -> Result<()> {
        if self.action == action {
            Ok(())
        } else {
            Err(BulkProcessError::ActionMismatch {
                run_id: self.run_id,
                expected: self.action.clone(),
                actual: action.to_string(),
            })
        }
    }

    pub fn snapshot(&self) -> RunSnapshot {
        let (position, percentage) = if self.status == RunStatus::Completed {
            (Position::Done, PERCENT_COMPLETE)
        } else {
            (Position::Offset(self.next_offset), self.percentage)
        };

        RunSnapshot {
            run_id: self.run_id,
            action: self.action.clone(),
            status: self.status,
            total_items: self.total_items,
            next_offset: self.next_offset,
            position,
            percentage,
            totals: self.tallies,
            started_at: self.started_at,
            last_activity_at: self.last_activity_at,
            finished_at: self.finished_at,
        }
    }
}

#[derive(Debug)]
pub struct RunLedger {
    runs: DashMap<Uuid, Arc<Mutex<RunRecord>>>,
    leases: DashMap<String, Uuid>,
    begin_lock: Mutex<()>,
    lease_ttl: Duration,
    retention: Duration,
}

impl RunLedger {
    pub fn new(lease_ttl: Duration, retention: Duration) -> Self {
        Self {
            runs: DashMap::new(),
            leases: DashMap::new(),
            begin_lock: Mutex::new(()),
            lease_ttl,
            retention,
        }
    }

    pub fn from_config(config: &LedgerConfig) -> Self {
        Self::new(config.lease_ttl(), config.retention())
    }

    /// Start a run of `action`, taking the action's lease.
    ///
    /// An active run that has been idle longer than the lease TTL is marked
    /// abandoned and its lease taken over; a live one is a conflict.
    pub async fn begin(&self, action: &str, total_items: u64) -> Result<RunSnapshot> {
        let _guard = self.begin_lock.lock().await;
        self.prune_expired();

        let holder = self.leases.get(action).map(|entry| *entry.value());
        if let Some(holder_id) = holder {
            if let Some(handle) = self.handle(holder_id) {
                let mut holder = handle.lock().await;
                if holder.status.is_active() {
                    if holder.idle_for() < self.lease_ttl {
                        return Err(BulkProcessError::RunConflict {
                            action: action.to_string(),
                            run_id: holder_id,
                        });
                    }

                    holder.finish(RunStatus::Abandoned);
                    warn!(
                        run_id = %holder_id,
                        action = %action,
                        idle_ms = holder.idle_for().as_millis() as u64,
                        "Lease expired, marking run abandoned"
                    );
                    log_run_operation(
                        "abandoned",
                        holder_id,
                        action,
                        &holder.status.to_string(),
                        Some("lease taken over by a new run"),
                    );
                }
            }
        }

        let record = RunRecord::new(action, total_items);
        let snapshot = record.snapshot();
        self.runs
            .insert(record.run_id, Arc::new(Mutex::new(record)));
        self.leases.insert(action.to_string(), snapshot.run_id);

        log_run_operation(
            "started",
            snapshot.run_id,
            action,
            &snapshot.status.to_string(),
            Some(&format!("total_items={total_items}")),
        );
        Ok(snapshot)
    }

    /// Exclusive access to a run for the duration of one invocation
    pub async fn lock(&self, run_id: Uuid) -> Result<OwnedMutexGuard<RunRecord>> {
        let handle = self
            .handle(run_id)
            .ok_or(BulkProcessError::RunNotFound(run_id))?;
        Ok(handle.lock_owned().await)
    }

    /// Fold a fresh invocation into the run.
    ///
    /// The reported percentage never drops below an earlier one, even when
    /// the dataset grew since the last invocation; `result` is adjusted
    /// before it is cached for replay.
    pub fn record(
        &self,
        run: &mut RunRecord,
        start_offset: u64,
        result: &mut BatchResult,
    ) -> RunSnapshot {
        if !result.is_complete() {
            result.percentage = result.percentage.max(run.percentage);
        }
        run.percentage = result.percentage;
        run.tallies.add(&result.tallies);
        run.next_offset = result.next_offset;
        run.total_items = result.total_items;
        run.last_invocation = Some(LastInvocation {
            start_offset,
            result: result.clone(),
        });
        run.touch();

        if result.is_complete() {
            run.finish(RunStatus::Completed);
            self.release_lease(&run.action, run.run_id);
            log_run_operation(
                "completed",
                run.run_id,
                &run.action,
                &run.status.to_string(),
                Some(&format!(
                    "success={} failed={} skipped={}",
                    run.tallies.success, run.tallies.failed, run.tallies.skipped
                )),
            );
        }

        run.snapshot()
    }

    /// Stop a run and release its lease. Aborting an aborted run is a no-op.
    pub async fn abort(&self, run_id: Uuid) -> Result<RunSnapshot> {
        let mut run = self.lock(run_id).await?;
        match run.status {
            RunStatus::Running | RunStatus::Abandoned => {
                run.finish(RunStatus::Aborted);
                self.release_lease(&run.action, run_id);
                log_run_operation("aborted", run_id, &run.action, &run.status.to_string(), None);
            }
            RunStatus::Aborted => {}
            RunStatus::Completed => {
                return Err(BulkProcessError::RunNotActive {
                    run_id,
                    status: run.status.to_string(),
                });
            }
        }
        Ok(run.snapshot())
    }

    pub async fn snapshot(&self, run_id: Uuid) -> Result<RunSnapshot> {
        Ok(self.lock(run_id).await?.snapshot())
    }

    /// Current lease holder of `action`
    pub fn active_run(&self, action: &str) -> Option<Uuid> {
        self.leases.get(action).map(|entry| *entry.value())
    }

    /// Drop runs that finished, or went idle, longer than the retention period
    /// ago. Runs locked by an in-flight invocation are skipped.
    pub fn prune_expired(&self) -> usize {
        let mut expired = Vec::new();
        for entry in self.runs.iter() {
            let Ok(mut run) = entry.value().try_lock() else {
                continue;
            };
            if run.idle_for() < self.retention {
                continue;
            }
            if run.status.is_active() {
                run.finish(RunStatus::Abandoned);
            }
            expired.push((run.run_id, run.action.clone()));
        }

        for (run_id, action) in &expired {
            self.runs.remove(run_id);
            self.release_lease(action, *run_id);
        }

        if !expired.is_empty() {
            info!(pruned = expired.len(), "Pruned expired runs");
        }
        expired.len()
    }

    pub fn len(&self) -> usize {
        self.runs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.runs.is_empty()
    }

    fn handle(&self, run_id: Uuid) -> Option<Arc<Mutex<RunRecord>>> {
        self.runs.get(&run_id).map(|entry| entry.value().clone())
    }

    fn release_lease(&self, action: &str, run_id: Uuid) {
        let released = self
            .leases
            .remove_if(action, |_, holder| *holder == run_id)
            .is_some();
        if released {
            debug!(run_id = %run_id, action = %action, "Lease released");
        }
    }
}
