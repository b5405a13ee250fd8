//! # Batch Driver
//!
//! Client side of a run: call the batch endpoint with the last known offset
//! until the server reports completion, feeding each response to a
//! [`ProgressObserver`].
//!
//! Recoverable transport failures are retried with capped exponential
//! backoff; the server answers a repeated offset from its replay cache, so a
//! retry never processes items twice. The loop stops at `max_iterations`, on
//! cancellation (after telling the server to release the lease), or when the
//! server refuses the run.

pub mod error;
pub mod observer;
pub mod state;
pub mod transport;

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::DriverConfig;
use crate::constants::RunStatus;
use crate::context::StartedRun;
use crate::controller::{Position, Tallies};
use crate::types::{BatchRequestBody, BatchResponseData};

pub use error::{ClientError, ClientResult, DriverError};
pub use observer::{ConsoleProgress, NoopObserver, ProgressObserver, RecordingObserver};
pub use state::{DriverEvent, DriverState};
pub use transport::{BatchTransport, HttpTransport};

/// What the driver needs to keep calling a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunHandle {
    pub run_id: Uuid,
    /// Fixed for the life of the run
    pub action: String,
    pub security: String,
    pub total_items: u64,
}

impl From<StartedRun> for RunHandle {
    fn from(started: StartedRun) -> Self {
        Self {
            run_id: started.run_id,
            action: started.action_name,
            security: started.security,
            total_items: started.total_items,
        }
    }
}

/// Result of a run driven to completion
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriverOutcome {
    pub run_id: Uuid,
    pub action: String,
    pub state: DriverState,
    pub totals: Tallies,
    /// Summary link carrying the final counts
    pub summary_url: Option<String>,
    /// Batch calls answered, replays included
    pub iterations: u64,
    pub retries: u32,
}

pub struct BatchDriver {
    transport: Arc<dyn BatchTransport>,
    config: DriverConfig,
    cancel: CancellationToken,
    state: DriverState,
}

impl BatchDriver {
    pub fn new(transport: Arc<dyn BatchTransport>, config: DriverConfig) -> Self {
        Self {
            transport,
            config,
            cancel: CancellationToken::new(),
            state: DriverState::Idle,
        }
    }

    /// Token that aborts the run when cancelled
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn state(&self) -> DriverState {
        self.state
    }

    /// Start a new run of `action` and drive it to completion
    pub async fn run(
        &mut self,
        action: &str,
        observer: &dyn ProgressObserver,
    ) -> Result<DriverOutcome, DriverError> {
        let started = self.transport.start_run(action).await?;
        info!(
            run_id = %started.run_id,
            action = %started.action_name,
            total_items = started.total_items,
            batch_size = started.batch_size,
            "Run started"
        );
        self.drive(RunHandle::from(started), 0, observer).await
    }

    /// Continue an existing run from the offset the server recorded
    pub async fn resume(
        &mut self,
        run_id: Uuid,
        action: &str,
        security: &str,
        observer: &dyn ProgressObserver,
    ) -> Result<DriverOutcome, DriverError> {
        let snapshot = self.transport.run_status(run_id, security).await?;
        if snapshot.action != action {
            return Err(DriverError::Protocol(format!(
                "run {run_id} belongs to '{}', not '{action}'",
                snapshot.action
            )));
        }

        let handle = RunHandle {
            run_id,
            action: snapshot.action.clone(),
            security: security.to_string(),
            total_items: snapshot.total_items,
        };

        match snapshot.status {
            RunStatus::Running => {
                info!(
                    run_id = %run_id,
                    offset = snapshot.next_offset,
                    "Resuming run"
                );
                self.drive(handle, snapshot.next_offset, observer).await
            }
            RunStatus::Completed => {
                info!(run_id = %run_id, "Run already complete");
                self.state = DriverState::Idle;
                observer.on_start(handle.total_items);
                self.transition(DriverEvent::Request)?;
                self.transition(DriverEvent::Completed)?;
                let outcome = DriverOutcome {
                    run_id,
                    action: handle.action,
                    state: self.state,
                    totals: snapshot.totals,
                    summary_url: None,
                    iterations: 0,
                    retries: 0,
                };
                observer.on_finish(&outcome);
                Ok(outcome)
            }
            status => Err(DriverError::Protocol(format!(
                "run {run_id} cannot be resumed: {status}"
            ))),
        }
    }

    /// Drive `handle` starting at `offset`
    ///
    /// A driver can run several times in sequence; each call starts from
    /// `Idle`. Cancelling the token ends this run and every later one.
    pub async fn drive(
        &mut self,
        handle: RunHandle,
        offset: u64,
        observer: &dyn ProgressObserver,
    ) -> Result<DriverOutcome, DriverError> {
        self.state = DriverState::Idle;
        observer.on_start(handle.total_items);
        self.transition(DriverEvent::Request)?;

        let mut position = offset;
        let mut iterations: u64 = 0;
        let mut retries: u32 = 0;

        loop {
            if self.cancel.is_cancelled() {
                return self.abort(&handle, position).await;
            }

            if iterations >= self.config.max_iterations {
                self.transition(DriverEvent::Failure)?;
                warn!(
                    run_id = %handle.run_id,
                    limit = self.config.max_iterations,
                    position = position,
                    "Iteration limit reached"
                );
                return Err(DriverError::IterationLimit {
                    limit: self.config.max_iterations,
                    position,
                });
            }

            let body = BatchRequestBody {
                action_name: handle.action.clone(),
                position: Position::Offset(position),
                security: handle.security.clone(),
            };

            let (response, attempts) = match self.request_with_retry(&handle, &body, observer).await {
                Ok(answer) => answer,
                Err(DriverError::Aborted { .. }) => return self.abort(&handle, position).await,
                Err(error) => {
                    self.transition(DriverEvent::Failure)?;
                    return Err(error);
                }
            };
            iterations += 1;
            retries += attempts;
            observer.on_batch(&response);

            match response.position {
                Position::Done => {
                    self.transition(DriverEvent::Completed)?;
                    let outcome = DriverOutcome {
                        run_id: handle.run_id,
                        action: handle.action.clone(),
                        state: self.state,
                        totals: response.totals,
                        summary_url: response.url.clone(),
                        iterations,
                        retries,
                    };
                    info!(
                        run_id = %handle.run_id,
                        iterations = iterations,
                        success = outcome.totals.success,
                        failed = outcome.totals.failed,
                        skipped = outcome.totals.skipped,
                        "Run complete"
                    );
                    observer.on_finish(&outcome);
                    return Ok(outcome);
                }
                Position::Offset(next) if next <= position => {
                    self.transition(DriverEvent::Failure)?;
                    return Err(DriverError::Protocol(format!(
                        "server returned position {next} after request at {position}"
                    )));
                }
                Position::Offset(next) => {
                    self.transition(DriverEvent::Advanced)?;
                    debug!(
                        run_id = %handle.run_id,
                        position = next,
                        percentage = response.percentage,
                        "Advancing"
                    );
                    position = next;
                    self.transition(DriverEvent::Request)?;
                }
            }
        }
    }

    /// One batch call with retries; returns the response and the retry count
    async fn request_with_retry(
        &self,
        handle: &RunHandle,
        body: &BatchRequestBody,
        observer: &dyn ProgressObserver,
    ) -> Result<(BatchResponseData, u32), DriverError> {
        let position = body.position.offset().unwrap_or_default();
        let mut attempt: u32 = 0;

        loop {
            let result = tokio::select! {
                _ = self.cancel.cancelled() => return Err(DriverError::Aborted { position }),
                result = self.transport.run_batch(handle.run_id, body) => result,
            };

            let error = match result {
                Ok(data) => return Ok((data, attempt)),
                Err(error) => error,
            };

            if !error.is_recoverable() {
                return Err(DriverError::Client(error));
            }
            if attempt >= self.config.max_retries {
                return Err(DriverError::RetriesExhausted {
                    attempts: attempt + 1,
                    source: error,
                });
            }

            attempt += 1;
            let delay = self.config.backoff_delay(attempt);
            warn!(
                run_id = %handle.run_id,
                attempt = attempt,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "Batch request failed, retrying"
            );
            observer.on_retry(attempt, delay, &error);

            tokio::select! {
                _ = self.cancel.cancelled() => return Err(DriverError::Aborted { position }),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    async fn abort(&mut self, handle: &RunHandle, position: u64) -> Result<DriverOutcome, DriverError> {
        self.transition(DriverEvent::Abort)?;
        match self.transport.abort_run(handle.run_id, &handle.security).await {
            Ok(_) => info!(run_id = %handle.run_id, position = position, "Run aborted"),
            Err(error) => warn!(
                run_id = %handle.run_id,
                error = %error,
                "Run aborted locally; server lease will expire on its own"
            ),
        }
        Err(DriverError::Aborted { position })
    }

    fn transition(&mut self, event: DriverEvent) -> Result<(), DriverError> {
        let next = self.state.transition(event)?;
        debug!(from = %self.state, to = %next, event = ?event, "Driver transition");
        self.state = next;
        Ok(())
    }
}
