//! # Driver State Machine
//!
//! ```text
//! Idle → Requesting ⇄ Advancing
//!            ↓   ↘
//!          Done  Failed        (any non-terminal state) → Aborted
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::driver::error::DriverError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum DriverState {
    #[default]
    Idle,
    /// A batch call is in flight (including retries)
    Requesting,
    /// A response moved the offset forward; the next call is about to go out
    Advancing,
    Done,
    Aborted,
    /// Retries were exhausted or the server refused the run
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DriverEvent {
    /// Issue the next batch call
    Request,
    /// Response with progress short of completion
    Advanced,
    /// Response signalling completion
    Completed,
    /// User abort
    Abort,
    /// Unrecoverable or exhausted transport failure
    Failure,
}

impl DriverState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            DriverState::Done | DriverState::Aborted | DriverState::Failed
        )
    }

    /// Apply `event`, rejecting transitions the protocol does not allow
    pub fn transition(self, event: DriverEvent) -> Result<DriverState, DriverError> {
        use DriverEvent as E;
        use DriverState as S;

        let next = match (self, event) {
            (S::Idle, E::Request) | (S::Advancing, E::Request) => S::Requesting,
            (S::Requesting, E::Advanced) => S::Advancing,
            (S::Requesting, E::Completed) => S::Done,
            (S::Requesting, E::Failure) => S::Failed,
            (state, E::Abort) if !state.is_terminal() => S::Aborted,
            (from, event) => return Err(DriverError::InvalidTransition { from, event }),
        };
        Ok(next)
    }
}

impl fmt::Display for DriverState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DriverState::Idle => "idle",
            DriverState::Requesting => "requesting",
            DriverState::Advancing => "advancing",
            DriverState::Done => "done",
            DriverState::Aborted => "aborted",
            DriverState::Failed => "failed",
        };
        f.write_str(name)
    }
}
