//! # System Constants
//!
//! Defaults and fixed identifiers that define the operational boundaries of a
//! bulk-process run. Configuration values override the defaults; the token
//! scopes and wire markers are fixed.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Default per-invocation item limit
pub const DEFAULT_BATCH_SIZE: u32 = 50;

/// Default wall-clock budget for one invocation, in seconds.
/// A 30s limit is common on shared hosting, so stay under it.
pub const DEFAULT_TIME_LIMIT_SECONDS: u64 = 20;

/// Headroom the HTTP request timeout must leave above the invocation time
/// limit, for the item that is in flight when the budget runs out
pub const REQUEST_TIMEOUT_HEADROOM_MS: u64 = 5_000;

/// Fraction of the memory ceiling an invocation may reach before stopping
pub const DEFAULT_MEMORY_THRESHOLD: f64 = 0.9;

/// Memory ceiling used when the host limit cannot be determined
pub const DEFAULT_MEMORY_LIMIT: &str = "128M";

/// Memory ceiling, in MiB, used when the host reports no limit
pub const UNLIMITED_MEMORY_CEILING_MB: u64 = 32_000;

/// Wire marker sent as `position` once a run has finished
pub const POSITION_DONE: &str = "done";

/// Percentage reported once a run has finished
pub const PERCENT_COMPLETE: f64 = 100.0;

/// Token scopes, mirroring the two forms a run hands out
pub mod token_scopes {
    /// Scope for batch invocations, abort and status of a run
    pub const SECURITY: &str = "bulk-process-security";
    /// Scope for the summary view reached after completion
    pub const COMPLETE: &str = "bulk-process-complete";
}

/// Environment variable names read by the crate
pub mod env {
    pub const ENVIRONMENT: &str = "BULK_PROCESS_ENV";
    pub const CONFIG_PATH: &str = "BULK_PROCESS_CONFIG_PATH";
    pub const LOG_FORMAT: &str = "BULK_PROCESS_LOG_FORMAT";
    pub const BIND_ADDRESS: &str = "BULK_PROCESS_BIND_ADDRESS";
    pub const API_KEY: &str = "BULK_PROCESS_API_KEY";
    pub const TOKEN_SECRET: &str = "BULK_PROCESS_TOKEN_SECRET";
    pub const SERVER_URL: &str = "BULK_PROCESS_SERVER_URL";
}

/// HTTP header carrying the optional API key
pub const API_KEY_HEADER: &str = "x-api-key";

/// Outcome of processing a single item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeKind {
    Success,
    Failed,
    Skipped,
}

impl OutcomeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutcomeKind::Success => "success",
            OutcomeKind::Failed => "failed",
            OutcomeKind::Skipped => "skipped",
        }
    }
}

impl fmt::Display for OutcomeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle status of a run tracked by the ledger
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Completed,
    Aborted,
    /// Lease expired without activity and was taken over by a newer run
    Abandoned,
}

impl RunStatus {
    /// Whether the run can still accept batch invocations
    pub fn is_active(&self) -> bool {
        matches!(self, RunStatus::Running)
    }

    pub fn is_terminal(&self) -> bool {
        !self.is_active()
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunStatus::Running => write!(f, "running"),
            RunStatus::Completed => write!(f, "completed"),
            RunStatus::Aborted => write!(f, "aborted"),
            RunStatus::Abandoned => write!(f, "abandoned"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_kind_serialization() {
        assert_eq!(
            serde_json::to_string(&OutcomeKind::Skipped).unwrap(),
            "\"skipped\""
        );
        assert_eq!(OutcomeKind::Failed.to_string(), "failed");
    }

    #[test]
    fn test_run_status_activity() {
        assert!(RunStatus::Running.is_active());
        assert!(RunStatus::Completed.is_terminal());
        assert!(RunStatus::Aborted.is_terminal());
        assert!(RunStatus::Abandoned.is_terminal());
        assert_eq!(RunStatus::Abandoned.to_string(), "abandoned");
    }
}
