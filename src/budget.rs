//! # Run Budget
//!
//! Per-invocation guard that decides when a batch invocation must stop early.
//!
//! Two checks run after every processed item:
//!
//! - **Time**: wall-clock time since the invocation started reached the limit
//! - **Memory**: process memory reached a fraction (default 90%) of the ceiling
//!
//! The memory ceiling is resolved once at startup from the configured limit,
//! else from the host's cgroup limit, else [`DEFAULT_MEMORY_LIMIT`].

use parking_lot::Mutex;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use sysinfo::{Pid, System};
use thiserror::Error;
use tracing::debug;

use crate::config::{BatchConfig, ConfigResult, ConfigurationError};
use crate::constants::{DEFAULT_MEMORY_LIMIT, UNLIMITED_MEMORY_CEILING_MB};

const KIB: u64 = 1024;
const MIB: u64 = 1024 * KIB;
const GIB: u64 = 1024 * MIB;

/// Errors parsing a shorthand memory limit such as `128M`
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MemoryLimitParseError {
    #[error("memory limit is empty")]
    Empty,
    #[error("memory limit '{0}' is not a number with an optional K, M or G suffix")]
    Malformed(String),
    #[error("memory limit '{0}' overflows")]
    Overflow(String),
}

/// Host memory limit in shorthand notation
///
/// Accepts plain bytes (`134217728`), `K`/`M`/`G` suffixes in either case,
/// and `-1` or `unlimited` for no limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryLimit {
    Bytes(u64),
    Unlimited,
}

impl MemoryLimit {
    /// Byte ceiling the budget compares against.
    ///
    /// An unlimited host still gets a finite ceiling of 32000M.
    pub fn ceiling_bytes(&self) -> u64 {
        match self {
            MemoryLimit::Bytes(bytes) => *bytes,
            MemoryLimit::Unlimited => UNLIMITED_MEMORY_CEILING_MB * MIB,
        }
    }
}

impl FromStr for MemoryLimit {
    type Err = MemoryLimitParseError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let value = raw.trim();
        if value.is_empty() {
            return Err(MemoryLimitParseError::Empty);
        }
        if value == "-1" || value.eq_ignore_ascii_case("unlimited") {
            return Ok(MemoryLimit::Unlimited);
        }

        let (digits, multiplier) = match value.chars().last() {
            Some('k' | 'K') => (&value[..value.len() - 1], KIB),
            Some('m' | 'M') => (&value[..value.len() - 1], MIB),
            Some('g' | 'G') => (&value[..value.len() - 1], GIB),
            _ => (value, 1),
        };

        let amount: u64 = digits
            .trim()
            .parse()
            .map_err(|_| MemoryLimitParseError::Malformed(value.to_string()))?;

        amount
            .checked_mul(multiplier)
            .map(MemoryLimit::Bytes)
            .ok_or_else(|| MemoryLimitParseError::Overflow(value.to_string()))
    }
}

impl fmt::Display for MemoryLimit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MemoryLimit::Unlimited => write!(f, "unlimited"),
            MemoryLimit::Bytes(bytes) if bytes % GIB == 0 && *bytes > 0 => {
                write!(f, "{}G", bytes / GIB)
            }
            MemoryLimit::Bytes(bytes) if bytes % MIB == 0 && *bytes > 0 => {
                write!(f, "{}M", bytes / MIB)
            }
            MemoryLimit::Bytes(bytes) => write!(f, "{bytes}"),
        }
    }
}

/// Resolve the memory ceiling in bytes.
///
/// Precedence: configured limit, host cgroup limit, [`DEFAULT_MEMORY_LIMIT`].
pub fn resolve_memory_ceiling(configured: Option<&str>) -> Result<u64, MemoryLimitParseError> {
    if let Some(raw) = configured {
        let limit: MemoryLimit = raw.parse()?;
        debug!(
            configured = raw,
            ceiling_bytes = limit.ceiling_bytes(),
            "Using configured memory limit"
        );
        return Ok(limit.ceiling_bytes());
    }

    match detect_host_memory_limit() {
        Some(limit) => {
            debug!(host_limit = %limit, "Using host memory limit");
            Ok(limit.ceiling_bytes())
        }
        None => {
            let fallback: MemoryLimit = DEFAULT_MEMORY_LIMIT.parse()?;
            debug!(fallback = %fallback, "Host memory limit undeterminable, using default");
            Ok(fallback.ceiling_bytes())
        }
    }
}

/// Best-effort detection of a container memory limit
fn detect_host_memory_limit() -> Option<MemoryLimit> {
    let mut sys = System::new();
    sys.refresh_memory();
    sys.cgroup_limits()
        .map(|limits| limits.total_memory)
        .filter(|total| *total > 0)
        .map(MemoryLimit::Bytes)
}

/// Source of the current process memory usage
pub trait MemoryProbe: Send + Sync + fmt::Debug {
    /// Resident memory of the current process, in bytes
    fn current_usage_bytes(&self) -> u64;
}

/// Reads the current process RSS through `sysinfo`
pub struct ProcessMemoryProbe {
    system: Mutex<System>,
    pid: Option<Pid>,
}

impl ProcessMemoryProbe {
    pub fn new() -> Self {
        Self {
            system: Mutex::new(System::new()),
            pid: sysinfo::get_current_pid().ok(),
        }
    }
}

impl Default for ProcessMemoryProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ProcessMemoryProbe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessMemoryProbe")
            .field("pid", &self.pid)
            .finish()
    }
}

impl MemoryProbe for ProcessMemoryProbe {
    fn current_usage_bytes(&self) -> u64 {
        let Some(pid) = self.pid else {
            return 0;
        };
        let mut system = self.system.lock();
        system.refresh_process(pid);
        system.process(pid).map(|process| process.memory()).unwrap_or(0)
    }
}

/// Memory probe reporting a settable value, for embedding hosts that track
/// memory themselves and for tests
#[derive(Debug, Default)]
pub struct StaticMemoryProbe {
    usage_bytes: AtomicU64,
}

impl StaticMemoryProbe {
    pub fn new(usage_bytes: u64) -> Self {
        Self {
            usage_bytes: AtomicU64::new(usage_bytes),
        }
    }

    pub fn set(&self, usage_bytes: u64) {
        self.usage_bytes.store(usage_bytes, Ordering::SeqCst);
    }
}

impl MemoryProbe for StaticMemoryProbe {
    fn current_usage_bytes(&self) -> u64 {
        self.usage_bytes.load(Ordering::SeqCst)
    }
}

/// Limits shared by every invocation, resolved once from configuration
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BudgetLimits {
    pub max_duration: Duration,
    pub memory_ceiling_bytes: u64,
    /// Fraction of the ceiling at which the budget counts as exhausted
    pub memory_threshold: f64,
}

impl BudgetLimits {
    pub fn from_config(config: &BatchConfig) -> ConfigResult<Self> {
        let memory_ceiling_bytes = resolve_memory_ceiling(config.memory_limit.as_deref())
            .map_err(|e| {
                ConfigurationError::invalid_value(
                    "batch.memory_limit",
                    config.memory_limit.clone().unwrap_or_default(),
                    e.to_string(),
                )
            })?;

        Ok(Self {
            max_duration: config.time_limit(),
            memory_ceiling_bytes,
            memory_threshold: config.memory_threshold,
        })
    }

    /// Usage at or above which the memory check trips
    pub fn memory_trip_bytes(&self) -> u64 {
        (self.memory_ceiling_bytes as f64 * self.memory_threshold) as u64
    }
}

/// Why an invocation stopped before exhausting its page
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BudgetExhaustion {
    Time { elapsed: Duration },
    Memory { used_bytes: u64, trip_bytes: u64 },
}

impl fmt::Display for BudgetExhaustion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BudgetExhaustion::Time { elapsed } => {
                write!(f, "time limit reached after {}ms", elapsed.as_millis())
            }
            BudgetExhaustion::Memory {
                used_bytes,
                trip_bytes,
            } => write!(f, "memory limit reached ({used_bytes} >= {trip_bytes} bytes)"),
        }
    }
}

/// Budget for a single invocation. Created fresh per call, never persisted.
#[derive(Debug, Clone)]
pub struct RunBudget {
    started_at: Instant,
    limits: BudgetLimits,
    probe: Arc<dyn MemoryProbe>,
}

impl RunBudget {
    /// Start the clock for a new invocation
    pub fn start(limits: BudgetLimits, probe: Arc<dyn MemoryProbe>) -> Self {
        Self {
            started_at: Instant::now(),
            limits,
            probe,
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    pub fn limits(&self) -> &BudgetLimits {
        &self.limits
    }

    pub fn time_exceeded(&self) -> bool {
        self.elapsed() >= self.limits.max_duration
    }

    pub fn memory_exceeded(&self) -> bool {
        self.probe.current_usage_bytes() >= self.limits.memory_trip_bytes()
    }

    /// Check both limits; memory is checked independently of time
    pub fn exhausted(&self) -> Option<BudgetExhaustion> {
        let elapsed = self.elapsed();
        if elapsed >= self.limits.max_duration {
            return Some(BudgetExhaustion::Time { elapsed });
        }

        let used_bytes = self.probe.current_usage_bytes();
        let trip_bytes = self.limits.memory_trip_bytes();
        if used_bytes >= trip_bytes {
            return Some(BudgetExhaustion::Memory {
                used_bytes,
                trip_bytes,
            });
        }

        None
    }
}
