//! # Bulk Process Configuration
//!
//! Typed configuration for the server, the batch controller and the client
//! driver. Every section has defaults, so an empty or missing file yields a
//! working configuration; values are validated after loading.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use bulk_process::config::ConfigLoader;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ConfigLoader::load_from_env()?;
//!
//! let batch_size = config.batch.batch_size;
//! let time_limit = config.batch.time_limit();
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod loader;

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::budget::MemoryLimit;
use crate::constants::{
    DEFAULT_BATCH_SIZE, DEFAULT_MEMORY_THRESHOLD, DEFAULT_TIME_LIMIT_SECONDS,
    REQUEST_TIMEOUT_HEADROOM_MS,
};

pub use error::{ConfigResult, ConfigurationError};
pub use loader::ConfigLoader;

/// Root configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct BulkProcessConfig {
    pub batch: BatchConfig,
    pub web: WebConfig,
    pub security: SecurityConfig,
    pub ledger: LedgerConfig,
    pub driver: DriverConfig,
}

/// Per-invocation limits for the progress controller
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BatchConfig {
    /// Items fetched per invocation unless the operation overrides it
    pub batch_size: u32,
    /// Wall-clock budget per invocation
    pub time_limit_seconds: u64,
    /// Host memory limit in shorthand (`128M`, `2G`, `-1`); detected when absent
    pub memory_limit: Option<String>,
    /// Fraction of the memory ceiling that stops an invocation
    pub memory_threshold: f64,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            time_limit_seconds: DEFAULT_TIME_LIMIT_SECONDS,
            memory_limit: None,
            memory_threshold: DEFAULT_MEMORY_THRESHOLD,
        }
    }
}

impl BatchConfig {
    pub fn time_limit(&self) -> Duration {
        Duration::from_secs(self.time_limit_seconds)
    }
}

/// HTTP server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct WebConfig {
    /// Address to bind the web server to
    pub bind_address: String,
    /// Request timeout in milliseconds
    pub request_timeout_ms: u64,
    /// When set, `/v1` routes require this value in the `X-API-Key` header
    pub api_key: Option<String>,
    /// Allow cross-origin requests from any origin
    pub cors_enabled: bool,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1:8080".to_string(),
            request_timeout_ms: 30_000,
            api_key: None,
            cors_enabled: true,
        }
    }
}

impl WebConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

/// Anti-forgery token configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SecurityConfig {
    /// HMAC secret; a random secret is generated at startup when absent
    pub token_secret: Option<String>,
    /// Token lifetime. A token stays valid for between half and all of it.
    pub token_ttl_seconds: u64,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            token_secret: None,
            token_ttl_seconds: 86_400,
        }
    }
}

impl SecurityConfig {
    pub fn token_ttl(&self) -> Duration {
        Duration::from_secs(self.token_ttl_seconds)
    }
}

/// Run ledger configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LedgerConfig {
    /// Inactivity after which a running run loses its lease
    pub lease_ttl_seconds: u64,
    /// How long finished runs stay queryable
    pub retention_seconds: u64,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            lease_ttl_seconds: 300,
            retention_seconds: 3_600,
        }
    }
}

impl LedgerConfig {
    pub fn lease_ttl(&self) -> Duration {
        Duration::from_secs(self.lease_ttl_seconds)
    }

    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_seconds)
    }
}

/// Client driver configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DriverConfig {
    /// Base URL of the bulk-process server
    pub base_url: String,
    /// Per-request timeout in milliseconds
    pub timeout_ms: u64,
    /// Upper bound on batch requests in one run
    pub max_iterations: u64,
    /// Retries per request for recoverable failures
    pub max_retries: u32,
    pub initial_backoff_ms: u64,
    pub backoff_multiplier: f64,
    pub max_backoff_ms: u64,
    /// Sent as `X-API-Key` when set
    pub api_key: Option<String>,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8080".to_string(),
            timeout_ms: 60_000,
            max_iterations: 100_000,
            max_retries: 3,
            initial_backoff_ms: 500,
            backoff_multiplier: 2.0,
            max_backoff_ms: 10_000,
            api_key: None,
        }
    }
}

impl DriverConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Delay before retry `attempt` (1-based), capped at `max_backoff_ms`
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        let millis = self.initial_backoff_ms as f64 * self.backoff_multiplier.powi(exponent);
        Duration::from_millis(millis.min(self.max_backoff_ms as f64) as u64)
    }
}

impl BulkProcessConfig {
    /// Validate configuration values that deserialization cannot check
    pub fn validate(&self) -> ConfigResult<()> {
        if self.batch.batch_size == 0 {
            return Err(ConfigurationError::invalid_value(
                "batch.batch_size",
                "0",
                "batch size must be greater than 0",
            ));
        }

        if self.batch.time_limit_seconds == 0 {
            return Err(ConfigurationError::invalid_value(
                "batch.time_limit_seconds",
                "0",
                "time limit must be greater than 0",
            ));
        }

        if !(self.batch.memory_threshold > 0.0 && self.batch.memory_threshold <= 1.0) {
            return Err(ConfigurationError::invalid_value(
                "batch.memory_threshold",
                self.batch.memory_threshold.to_string(),
                "threshold must be in (0, 1]",
            ));
        }

        if let Some(limit) = &self.batch.memory_limit {
            limit.parse::<MemoryLimit>().map_err(|e| {
                ConfigurationError::invalid_value("batch.memory_limit", limit.clone(), e.to_string())
            })?;
        }

        if self.web.bind_address.trim().is_empty() {
            return Err(ConfigurationError::missing_required_field(
                "web.bind_address",
                "web configuration",
            ));
        }

        let min_request_timeout_ms = self
            .batch
            .time_limit_seconds
            .saturating_mul(1_000)
            .saturating_add(REQUEST_TIMEOUT_HEADROOM_MS);
        if self.web.request_timeout_ms < min_request_timeout_ms {
            return Err(ConfigurationError::invalid_value(
                "web.request_timeout_ms",
                self.web.request_timeout_ms.to_string(),
                format!(
                    "request timeout must be at least {min_request_timeout_ms}ms \
                     (batch.time_limit_seconds plus {REQUEST_TIMEOUT_HEADROOM_MS}ms)"
                ),
            ));
        }

        if self.security.token_ttl_seconds < 2 {
            return Err(ConfigurationError::invalid_value(
                "security.token_ttl_seconds",
                self.security.token_ttl_seconds.to_string(),
                "token ttl must be at least 2 seconds",
            ));
        }

        if matches!(&self.security.token_secret, Some(secret) if secret.len() < 16) {
            return Err(ConfigurationError::invalid_value(
                "security.token_secret",
                "[MASKED]",
                "token secret must be at least 16 characters",
            ));
        }

        if self.ledger.lease_ttl_seconds == 0 {
            return Err(ConfigurationError::invalid_value(
                "ledger.lease_ttl_seconds",
                "0",
                "lease ttl must be greater than 0",
            ));
        }

        if self.driver.max_iterations == 0 {
            return Err(ConfigurationError::invalid_value(
                "driver.max_iterations",
                "0",
                "iteration cap must be greater than 0",
            ));
        }

        if self.driver.backoff_multiplier < 1.0 {
            return Err(ConfigurationError::invalid_value(
                "driver.backoff_multiplier",
                self.driver.backoff_multiplier.to_string(),
                "multiplier must be at least 1.0",
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = BulkProcessConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.batch.batch_size, 50);
        assert_eq!(config.batch.time_limit(), Duration::from_secs(20));
        assert_eq!(config.batch.memory_threshold, 0.9);
    }

    #[test]
    fn test_zero_batch_size_rejected() {
        let mut config = BulkProcessConfig::default();
        config.batch.batch_size = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigurationError::InvalidValue { field, .. }) if field == "batch.batch_size"
        ));
    }

    #[test]
    fn test_bad_memory_limit_rejected() {
        let mut config = BulkProcessConfig::default();
        config.batch.memory_limit = Some("a lot".to_string());
        assert!(config.validate().is_err());

        config.batch.memory_limit = Some("-1".to_string());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_request_timeout_must_outlast_time_limit() {
        let mut config = BulkProcessConfig::default();
        config.batch.time_limit_seconds = 60;
        assert!(matches!(
            config.validate(),
            Err(ConfigurationError::InvalidValue { field, .. }) if field == "web.request_timeout_ms"
        ));

        config.web.request_timeout_ms = 65_000;
        assert!(config.validate().is_ok());

        config.batch.time_limit_seconds = 20;
        config.web.request_timeout_ms = 24_999;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_short_secret_rejected() {
        let mut config = BulkProcessConfig::default();
        config.security.token_secret = Some("short".to_string());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_backoff_delay_grows_and_caps() {
        let driver = DriverConfig {
            initial_backoff_ms: 100,
            backoff_multiplier: 2.0,
            max_backoff_ms: 500,
            ..DriverConfig::default()
        };

        assert_eq!(driver.backoff_delay(1), Duration::from_millis(100));
        assert_eq!(driver.backoff_delay(2), Duration::from_millis(200));
        assert_eq!(driver.backoff_delay(3), Duration::from_millis(400));
        assert_eq!(driver.backoff_delay(4), Duration::from_millis(500));
        assert_eq!(driver.backoff_delay(10), Duration::from_millis(500));
    }
}
