//! # Anti-forgery Tokens
//!
//! Short-lived HMAC-SHA256 tokens bound to a scope such as
//! `bulk-process-security:<run_id>`. Time is divided into ticks of half the
//! TTL; a token is accepted during the tick it was issued in and the next one.

use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::Sha256;
use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::{ConfigResult, ConfigurationError, SecurityConfig};
use crate::constants::token_scopes;

type HmacSha256 = Hmac<Sha256>;

/// Hex characters kept from the full MAC
pub const TOKEN_LENGTH: usize = 20;
const GENERATED_SECRET_BYTES: usize = 32;

pub fn security_scope(run_id: Uuid) -> String {
    format!("{}:{}", token_scopes::SECURITY, run_id)
}

pub fn complete_scope(run_id: Uuid) -> String {
    format!("{}:{}", token_scopes::COMPLETE, run_id)
}

#[derive(Clone)]
pub struct TokenIssuer {
    mac: HmacSha256,
    tick_seconds: u64,
}

impl fmt::Debug for TokenIssuer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenIssuer")
            .field("secret", &"[MASKED]")
            .field("tick_seconds", &self.tick_seconds)
            .finish()
    }
}

impl TokenIssuer {
    pub fn new(secret: &[u8], ttl: Duration) -> ConfigResult<Self> {
        if secret.is_empty() {
            return Err(ConfigurationError::missing_required_field(
                "token_secret",
                "security",
            ));
        }
        let mac = <HmacSha256 as Mac>::new_from_slice(secret).map_err(|e| {
            ConfigurationError::invalid_value("security.token_secret", "[MASKED]", e.to_string())
        })?;

        Ok(Self {
            mac,
            tick_seconds: (ttl.as_secs() / 2).max(1),
        })
    }

    /// Use the configured secret, or a random one that lives as long as the process
    pub fn from_config(config: &SecurityConfig) -> ConfigResult<Self> {
        match config.token_secret.as_deref() {
            Some(secret) => Self::new(secret.as_bytes(), config.token_ttl()),
            None => {
                warn!("No security.token_secret configured; tokens will not survive a restart");
                let mut secret = [0u8; GENERATED_SECRET_BYTES];
                rand::thread_rng().fill_bytes(&mut secret);
                Self::new(&secret, config.token_ttl())
            }
        }
    }

    /// Token for `scope` valid from now
    pub fn issue(&self, scope: &str) -> String {
        self.issue_at(scope, unix_now())
    }

    pub fn verify(&self, scope: &str, token: &str) -> bool {
        self.verify_at(scope, token, unix_now())
    }

    pub fn issue_at(&self, scope: &str, unix_seconds: u64) -> String {
        let tag = self
            .keyed(scope, self.tick(unix_seconds))
            .finalize()
            .into_bytes();
        let mut token = hex::encode(tag);
        token.truncate(TOKEN_LENGTH);
        token
    }

    /// Constant-time check against the current and previous tick
    pub fn verify_at(&self, scope: &str, token: &str, unix_seconds: u64) -> bool {
        if token.len() != TOKEN_LENGTH {
            return false;
        }
        let Ok(provided) = hex::decode(token) else {
            return false;
        };

        let tick = self.tick(unix_seconds);
        let valid = [Some(tick), tick.checked_sub(1)]
            .into_iter()
            .flatten()
            .any(|candidate| {
                self.keyed(scope, candidate)
                    .verify_truncated_left(&provided)
                    .is_ok()
            });

        if !valid {
            debug!(scope = %scope, "Token verification failed");
        }
        valid
    }

    fn tick(&self, unix_seconds: u64) -> u64 {
        unix_seconds / self.tick_seconds
    }

    fn keyed(&self, scope: &str, tick: u64) -> HmacSha256 {
        let mut mac = self.mac.clone();
        mac.update(scope.as_bytes());
        mac.update(b"|");
        mac.update(tick.to_string().as_bytes());
        mac
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
