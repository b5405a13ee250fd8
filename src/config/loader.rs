//! Configuration Loader
//!
//! Loads a single TOML file into [`BulkProcessConfig`]:
//!
//! 0. Loads a `.env` file if present (via dotenvy)
//! 1. Resolves the path from `BULK_PROCESS_CONFIG_PATH`, else `config/bulk-process.toml`
//! 2. Substitutes `${VAR}` and `${VAR:-default}` from an allowlist of variables
//! 3. Parses and deserializes the TOML
//! 4. Validates the result
//!
//! A missing file at the default path yields the built-in defaults; a missing
//! file at an explicitly configured path is an error.

use regex::Regex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use super::error::{ConfigResult, ConfigurationError};
use super::BulkProcessConfig;
use crate::constants::env;

/// Default configuration path, relative to the working directory
pub const DEFAULT_CONFIG_PATH: &str = "config/bulk-process.toml";

const MAX_CONFIG_FILE_SIZE: u64 = 1024 * 1024;

/// Environment variable validation rule
#[derive(Debug, Clone)]
struct EnvVarRule {
    name: &'static str,
    description: &'static str,
    pattern: &'static str,
}

/// Variables that may be substituted into the configuration file.
///
/// Anything else referenced as `${...}` is rejected, and every value must
/// match its pattern before it reaches the TOML parser.
fn env_var_allowlist() -> Vec<EnvVarRule> {
    vec![
        EnvVarRule {
            name: env::ENVIRONMENT,
            description: "Environment name (test, development, production)",
            pattern: r"^(test|development|production)$",
        },
        EnvVarRule {
            name: env::BIND_ADDRESS,
            description: "Web server bind address (host:port)",
            pattern: r"^([0-9]{1,3}\.[0-9]{1,3}\.[0-9]{1,3}\.[0-9]{1,3}|[a-zA-Z0-9._-]+):[0-9]{1,5}$",
        },
        EnvVarRule {
            name: env::API_KEY,
            description: "API key required on /v1 routes",
            pattern: r"^[A-Za-z0-9._~+/=-]{8,256}$",
        },
        EnvVarRule {
            name: env::TOKEN_SECRET,
            description: "HMAC secret for anti-forgery tokens",
            pattern: r"^[\x21-\x7E]{16,512}$",
        },
        EnvVarRule {
            name: env::SERVER_URL,
            description: "Base URL the client driver talks to",
            pattern: r"^https?://[a-zA-Z0-9._-]+(:[0-9]{1,5})?(/.*)?$",
        },
        EnvVarRule {
            name: "BULK_PROCESS_MEMORY_LIMIT",
            description: "Host memory limit in shorthand (128M, 2G, -1)",
            pattern: r"^(-1|unlimited|[0-9]+[kKmMgG]?)$",
        },
        EnvVarRule {
            name: "BULK_PROCESS_BATCH_SIZE",
            description: "Items per invocation",
            pattern: r"^[1-9][0-9]{0,5}$",
        },
    ]
}

/// Zero-state utility for loading configuration
#[derive(Debug)]
pub struct ConfigLoader;

impl ConfigLoader {
    /// Detect environment from `BULK_PROCESS_ENV` or default to "development"
    pub fn detect_environment() -> String {
        std::env::var(env::ENVIRONMENT).unwrap_or_else(|_| "development".to_string())
    }

    /// Load configuration using the path from `BULK_PROCESS_CONFIG_PATH`
    pub fn load_from_env() -> ConfigResult<BulkProcessConfig> {
        dotenvy::dotenv().ok();

        let environment = Self::detect_environment();

        match std::env::var(env::CONFIG_PATH) {
            Ok(path) => {
                info!(
                    path = %path,
                    environment = %environment,
                    "Loading configuration from {}",
                    env::CONFIG_PATH
                );
                let path = PathBuf::from(path);
                if !path.exists() {
                    return Err(ConfigurationError::config_file_not_found(path));
                }
                Self::load_from_path(&path)
            }
            Err(_) => {
                let path = PathBuf::from(DEFAULT_CONFIG_PATH);
                if path.exists() {
                    Self::load_from_path(&path)
                } else {
                    info!(
                        environment = %environment,
                        "No configuration file at {}, using defaults",
                        DEFAULT_CONFIG_PATH
                    );
                    let config = BulkProcessConfig::default();
                    config.validate()?;
                    Ok(config)
                }
            }
        }
    }

    /// Load configuration from a specific file path
    pub fn load_from_path(path: &Path) -> ConfigResult<BulkProcessConfig> {
        let contents = Self::read_config_file(path)?;
        let config = Self::load_from_str(&contents, &path.display().to_string())?;

        debug!(
            config = %serde_json::to_string(&Self::sanitize_for_logging(&config))
                .unwrap_or_else(|_| "[serialization error]".to_string()),
            "Configuration contents"
        );
        info!("Configuration loaded successfully from {}", path.display());

        Ok(config)
    }

    /// Parse configuration text; `source` names it in error messages
    pub fn load_from_str(contents: &str, source: &str) -> ConfigResult<BulkProcessConfig> {
        let contents_with_env = Self::substitute_env_vars(contents)?;

        let config: BulkProcessConfig = toml::from_str(&contents_with_env)
            .map_err(|e| ConfigurationError::invalid_toml(source, e))?;

        config.validate()?;
        Ok(config)
    }

    fn read_config_file(path: &Path) -> ConfigResult<String> {
        let metadata = std::fs::metadata(path)
            .map_err(|e| ConfigurationError::file_read_error(path.display().to_string(), e))?;

        if !metadata.is_file() {
            return Err(ConfigurationError::invalid_value(
                "file_type",
                "directory or special file",
                "configuration path must point to a regular file",
            ));
        }

        if metadata.len() > MAX_CONFIG_FILE_SIZE {
            return Err(ConfigurationError::invalid_value(
                "file_size",
                metadata.len().to_string(),
                "configuration file larger than 1MB",
            ));
        }

        std::fs::read_to_string(path)
            .map_err(|e| ConfigurationError::file_read_error(path.display().to_string(), e))
    }

    fn validate_env_var(var_name: &str, value: &str) -> ConfigResult<()> {
        let allowlist = env_var_allowlist();
        let rules: HashMap<&str, &EnvVarRule> =
            allowlist.iter().map(|rule| (rule.name, rule)).collect();

        let rule = rules.get(var_name).ok_or_else(|| {
            ConfigurationError::environment_variable_error(
                var_name,
                format!(
                    "not in the allowlist; allowed variables: {}",
                    allowlist
                        .iter()
                        .map(|r| r.name)
                        .collect::<Vec<_>>()
                        .join(", ")
                ),
            )
        })?;

        let regex = Regex::new(rule.pattern).map_err(|e| {
            ConfigurationError::environment_variable_error(var_name, format!("bad pattern: {e}"))
        })?;

        if !regex.is_match(value) {
            return Err(ConfigurationError::environment_variable_error(
                var_name,
                format!("value does not look like a {}", rule.description),
            ));
        }

        Ok(())
    }

    /// Escape TOML string metacharacters so values cannot break out of a literal
    fn escape_toml_string(value: &str) -> String {
        value
            .replace('\\', "\\\\")
            .replace('"', "\\\"")
            .replace('\n', "\\n")
            .replace('\r', "\\r")
            .replace('\t', "\\t")
    }

    /// Replace `${VAR}` and `${VAR:-default}` with environment values.
    ///
    /// A variable that is unset and has no default is an error.
    fn substitute_env_vars(content: &str) -> ConfigResult<String> {
        let mut output = String::with_capacity(content.len());
        let mut rest = content;

        while let Some(start) = rest.find("${") {
            output.push_str(&rest[..start]);
            let after = &rest[start + 2..];
            let Some(end) = after.find('}') else {
                return Err(ConfigurationError::environment_variable_error(
                    after.chars().take(32).collect::<String>(),
                    "unterminated ${...} expression",
                ));
            };

            let expression = &after[..end];
            let (var_name, default_value) = match expression.find(":-") {
                Some(sep) => (&expression[..sep], Some(&expression[sep + 2..])),
                None => (expression, None),
            };

            match std::env::var(var_name) {
                Ok(value) => {
                    Self::validate_env_var(var_name, &value)?;
                    debug!(variable = var_name, "Substituting environment variable");
                    output.push_str(&Self::escape_toml_string(&value));
                }
                Err(_) => match default_value {
                    Some(default) => {
                        debug!(variable = var_name, "Using configured default");
                        output.push_str(default);
                    }
                    None => {
                        warn!(variable = var_name, "Environment variable not set");
                        return Err(ConfigurationError::environment_variable_error(
                            var_name,
                            "not set and no default given",
                        ));
                    }
                },
            }

            rest = &after[end + 1..];
        }

        output.push_str(rest);
        Ok(output)
    }

    /// Configuration as JSON with secrets masked
    pub fn sanitize_for_logging(config: &BulkProcessConfig) -> serde_json::Value {
        let mut value = serde_json::json!(config);
        Self::sanitize_json_recursive(&mut value, &["secret", "key", "token", "password"]);
        value
    }

    fn sanitize_json_recursive(value: &mut serde_json::Value, sensitive_patterns: &[&str]) {
        match value {
            serde_json::Value::Object(map) => {
                for (key, val) in map.iter_mut() {
                    let key_lower = key.to_lowercase();
                    let is_sensitive = sensitive_patterns
                        .iter()
                        .any(|pattern| key_lower.contains(pattern))
                        && !key_lower.ends_with("_seconds");

                    if is_sensitive && val.is_string() {
                        *val = serde_json::Value::String("[MASKED]".to_string());
                    } else {
                        Self::sanitize_json_recursive(val, sensitive_patterns);
                    }
                }
            }
            serde_json::Value::Array(items) => {
                for item in items {
                    Self::sanitize_json_recursive(item, sensitive_patterns);
                }
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_empty_document_yields_defaults() {
        let config = ConfigLoader::load_from_str("", "inline").unwrap();
        assert_eq!(config.batch.batch_size, 50);
        assert_eq!(config.web.bind_address, "127.0.0.1:8080");
    }

    #[test]
    fn test_partial_sections_merge_with_defaults() {
        let config = ConfigLoader::load_from_str(
            r#"
            [batch]
            batch_size = 10
            memory_limit = "256M"

            [ledger]
            lease_ttl_seconds = 30
            "#,
            "inline",
        )
        .unwrap();

        assert_eq!(config.batch.batch_size, 10);
        assert_eq!(config.batch.time_limit_seconds, 20);
        assert_eq!(config.batch.memory_limit.as_deref(), Some("256M"));
        assert_eq!(config.ledger.lease_ttl_seconds, 30);
        assert_eq!(config.ledger.retention_seconds, 3_600);
    }

    #[test]
    fn test_invalid_toml_reports_source() {
        let err = ConfigLoader::load_from_str("[batch\nbatch_size = 1", "broken.toml").unwrap_err();
        assert!(err.to_string().contains("broken.toml"));
    }

    #[test]
    fn test_validation_runs_after_parse() {
        let err = ConfigLoader::load_from_str("[batch]\nbatch_size = 0", "inline").unwrap_err();
        assert!(matches!(err, ConfigurationError::InvalidValue { .. }));
    }

    #[test]
    #[serial]
    fn test_default_value_used_when_variable_unset() {
        std::env::remove_var("BULK_PROCESS_BATCH_SIZE");
        let config = ConfigLoader::load_from_str(
            "[batch]\nbatch_size = ${BULK_PROCESS_BATCH_SIZE:-25}",
            "inline",
        )
        .unwrap();
        assert_eq!(config.batch.batch_size, 25);
    }

    #[test]
    #[serial]
    fn test_allowlisted_variable_substituted() {
        std::env::set_var(env::BIND_ADDRESS, "0.0.0.0:9090");
        let config = ConfigLoader::load_from_str(
            "[web]\nbind_address = \"${BULK_PROCESS_BIND_ADDRESS}\"",
            "inline",
        )
        .unwrap();
        std::env::remove_var(env::BIND_ADDRESS);
        assert_eq!(config.web.bind_address, "0.0.0.0:9090");
    }

    #[test]
    #[serial]
    fn test_invalid_variable_value_rejected() {
        std::env::set_var(env::BIND_ADDRESS, "not an address\"\n[evil]");
        let result = ConfigLoader::load_from_str(
            "[web]\nbind_address = \"${BULK_PROCESS_BIND_ADDRESS}\"",
            "inline",
        );
        std::env::remove_var(env::BIND_ADDRESS);
        assert!(matches!(
            result,
            Err(ConfigurationError::EnvironmentVariableError { .. })
        ));
    }

    #[test]
    #[serial]
    fn test_unlisted_variable_rejected() {
        std::env::set_var("HOME_GROWN_SECRET", "value");
        let result = ConfigLoader::load_from_str("[web]\napi_key = \"${HOME_GROWN_SECRET}\"", "inline");
        std::env::remove_var("HOME_GROWN_SECRET");
        assert!(result.is_err());
    }

    #[test]
    fn test_unset_variable_without_default_is_error() {
        let result = ConfigLoader::load_from_str(
            "[web]\napi_key = \"${BULK_PROCESS_DEFINITELY_UNSET_VARIABLE}\"",
            "inline",
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[driver]\nmax_retries = 7\nbase_url = \"http://localhost:9999\"").unwrap();

        let config = ConfigLoader::load_from_path(file.path()).unwrap();
        assert_eq!(config.driver.max_retries, 7);
        assert_eq!(config.driver.base_url, "http://localhost:9999");
    }

    #[test]
    #[serial]
    fn test_explicit_missing_path_is_error() {
        std::env::set_var(env::CONFIG_PATH, "/nonexistent/bulk-process.toml");
        let result = ConfigLoader::load_from_env();
        std::env::remove_var(env::CONFIG_PATH);
        assert!(matches!(
            result,
            Err(ConfigurationError::ConfigFileNotFound { .. })
        ));
    }

    #[test]
    fn test_secrets_masked_for_logging() {
        let mut config = BulkProcessConfig::default();
        config.security.token_secret = Some("super-secret-value-123".to_string());
        config.web.api_key = Some("api-key-value".to_string());

        let sanitized = ConfigLoader::sanitize_for_logging(&config);
        assert_eq!(sanitized["security"]["token_secret"], "[MASKED]");
        assert_eq!(sanitized["web"]["api_key"], "[MASKED]");
        assert_eq!(sanitized["security"]["token_ttl_seconds"], 86_400);
        assert_eq!(sanitized["batch"]["batch_size"], 50);
    }
}
