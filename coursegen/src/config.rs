//! Engine configuration.
//!
//! Loaded from JSON (text or file) with defaults for every field, then
//! overridden by environment variables:
//!
//! - `COURSEGEN_CONCURRENCY_LIMIT`: stage attempts in flight across all runs
//! - `COURSEGEN_STAGE_TIMEOUT_MS`: default per-attempt timeout
//! - `COURSEGEN_LOG_JSON`: `true`/`1` for JSON log lines

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::errors::CoursegenError;
use crate::pipeline::{ConcurrencyLimiter, RetryPolicy, DEFAULT_CONCURRENCY_LIMIT};

/// Environment variable overriding [`EngineConfig::concurrency_limit`].
pub const ENV_CONCURRENCY_LIMIT: &str = "COURSEGEN_CONCURRENCY_LIMIT";
/// Environment variable overriding [`EngineConfig::stage_timeout_ms`].
pub const ENV_STAGE_TIMEOUT_MS: &str = "COURSEGEN_STAGE_TIMEOUT_MS";
/// Environment variable overriding [`LogConfig::json`].
pub const ENV_LOG_JSON: &str = "COURSEGEN_LOG_JSON";

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogConfig {
    /// Default filter directive when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Emit JSON lines instead of human readable text.
    #[serde(default)]
    pub json: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

/// Configuration for the pipeline engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Stage attempts in flight at once, across all runs.
    #[serde(default = "default_concurrency_limit")]
    pub concurrency_limit: usize,
    /// Retry policy for stages that do not set their own.
    #[serde(default)]
    pub stage_retry: RetryPolicy,
    /// Per-attempt timeout for stages that do not set their own.
    #[serde(default = "default_stage_timeout_ms")]
    pub stage_timeout_ms: u64,
    /// Retry policy for store writes.
    #[serde(default = "default_persistence_retry")]
    pub persistence_retry: RetryPolicy,
    /// Logging.
    #[serde(default)]
    pub logging: LogConfig,
}

fn default_concurrency_limit() -> usize {
    DEFAULT_CONCURRENCY_LIMIT
}

fn default_stage_timeout_ms() -> u64 {
    120_000
}

fn default_persistence_retry() -> RetryPolicy {
    RetryPolicy::new()
        .with_max_attempts(5)
        .with_base_delay_ms(100)
        .with_max_delay_ms(5_000)
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            concurrency_limit: default_concurrency_limit(),
            stage_retry: RetryPolicy::default(),
            stage_timeout_ms: default_stage_timeout_ms(),
            persistence_retry: default_persistence_retry(),
            logging: LogConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Parses a JSON document. Missing fields take their defaults.
    ///
    /// # Errors
    ///
    /// Returns an error for malformed JSON or invalid values.
    pub fn from_json_str(text: &str) -> Result<Self, CoursegenError> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads and parses a JSON file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, CoursegenError> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&text)
    }

    /// Defaults plus overrides from the process environment.
    ///
    /// # Errors
    ///
    /// Returns an error if an override does not parse.
    pub fn from_env() -> Result<Self, CoursegenError> {
        Self::default().apply_env_overrides(std::env::vars())
    }

    /// Applies `COURSEGEN_*` overrides from `vars`; other variables are ignored.
    ///
    /// # Errors
    ///
    /// Returns [`CoursegenError::Config`] for unparsable or invalid values.
    pub fn apply_env_overrides<I, K, V>(mut self, vars: I) -> Result<Self, CoursegenError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        for (key, value) in vars {
            let value = value.as_ref().trim();
            match key.as_ref() {
                ENV_CONCURRENCY_LIMIT => {
                    self.concurrency_limit = parse_env(ENV_CONCURRENCY_LIMIT, value)?;
                }
                ENV_STAGE_TIMEOUT_MS => {
                    self.stage_timeout_ms = parse_env(ENV_STAGE_TIMEOUT_MS, value)?;
                }
                ENV_LOG_JSON => {
                    self.logging.json = matches!(value.to_ascii_lowercase().as_str(), "1" | "true" | "yes");
                }
                _ => {}
            }
        }
        self.validate()?;
        Ok(self)
    }

    /// Checks value ranges.
    ///
    /// # Errors
    ///
    /// Returns [`CoursegenError::Config`] for a zero concurrency limit,
    /// zero timeout or zero attempt budget.
    pub fn validate(&self) -> Result<(), CoursegenError> {
        if self.concurrency_limit == 0 {
            return Err(CoursegenError::Config(
                "concurrency_limit must be at least 1".to_string(),
            ));
        }
        if self.stage_timeout_ms == 0 {
            return Err(CoursegenError::Config(
                "stage_timeout_ms must be positive".to_string(),
            ));
        }
        if self.stage_retry.max_attempts == 0 || self.persistence_retry.max_attempts == 0 {
            return Err(CoursegenError::Config(
                "retry policies need max_attempts of at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Default per-attempt stage timeout.
    #[must_use]
    pub fn stage_timeout(&self) -> Duration {
        Duration::from_millis(self.stage_timeout_ms)
    }

    /// A fresh limiter sized by [`EngineConfig::concurrency_limit`].
    #[must_use]
    pub fn limiter(&self) -> ConcurrencyLimiter {
        ConcurrencyLimiter::new(self.concurrency_limit)
    }
}

fn parse_env<T: std::str::FromStr>(name: &str, value: &str) -> Result<T, CoursegenError> {
    value
        .parse()
        .map_err(|_| CoursegenError::Config(format!("{name}: cannot parse '{value}'")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.concurrency_limit, 4);
        assert_eq!(config.stage_timeout(), Duration::from_secs(120));
        assert_eq!(config.persistence_retry.max_attempts, 5);
        assert_eq!(config.logging.level, "info");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json_fills_defaults() {
        let config = EngineConfig::from_json_str(
            r#"{"concurrency_limit": 8, "stage_retry": {"max_attempts": 2}, "logging": {"json": true}}"#,
        )
        .unwrap();
        assert_eq!(config.concurrency_limit, 8);
        assert_eq!(config.stage_retry.max_attempts, 2);
        assert_eq!(config.stage_retry.base_delay_ms, 1000);
        assert_eq!(config.stage_timeout_ms, 120_000);
        assert!(config.logging.json);
        assert_eq!(config.limiter().limit(), 8);
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(matches!(
            EngineConfig::from_json_str(r#"{"concurrency_limit": 0}"#),
            Err(CoursegenError::Config(_))
        ));
        assert!(matches!(
            EngineConfig::from_json_str("{not json"),
            Err(CoursegenError::Serialization(_))
        ));
    }

    #[test]
    fn test_env_overrides() {
        let config = EngineConfig::default()
            .apply_env_overrides([
                (ENV_CONCURRENCY_LIMIT, "2"),
                (ENV_STAGE_TIMEOUT_MS, "500"),
                (ENV_LOG_JSON, "TRUE"),
                ("PATH", "/usr/bin"),
            ])
            .unwrap();
        assert_eq!(config.concurrency_limit, 2);
        assert_eq!(config.stage_timeout(), Duration::from_millis(500));
        assert!(config.logging.json);

        let err = EngineConfig::default()
            .apply_env_overrides([(ENV_CONCURRENCY_LIMIT, "many")])
            .unwrap_err();
        assert!(err.to_string().contains(ENV_CONCURRENCY_LIMIT));
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("engine.json");
        std::fs::write(&path, r#"{"stage_timeout_ms": 30000}"#).unwrap();

        let config = EngineConfig::from_file(&path).unwrap();
        assert_eq!(config.stage_timeout(), Duration::from_secs(30));
    }
}
