//! Engine configuration.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};

/// Configuration for the rule scheduler, dispatcher and recovery engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Maximum number of concurrent rule submissions during a bulk restart.
    pub max_concurrent_submits: usize,
    /// Recovery wait time used when a fault center has none configured.
    pub default_recover_wait_secs: u64,
    /// Timeout for a single datasource query.
    pub query_timeout_secs: u64,
    /// Delay before restarting a loop after its first panic.
    pub restart_backoff_base_ms: u64,
    /// Upper bound of the restart delay.
    pub restart_backoff_max_ms: u64,
    /// A panic older than this no longer counts towards the backoff.
    pub restart_backoff_reset_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_concurrent_submits: 10,
            default_recover_wait_secs: 1,
            query_timeout_secs: 30,
            restart_backoff_base_ms: 500,
            restart_backoff_max_ms: 60_000,
            restart_backoff_reset_secs: 300,
        }
    }
}

impl EngineConfig {
    /// Load configuration from a JSON file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| EngineError::Config {
            reason: format!(
                "failed to read config file '{}': {e}",
                path.as_ref().display()
            ),
        })?;

        Self::from_json(&content)
    }

    /// Parse configuration from a JSON string. Missing fields take their
    /// default values.
    ///
    /// # Errors
    ///
    /// Returns an error if the JSON is invalid or fails validation.
    pub fn from_json(content: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(content).map_err(|e| EngineError::Config {
            reason: format!("invalid JSON: {e}"),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if any configuration values are invalid.
    pub fn validate(&self) -> Result<()> {
        if self.max_concurrent_submits == 0 {
            return Err(EngineError::Config {
                reason: "max_concurrent_submits must be at least 1".to_string(),
            });
        }
        if self.query_timeout_secs == 0 {
            return Err(EngineError::Config {
                reason: "query_timeout_secs must be positive".to_string(),
            });
        }
        if self.restart_backoff_base_ms > self.restart_backoff_max_ms {
            return Err(EngineError::Config {
                reason: "restart_backoff_base_ms cannot exceed restart_backoff_max_ms".to_string(),
            });
        }
        Ok(())
    }

    /// Returns the query timeout.
    #[must_use]
    pub const fn query_timeout(&self) -> Duration {
        Duration::from_secs(self.query_timeout_secs)
    }

    /// Returns the recovery wait time to use when a fault center's own
    /// setting is zero.
    #[must_use]
    pub const fn recover_wait_or_default(&self, configured_secs: u64) -> Duration {
        if configured_secs == 0 {
            Duration::from_secs(self.default_recover_wait_secs)
        } else {
            Duration::from_secs(configured_secs)
        }
    }

    /// Returns the restart delay after `consecutive_failures` panics
    /// (`base * 2^(n-1)`, capped at the maximum).
    #[must_use]
    pub fn restart_backoff(&self, consecutive_failures: u32) -> Duration {
        let exponent = consecutive_failures.saturating_sub(1).min(20);
        let delay = self
            .restart_backoff_base_ms
            .saturating_mul(1u64 << exponent)
            .min(self.restart_backoff_max_ms);
        Duration::from_millis(delay)
    }

    /// Returns the window after which the failure counter resets.
    #[must_use]
    pub const fn restart_backoff_reset(&self) -> Duration {
        Duration::from_secs(self.restart_backoff_reset_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;
    use test_case::test_case;

    #[test]
    fn default_config() {
        let config = EngineConfig::default();
        assert_eq!(config.max_concurrent_submits, 10);
        assert_eq!(config.default_recover_wait_secs, 1);
        assert_eq!(config.query_timeout(), Duration::from_secs(30));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn partial_json_uses_defaults() {
        let config = EngineConfig::from_json(r#"{"query_timeout_secs": 10}"#).unwrap();
        assert_eq!(config.query_timeout_secs, 10);
        assert_eq!(config.max_concurrent_submits, 10);
    }

    #[test]
    fn invalid_json_is_config_error() {
        assert!(matches!(
            EngineConfig::from_json("{not json"),
            Err(EngineError::Config { .. })
        ));
    }

    #[test]
    fn zero_workers_rejected() {
        assert!(EngineConfig::from_json(r#"{"max_concurrent_submits": 0}"#).is_err());
    }

    #[test]
    fn load_from_file() {
        let mut file = NamedTempFile::new().expect("failed to create temp file");
        file.write_all(br#"{"default_recover_wait_secs": 60}"#)
            .expect("failed to write temp file");

        let config = EngineConfig::from_file(file.path()).unwrap();
        assert_eq!(config.default_recover_wait_secs, 60);
    }

    #[test]
    fn missing_file_is_config_error() {
        assert!(matches!(
            EngineConfig::from_file("/nonexistent/engine.json"),
            Err(EngineError::Config { .. })
        ));
    }

    #[test]
    fn recover_wait_falls_back_to_default() {
        let config = EngineConfig::default();
        assert_eq!(config.recover_wait_or_default(0), Duration::from_secs(1));
        assert_eq!(config.recover_wait_or_default(60), Duration::from_secs(60));
    }

    #[test_case(1, 500 ; "first failure")]
    #[test_case(2, 1_000 ; "second failure")]
    #[test_case(4, 4_000 ; "fourth failure")]
    #[test_case(30, 60_000 ; "capped")]
    fn restart_backoff(failures: u32, expected_ms: u64) {
        let config = EngineConfig::default();
        assert_eq!(config.restart_backoff(failures), Duration::from_millis(expected_ms));
    }
}
