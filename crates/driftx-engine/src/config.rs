//! Engine configuration loaded from TOML.
//!
//! Every field has a default, so an empty document is a valid configuration:
//!
//! ```toml
//! actor = "deployer"
//!
//! [reconcile]
//! stall_threshold = 4
//!
//! [transaction]
//! begin_max_attempts = 10
//! commit_queue_max_attempts = 30
//! backoff_base_ms = 50
//! backoff_max_ms = 2000
//!
//! [logging]
//! profile = "production"
//! ```

use driftx_core::errors::{DriftError, Result};
use driftx_core::logging_facility::{self, Profile};
use driftx_core::reconcile::DEFAULT_STALL_THRESHOLD;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct EngineConfig {
    /// Actor stamped on audit entries when a request carries none
    #[serde(default = "default_actor")]
    pub actor: String,

    #[serde(default)]
    pub reconcile: ReconcileConfig,

    #[serde(default)]
    pub transaction: TransactionConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ReconcileConfig {
    /// Inner iterations with identical diff counts before a pass gives up
    #[serde(default = "default_stall_threshold")]
    pub stall_threshold: usize,
}

/// Polling bounds for `begin` and for queued (forced) commits
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TransactionConfig {
    #[serde(default = "default_begin_max_attempts")]
    pub begin_max_attempts: u32,

    #[serde(default = "default_commit_queue_max_attempts")]
    pub commit_queue_max_attempts: u32,

    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,

    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct LoggingConfig {
    #[serde(default)]
    pub profile: Profile,
}

fn default_actor() -> String {
    "driftx".to_string()
}

fn default_stall_threshold() -> usize {
    DEFAULT_STALL_THRESHOLD
}

fn default_begin_max_attempts() -> u32 {
    10
}

fn default_commit_queue_max_attempts() -> u32 {
    30
}

fn default_backoff_base_ms() -> u64 {
    50
}

fn default_backoff_max_ms() -> u64 {
    2000
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            actor: default_actor(),
            reconcile: ReconcileConfig::default(),
            transaction: TransactionConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            stall_threshold: default_stall_threshold(),
        }
    }
}

impl Default for TransactionConfig {
    fn default() -> Self {
        Self {
            begin_max_attempts: default_begin_max_attempts(),
            commit_queue_max_attempts: default_commit_queue_max_attempts(),
            backoff_base_ms: default_backoff_base_ms(),
            backoff_max_ms: default_backoff_max_ms(),
        }
    }
}

impl EngineConfig {
    /// Parse a TOML document
    ///
    /// # Errors
    ///
    /// `Config` when the document is not valid TOML or a field has the wrong type.
    pub fn from_toml_str(source: &str) -> Result<Self> {
        toml::from_str(source).map_err(|e| DriftError::Config {
            message: e.to_string(),
        })
    }

    /// Read and parse a TOML file
    ///
    /// # Errors
    ///
    /// `Config` when the file cannot be read or parsed.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).map_err(|e| DriftError::Config {
            message: format!("{}: {}", path.display(), e),
        })?;
        Self::from_toml_str(&source)
    }

    /// Install the configured logging profile (first call wins)
    pub fn init_logging(&self) {
        logging_facility::init(self.logging.profile);
    }

    #[must_use]
    pub fn with_actor(mut self, actor: impl Into<String>) -> Self {
        self.actor = actor.into();
        self
    }
}

impl TransactionConfig {
    /// Delay before poll attempt `attempt` (0-based): doubling from the base,
    /// capped at the maximum
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u64.checked_shl(attempt.min(32)).unwrap_or(u64::MAX);
        let delay = self.backoff_base_ms.saturating_mul(factor);
        Duration::from_millis(delay.min(self.backoff_max_ms))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_document_uses_defaults() {
        let config = EngineConfig::from_toml_str("").unwrap();
        assert_eq!(config, EngineConfig::default());
        assert_eq!(config.actor, "driftx");
        assert_eq!(config.reconcile.stall_threshold, 4);
        assert_eq!(config.transaction.begin_max_attempts, 10);
        assert_eq!(config.logging.profile, Profile::Development);
    }

    #[test]
    fn test_partial_sections_keep_other_defaults() {
        let config = EngineConfig::from_toml_str(
            r#"
actor = "deployer"

[transaction]
backoff_base_ms = 5

[logging]
profile = "production"
"#,
        )
        .unwrap();
        assert_eq!(config.actor, "deployer");
        assert_eq!(config.transaction.backoff_base_ms, 5);
        assert_eq!(config.transaction.backoff_max_ms, 2000);
        assert_eq!(config.logging.profile, Profile::Production);
    }

    #[test]
    fn test_invalid_toml_is_config_error() {
        let err = EngineConfig::from_toml_str("actor = [").unwrap_err();
        assert!(matches!(err, DriftError::Config { .. }));

        let err = EngineConfig::from_toml_str("[reconcile]\nstall_threshold = \"four\"").unwrap_err();
        assert!(matches!(err, DriftError::Config { .. }));
    }

    #[test]
    fn test_backoff_doubles_until_capped() {
        let config = TransactionConfig::default();
        assert_eq!(config.backoff(0), Duration::from_millis(50));
        assert_eq!(config.backoff(1), Duration::from_millis(100));
        assert_eq!(config.backoff(3), Duration::from_millis(400));
        assert_eq!(config.backoff(10), Duration::from_millis(2000));
        assert_eq!(config.backoff(64), Duration::from_millis(2000));
    }

    #[test]
    fn test_load_missing_file() {
        let err = EngineConfig::load("/nonexistent/driftx.toml").unwrap_err();
        assert!(matches!(err, DriftError::Config { .. }));
    }
}
