//! Engine and adapter configuration.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::core::Environment;
use crate::errors::PromotionError;
use crate::retry::{BackoffStrategy, RetryConfig};

/// Configuration for the promotion engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Retry policy for CAS conflicts while applying approvals.
    #[serde(default = "default_cas_retry")]
    pub cas_retry: RetryConfig,
    /// Retry policy for opening change proposals.
    #[serde(default = "default_emit_retry")]
    pub emit_retry: RetryConfig,
    /// Bound on each store or emitter call, in milliseconds.
    #[serde(default = "default_io_timeout_ms")]
    pub io_timeout_ms: u64,
    /// Whether a successful apply immediately evaluates the next hop.
    #[serde(default = "default_cascade")]
    pub cascade_on_apply: bool,
}

fn default_cas_retry() -> RetryConfig {
    RetryConfig::new()
        .with_max_attempts(5)
        .with_base_delay_ms(50)
        .with_max_delay_ms(2_000)
}

fn default_emit_retry() -> RetryConfig {
    RetryConfig::new()
        .with_max_attempts(4)
        .with_base_delay_ms(500)
        .with_max_delay_ms(30_000)
        .with_backoff(BackoffStrategy::Exponential)
}

const fn default_io_timeout_ms() -> u64 {
    10_000
}

const fn default_cascade() -> bool {
    true
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            cas_retry: default_cas_retry(),
            emit_retry: default_emit_retry(),
            io_timeout_ms: default_io_timeout_ms(),
            cascade_on_apply: default_cascade(),
        }
    }
}

impl EngineConfig {
    /// Creates a new configuration with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the CAS retry policy.
    #[must_use]
    pub fn with_cas_retry(mut self, retry: RetryConfig) -> Self {
        self.cas_retry = retry;
        self
    }

    /// Sets the emit retry policy.
    #[must_use]
    pub fn with_emit_retry(mut self, retry: RetryConfig) -> Self {
        self.emit_retry = retry;
        self
    }

    /// Sets the I/O timeout.
    #[must_use]
    pub const fn with_io_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.io_timeout_ms = timeout_ms;
        self
    }

    /// Enables or disables evaluating the next hop after an apply.
    #[must_use]
    pub const fn with_cascade_on_apply(mut self, cascade: bool) -> Self {
        self.cascade_on_apply = cascade;
        self
    }

    /// Gets the I/O timeout as a Duration.
    #[must_use]
    pub const fn io_timeout(&self) -> Duration {
        Duration::from_millis(self.io_timeout_ms)
    }

    /// Parses a JSON configuration document.
    pub fn from_json_str(json: &str) -> Result<Self, PromotionError> {
        serde_json::from_str(json).map_err(|e| PromotionError::Config(e.to_string()))
    }

    /// Loads a JSON configuration file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, PromotionError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| PromotionError::Config(format!("{}: {e}", path.display())))?;
        Self::from_json_str(&raw)
    }
}

/// Layout of the per-environment Helm values files.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValuesFileConfig {
    /// Directory holding the values files.
    pub root: PathBuf,
    /// File name pattern; `{env}` is replaced by the environment name.
    #[serde(default = "default_file_pattern")]
    pub file_pattern: String,
    /// Directory under `root` holding revision sidecars.
    #[serde(default = "default_state_dir")]
    pub state_dir: String,
}

fn default_file_pattern() -> String {
    "values-{env}.yaml".to_string()
}

fn default_state_dir() -> String {
    ".promotion".to_string()
}

impl ValuesFileConfig {
    /// Creates a layout rooted at `root` with default names.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            file_pattern: default_file_pattern(),
            state_dir: default_state_dir(),
        }
    }

    /// Sets the file pattern.
    #[must_use]
    pub fn with_file_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.file_pattern = pattern.into();
        self
    }

    /// Path of the values file for `env`.
    #[must_use]
    pub fn values_path(&self, env: Environment) -> PathBuf {
        self.root
            .join(self.file_pattern.replace("{env}", env.as_str()))
    }

    /// Path of the revision sidecar for `env`.
    #[must_use]
    pub fn sidecar_path(&self, env: Environment) -> PathBuf {
        self.root
            .join(&self.state_dir)
            .join(format!("{}.json", env.as_str()))
    }

    /// Path of the lock file that serializes writers to `env` across
    /// processes.
    #[must_use]
    pub fn lock_path(&self, env: Environment) -> PathBuf {
        self.root
            .join(&self.state_dir)
            .join(format!("{}.lock", env.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_engine_config_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.io_timeout(), Duration::from_secs(10));
        assert_eq!(config.cas_retry.max_attempts, 5);
        assert!(config.cascade_on_apply);
    }

    #[test]
    fn test_engine_config_from_partial_json() {
        let config = EngineConfig::from_json_str(
            r#"{"io_timeout_ms": 250, "cas_retry": {"max_attempts": 2}}"#,
        )
        .unwrap();

        assert_eq!(config.io_timeout_ms, 250);
        assert_eq!(config.cas_retry.max_attempts, 2);
        assert_eq!(config.emit_retry, default_emit_retry());
    }

    #[test]
    fn test_engine_config_rejects_bad_json() {
        let err = EngineConfig::from_json_str("{not json").unwrap_err();
        assert_eq!(err.code(), "config");
    }

    #[test]
    fn test_engine_config_from_missing_path() {
        let err = EngineConfig::from_path("/nonexistent/promoflow.json").unwrap_err();
        assert!(matches!(err, PromotionError::Config(_)));
    }

    #[test]
    fn test_values_paths() {
        let layout = ValuesFileConfig::new("/repo/helm/api");
        assert_eq!(
            layout.values_path(Environment::Stage),
            PathBuf::from("/repo/helm/api/values-stage.yaml")
        );
        assert_eq!(
            layout.sidecar_path(Environment::Prod),
            PathBuf::from("/repo/helm/api/.promotion/prod.json")
        );
        assert_eq!(
            layout.lock_path(Environment::Prod),
            PathBuf::from("/repo/helm/api/.promotion/prod.lock")
        );

        let custom = layout.with_file_pattern("{env}/values.yaml");
        assert_eq!(
            custom.values_path(Environment::Dev),
            PathBuf::from("/repo/helm/api/dev/values.yaml")
        );
    }
}
