//! Bounded retry with backoff and jitter for store writes and proposal emission.
//!
//! Each attempt is wrapped in a timeout; a timed-out attempt counts as a
//! failed attempt and is subject to the same bound as any other failure.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;

use crate::errors::PromotionError;

/// Backoff strategy for retry delays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// delay = base * 2^attempt
    #[default]
    Exponential,
    /// delay = base * (attempt + 1)
    Linear,
    /// delay = base
    Constant,
}

/// Jitter strategy to keep concurrent retries apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JitterStrategy {
    /// No jitter
    None,
    /// Random from 0 to delay
    #[default]
    Full,
    /// Half fixed, half random
    Equal,
}

/// Configuration for retry behavior.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Maximum attempts, including the first.
    pub max_attempts: usize,
    /// Base delay between attempts in milliseconds.
    pub base_delay_ms: u64,
    /// Maximum delay cap in milliseconds.
    pub max_delay_ms: u64,
    /// Backoff strategy.
    pub backoff: BackoffStrategy,
    /// Jitter strategy.
    pub jitter: JitterStrategy,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay_ms: 100,
            max_delay_ms: 5_000,
            backoff: BackoffStrategy::Exponential,
            jitter: JitterStrategy::Full,
        }
    }
}

impl RetryConfig {
    /// Creates a new retry config.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the maximum attempts.
    #[must_use]
    pub const fn with_max_attempts(mut self, attempts: usize) -> Self {
        self.max_attempts = attempts;
        self
    }

    /// Sets the base delay.
    #[must_use]
    pub const fn with_base_delay_ms(mut self, delay: u64) -> Self {
        self.base_delay_ms = delay;
        self
    }

    /// Sets the maximum delay.
    #[must_use]
    pub const fn with_max_delay_ms(mut self, delay: u64) -> Self {
        self.max_delay_ms = delay;
        self
    }

    /// Sets the backoff strategy.
    #[must_use]
    pub const fn with_backoff(mut self, strategy: BackoffStrategy) -> Self {
        self.backoff = strategy;
        self
    }

    /// Sets the jitter strategy.
    #[must_use]
    pub const fn with_jitter(mut self, strategy: JitterStrategy) -> Self {
        self.jitter = strategy;
        self
    }

    /// Attempts are never fewer than one.
    #[must_use]
    pub fn attempts(&self) -> usize {
        self.max_attempts.max(1)
    }

    /// Delay before the retry that follows failed attempt `attempt` (0-indexed).
    #[must_use]
    pub fn delay_for(&self, attempt: usize) -> Duration {
        let base = self.base_delay_ms;
        let max = self.max_delay_ms;
        let step = u32::try_from(attempt).unwrap_or(u32::MAX);

        let delay = match self.backoff {
            BackoffStrategy::Exponential => base.saturating_mul(2u64.saturating_pow(step)),
            BackoffStrategy::Linear => base.saturating_mul(u64::from(step).saturating_add(1)),
            BackoffStrategy::Constant => base,
        }
        .min(max);

        let jittered = match self.jitter {
            JitterStrategy::None => delay,
            JitterStrategy::Full if delay > 0 => rand::thread_rng().gen_range(0..=delay),
            JitterStrategy::Equal if delay / 2 > 0 => {
                let half = delay / 2;
                half + rand::thread_rng().gen_range(0..=half)
            }
            JitterStrategy::Full | JitterStrategy::Equal => delay,
        };

        Duration::from_millis(jittered)
    }
}

/// Outcome of a retried operation, with the number of attempts it took.
#[derive(Debug)]
pub struct RetryOutcome<T> {
    /// The final result.
    pub result: Result<T, PromotionError>,
    /// Attempts made.
    pub attempts: usize,
}

/// Runs `operation` until it succeeds, fails with a non-retryable error, or
/// the attempt bound is reached. Each attempt is limited to `timeout`.
pub async fn retry_with_backoff<T, F, Fut>(
    config: &RetryConfig,
    operation_name: &str,
    timeout: Duration,
    mut operation: F,
) -> RetryOutcome<T>
where
    F: FnMut(usize) -> Fut,
    Fut: Future<Output = Result<T, PromotionError>>,
{
    let max_attempts = config.attempts();
    let mut attempt = 0;

    loop {
        let result = match tokio::time::timeout(timeout, operation(attempt)).await {
            Ok(result) => result,
            Err(_) => Err(PromotionError::Timeout {
                operation: operation_name.to_string(),
                timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            }),
        };
        attempt += 1;

        match result {
            Ok(value) => {
                return RetryOutcome {
                    result: Ok(value),
                    attempts: attempt,
                }
            }
            Err(err) if err.is_retryable() && attempt < max_attempts => {
                let delay = config.delay_for(attempt - 1);
                tracing::debug!(
                    operation = operation_name,
                    attempt,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    error = %err,
                    "Retrying after error"
                );
                tokio::time::sleep(delay).await;
            }
            Err(err) => {
                return RetryOutcome {
                    result: Err(err),
                    attempts: attempt,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Environment;
    use crate::errors::{ConflictError, InvalidSignalError};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn quick() -> RetryConfig {
        RetryConfig::new()
            .with_base_delay_ms(1)
            .with_jitter(JitterStrategy::None)
    }

    #[test]
    fn test_retry_config_default() {
        let config = RetryConfig::default();
        assert_eq!(config.max_attempts, 5);
        assert_eq!(config.backoff, BackoffStrategy::Exponential);
        assert_eq!(config.jitter, JitterStrategy::Full);
    }

    #[test]
    fn test_retry_config_deserialize_partial() {
        let config: RetryConfig =
            serde_json::from_str(r#"{"max_attempts": 2, "backoff": "linear"}"#).unwrap();
        assert_eq!(config.max_attempts, 2);
        assert_eq!(config.backoff, BackoffStrategy::Linear);
        assert_eq!(config.base_delay_ms, 100);
    }

    #[test]
    fn test_delay_exponential_no_jitter() {
        let config = RetryConfig::new()
            .with_base_delay_ms(100)
            .with_jitter(JitterStrategy::None);

        assert_eq!(config.delay_for(0), Duration::from_millis(100));
        assert_eq!(config.delay_for(1), Duration::from_millis(200));
        assert_eq!(config.delay_for(2), Duration::from_millis(400));
    }

    #[test]
    fn test_delay_linear_and_constant() {
        let linear = RetryConfig::new()
            .with_base_delay_ms(100)
            .with_backoff(BackoffStrategy::Linear)
            .with_jitter(JitterStrategy::None);
        assert_eq!(linear.delay_for(2), Duration::from_millis(300));

        let constant = linear.with_backoff(BackoffStrategy::Constant);
        assert_eq!(constant.delay_for(7), Duration::from_millis(100));
    }

    #[test]
    fn test_delay_capped_at_max() {
        let config = RetryConfig::new()
            .with_base_delay_ms(1000)
            .with_max_delay_ms(5000)
            .with_jitter(JitterStrategy::None);
        assert_eq!(config.delay_for(40), Duration::from_millis(5000));
    }

    #[test]
    fn test_full_jitter_bounded() {
        let config = RetryConfig::new()
            .with_base_delay_ms(100)
            .with_backoff(BackoffStrategy::Constant);
        for _ in 0..20 {
            assert!(config.delay_for(0) <= Duration::from_millis(100));
        }
    }

    #[test]
    fn test_zero_attempts_still_runs_once() {
        assert_eq!(RetryConfig::new().with_max_attempts(0).attempts(), 1);
    }

    #[tokio::test]
    async fn test_retry_succeeds_after_conflicts() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();

        let outcome = retry_with_backoff(&quick(), "write", Duration::from_secs(1), |_| {
            let counter = counter.clone();
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(ConflictError::new(Environment::Stage, 1, 2).into())
                } else {
                    Ok(42)
                }
            }
        })
        .await;

        assert_eq!(outcome.result.unwrap(), 42);
        assert_eq!(outcome.attempts, 3);
    }

    #[tokio::test]
    async fn test_retry_stops_on_non_retryable() {
        let outcome: RetryOutcome<()> =
            retry_with_backoff(&quick(), "parse", Duration::from_secs(1), |_| async {
                Err(InvalidSignalError::new("bad").into())
            })
            .await;

        assert_eq!(outcome.attempts, 1);
        assert!(matches!(outcome.result, Err(PromotionError::InvalidSignal(_))));
    }

    #[tokio::test]
    async fn test_retry_exhausts_bound() {
        let config = quick().with_max_attempts(3);
        let outcome: RetryOutcome<()> =
            retry_with_backoff(&config, "write", Duration::from_secs(1), |_| async {
                Err(ConflictError::new(Environment::Prod, 0, 1).into())
            })
            .await;

        assert_eq!(outcome.attempts, 3);
        assert!(matches!(outcome.result, Err(PromotionError::Conflict(_))));
    }

    #[tokio::test]
    async fn test_timeout_counts_as_failed_attempt() {
        let config = quick().with_max_attempts(2);
        let outcome: RetryOutcome<()> =
            retry_with_backoff(&config, "emit", Duration::from_millis(10), |_| async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            })
            .await;

        assert_eq!(outcome.attempts, 2);
        assert!(matches!(outcome.result, Err(PromotionError::Timeout { .. })));
    }
}
