//! Recovery Manager
//!
//! Bounded, jittered exponential backoff over any fallible async
//! operation, short-circuiting the moment an error classifies as
//! terminal instead of burning through the whole retry budget.

use std::time::Duration;
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::RetryIf;
use tracing::warn;

use crate::config::Settings;
use crate::error::Classification;
use crate::metrics::Metrics;

#[derive(Debug, Clone, Copy)]
pub struct RecoveryConfig {
    pub max_retries: usize,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl From<&Settings> for RecoveryConfig {
    fn from(settings: &Settings) -> Self {
        Self {
            max_retries: settings.max_retries,
            base_delay: settings.retry_base_delay(),
            max_delay: settings.retry_max_delay(),
        }
    }
}

pub struct RecoveryManager {
    config: RecoveryConfig,
}

impl RecoveryManager {
    #[must_use]
    pub const fn new(config: RecoveryConfig) -> Self {
        Self { config }
    }

    /// Retry `operation` up to `max_retries` times with jittered
    /// exponential backoff, stopping early the first time `classify`
    /// reports the error as terminal.
    ///
    /// Increments `metrics.retries_total` once per retried attempt and
    /// `metrics.errors_recovered` if a retry eventually succeeds.
    pub async fn retry<F, Fut, T, E>(
        &self,
        metrics: &Metrics,
        classify: impl Fn(&E) -> Classification + Send + Sync,
        mut operation: F,
    ) -> Result<T, E>
    where
        F: FnMut() -> Fut + Send,
        Fut: std::future::Future<Output = Result<T, E>> + Send,
        E: std::fmt::Display,
    {
        let strategy = ExponentialBackoff::from_millis(
            u64::try_from(self.config.base_delay.as_millis()).unwrap_or(u64::MAX),
        )
        .max_delay(self.config.max_delay)
        .map(jitter)
        .take(self.config.max_retries);

        let mut attempts = 0usize;
        let result = RetryIf::spawn(
            strategy,
            || {
                attempts += 1;
                if attempts > 1 {
                    metrics.record_retry();
                }
                operation()
            },
            |error: &E| classify(error) == Classification::Retryable,
        )
        .await;

        match result {
            Ok(value) => {
                if attempts > 1 {
                    metrics.record_error_recovered();
                }
                Ok(value)
            }
            Err(e) => {
                warn!(attempts, error = %e, "operation did not recover within retry budget");
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug)]
    struct Failure(bool); // true = retryable

    impl std::fmt::Display for Failure {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "failure(retryable={})", self.0)
        }
    }

    fn classify(e: &Failure) -> Classification {
        if e.0 {
            Classification::Retryable
        } else {
            Classification::Terminal
        }
    }

    fn fast_config() -> RecoveryConfig {
        RecoveryConfig {
            max_retries: 5,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
        }
    }

    #[tokio::test]
    async fn succeeds_after_retryable_failures() {
        let manager = RecoveryManager::new(fast_config());
        let metrics = Metrics::new();
        let attempts = AtomicUsize::new(0);

        let result = manager
            .retry(&metrics, classify, || async {
                let n = attempts.fetch_add(1, Ordering::SeqCst);
                if n < 2 {
                    Err(Failure(true))
                } else {
                    Ok(42)
                }
            })
            .await;

        assert_eq!(result.expect("should eventually succeed"), 42);
        assert_eq!(metrics.errors_recovered(), 1);
        assert!(metrics.retries_total() >= 2);
    }

    #[tokio::test]
    async fn exhausts_budget_on_persistent_retryable_failure() {
        let manager = RecoveryManager::new(fast_config());
        let metrics = Metrics::new();

        let result: Result<(), Failure> = manager
            .retry(&metrics, classify, || async { Err(Failure(true)) })
            .await;

        assert!(result.is_err());
        assert_eq!(metrics.errors_recovered(), 0);
    }

    #[tokio::test]
    async fn short_circuits_on_terminal_failure() {
        let manager = RecoveryManager::new(fast_config());
        let metrics = Metrics::new();
        let attempts = AtomicUsize::new(0);

        let result: Result<(), Failure> = manager
            .retry(&metrics, classify, || async {
                attempts.fetch_add(1, Ordering::SeqCst);
                Err(Failure(false))
            })
            .await;

        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }
}
