//! Bounded retry for chain reads.
//!
//! Transient failures (rate limits, timeouts, connection resets) are retried
//! with exponential backoff up to a fixed number of attempts. Definitive
//! failures — simulation reverts such as insufficient liquidity, validation
//! errors — are never retried.

use std::{
    future::Future,
    sync::atomic::{AtomicUsize, Ordering},
    time::Duration,
};

use backoff::{exponential::ExponentialBackoffBuilder, ExponentialBackoff};
use tracing::warn;

use crate::orchestration::{config::RetryConfig, errors::ExecutionError};

/// Retry policy applied to every [`crate::orchestration::chain_reader::ChainReader`]
/// request the EVM implementation makes.
#[derive(Clone, Debug)]
pub struct RetryPolicy {
    max_retries: usize,
    backoff: ExponentialBackoff,
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        let backoff = ExponentialBackoffBuilder::new()
            .with_initial_interval(Duration::from_millis(config.initial_backoff_ms))
            .with_multiplier(2.0)
            .with_max_interval(Duration::from_millis(config.max_backoff_ms))
            // Termination is attempt-counted, not wall-clock bounded.
            .with_max_elapsed_time(None)
            .build();
        Self { max_retries: config.max_retries, backoff }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        (&RetryConfig::default()).into()
    }
}

impl RetryPolicy {
    /// Creates a retry policy with very short intervals for tests.
    #[cfg(test)]
    pub fn for_testing() -> Self {
        let backoff = ExponentialBackoffBuilder::new()
            .with_initial_interval(Duration::from_millis(1))
            .with_multiplier(1.1)
            .with_max_interval(Duration::from_millis(5))
            .with_max_elapsed_time(None)
            .build();
        Self { max_retries: RetryConfig::default().max_retries, backoff }
    }

    /// Runs `operation`, retrying transient failures until one succeeds, a
    /// definitive error surfaces, or `max_retries` retries are spent.
    pub async fn retry_request<F, Fut, T>(&self, mut operation: F) -> Result<T, ExecutionError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ExecutionError>>,
    {
        let attempts = AtomicUsize::new(0);
        backoff::future::retry(self.backoff.clone(), || {
            let fut = operation();
            let attempt = attempts.fetch_add(1, Ordering::SeqCst);
            let max_retries = self.max_retries;
            async move {
                fut.await.map_err(|err| {
                    if err.is_transient() && attempt < max_retries {
                        warn!(attempt = attempt + 1, error = %err, "Retrying transient read failure");
                        backoff::Error::transient(err)
                    } else {
                        backoff::Error::permanent(err)
                    }
                })
            }
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[tokio::test]
    async fn test_transient_failures_retried_until_success() {
        let policy = RetryPolicy::for_testing();
        let calls = AtomicUsize::new(0);

        let result = policy
            .retry_request(|| {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err(ExecutionError::TransientRpc("connection reset".to_string()))
                    } else {
                        Ok(42u64)
                    }
                }
            })
            .await;

        assert_eq!(result, Ok(42));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_transient_failures_surface_after_three_retries() {
        let policy = RetryPolicy::for_testing();
        let calls = AtomicUsize::new(0);

        let result: Result<u64, _> = policy
            .retry_request(|| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(ExecutionError::TransientRpc("rate limited".to_string())) }
            })
            .await;

        assert_eq!(result, Err(ExecutionError::TransientRpc("rate limited".to_string())));
        // Initial attempt plus three retries.
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_definitive_failure_not_retried() {
        let policy = RetryPolicy::for_testing();
        let calls = AtomicUsize::new(0);

        let result: Result<u64, _> = policy
            .retry_request(|| {
                calls.fetch_add(1, Ordering::SeqCst);
                async {
                    Err(ExecutionError::SimulationFailure("insufficient liquidity".to_string()))
                }
            })
            .await;

        assert_eq!(
            result,
            Err(ExecutionError::SimulationFailure("insufficient liquidity".to_string()))
        );
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
