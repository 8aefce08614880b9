use std::time::Duration;

/// Configuration for retry behavior on transient read failures.
#[derive(Clone, Debug)]
pub struct RetryConfig {
    /// Maximum number of retries after the initial attempt (default: 3).
    pub max_retries: usize,
    /// Initial backoff delay in milliseconds (default: 100ms).
    pub initial_backoff_ms: u64,
    /// Maximum backoff delay in milliseconds (default: 5000ms).
    pub max_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self { max_retries: 3, initial_backoff_ms: 100, max_backoff_ms: 5000 }
    }
}

/// Tunables shared by every pipeline built from this crate.
#[derive(Clone, Debug)]
pub struct ExecutionConfig {
    /// Slippage tolerance in basis points (default: 50 = 0.5%).
    pub slippage_bps: u16,
    /// Deadline applied to execute transactions, in seconds from signing
    /// time (default: 600).
    pub deadline_secs: u64,
    /// Confirmation depth required before a transaction counts as confirmed
    /// (default: 1).
    pub confirmations: u64,
    /// How often a swap pipeline refreshes its quote while unconfirmed
    /// (default: 30s).
    pub quote_refresh_interval: Duration,
    pub retry: RetryConfig,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            slippage_bps: 50,
            deadline_secs: 600,
            confirmations: 1,
            quote_refresh_interval: Duration::from_secs(30),
            retry: RetryConfig::default(),
        }
    }
}
