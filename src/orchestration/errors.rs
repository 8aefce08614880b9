use std::io;

use thiserror::Error;

/// Represents the outer-level, user-facing errors of the orchestration
/// package.
///
/// `ExecutionError` encompasses all possible errors that can occur while
/// driving a step pipeline, wrapping lower-level errors in a user-friendly
/// way for easier handling and display. Validation variants are returned
/// before any network call is made; execution variants surface from the
/// individual step futures.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExecutionError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    /// There is a problem with the application setup.
    #[error("Fatal error: {0}")]
    FatalError(String),
    /// The user declined a wallet prompt. Terminates the flow but is
    /// conventionally suppressed from user-visible error surfaces.
    #[error("Wallet rejected the request")]
    WalletRejected,
    /// No owning account is available for signing or sending.
    #[error("No wallet account connected")]
    WalletNotConnected,
    #[error("Insufficient {symbol} balance: required {required}, available {available}")]
    InsufficientBalance { symbol: String, required: String, available: String },
    /// Execution was attempted before a required batch signature exists.
    /// Always a programming error in the calling sequence.
    #[error("A batched permit signature is required before execution")]
    PermitRequired,
    #[error("Pool state has not been loaded")]
    PoolNotLoaded,
    #[error("Tick range has not been resolved")]
    TickRangeUnresolved,
    #[error("No quote is loaded for the current trade inputs")]
    QuoteNotLoaded,
    /// Definitive simulation failure (e.g. insufficient liquidity). Never
    /// retried.
    #[error("Simulation failed: {0}")]
    SimulationFailure(String),
    /// Temporary RPC problem. Retried by the configured retry policy.
    #[error("Transient RPC error: {0}")]
    TransientRpc(String),
    #[error("No transaction in flight")]
    NoTransactionInFlight,
    #[error("Transaction {0} reverted on-chain")]
    TransactionReverted(String),
    #[error("The native token cannot be approved")]
    NativeTokenNotApprovable,
    /// An approval slot's allowance read has not resolved yet. Callers must
    /// wait for the read instead of guessing whether an approval is needed.
    #[error("Allowance for token {0} is still loading")]
    AwaitingApprovalStatus(String),
    #[error("An execution is already in progress for this pipeline")]
    ExecutionInProgress,
}

impl ExecutionError {
    /// Whether a retry at a later time may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, ExecutionError::TransientRpc(_))
    }

    /// Whether the error should be shown to the user. Wallet rejections
    /// terminate the flow silently.
    pub fn should_display(&self) -> bool {
        !matches!(self, ExecutionError::WalletRejected)
    }
}

impl From<io::Error> for ExecutionError {
    fn from(err: io::Error) -> Self {
        ExecutionError::FatalError(err.to_string())
    }
}

impl From<serde_json::Error> for ExecutionError {
    fn from(err: serde_json::Error) -> Self {
        ExecutionError::FatalError(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(ExecutionError::TransientRpc("timeout".to_string()).is_transient());
        assert!(!ExecutionError::SimulationFailure("insufficient liquidity".to_string())
            .is_transient());
        assert!(!ExecutionError::WalletRejected.is_transient());
    }

    #[test]
    fn test_wallet_rejection_is_suppressed() {
        assert!(!ExecutionError::WalletRejected.should_display());
        assert!(ExecutionError::NoTransactionInFlight.should_display());
    }
}
