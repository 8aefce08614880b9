use crate::orchestration::{
    errors::ExecutionError,
    models::{SignedPermitBatch, Transaction},
};

/// Builds the final execute transaction for one operation.
///
/// One implementation exists per operation kind (swap, mint, burn, collect).
/// Implementations must be pure with respect to chain state already captured
/// by the caller (pool data, tick range) and must not perform additional
/// signing. The batch signature is `None` when the pipeline's signing kind
/// is [`crate::orchestration::models::SigningKind::None`].
pub trait CalldataBuilder: Send + Sync {
    /// Operation-specific arguments (amounts, limits, deadline).
    type Args;

    fn build_calldata(
        &self,
        signature: Option<&SignedPermitBatch>,
        args: &Self::Args,
    ) -> Result<Transaction, ExecutionError>;
}
