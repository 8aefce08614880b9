use alloy_primitives::{Address, U256};
use async_trait::async_trait;

use crate::orchestration::{
    errors::ExecutionError,
    models::{PermitAllowance, PoolKey, PoolState, TokenMetadata},
};

/// Read-only chain access the pipelines depend on.
///
/// Implementations must classify failures: temporary problems (timeouts,
/// rate limits) surface as [`ExecutionError::TransientRpc`] and are retried
/// by the caller's retry policy, while definitive failures such as an
/// "insufficient liquidity" revert surface as
/// [`ExecutionError::SimulationFailure`] and are not.
#[async_trait]
pub trait ChainReader: Send + Sync {
    /// Current ERC-20 allowance granted by `owner` to `spender`.
    async fn allowance(
        &self,
        owner: Address,
        token: Address,
        spender: Address,
    ) -> Result<U256, ExecutionError>;

    /// The (amount, expiration, nonce) record the Permit2 contract holds for
    /// this owner/token/spender triple.
    async fn permit_allowance(
        &self,
        owner: Address,
        token: Address,
        spender: Address,
    ) -> Result<PermitAllowance, ExecutionError>;

    /// Balance of `token` held by `owner`; the native balance when `token`
    /// is the native sentinel.
    async fn balance(&self, owner: Address, token: Address) -> Result<U256, ExecutionError>;

    /// Symbol and decimals of an ERC-20 token.
    async fn token_metadata(&self, token: Address) -> Result<TokenMetadata, ExecutionError>;

    /// Simulated output amount for an exact-input swap through `pool`.
    async fn quote_exact_input(
        &self,
        pool: &PoolKey,
        amount_in: U256,
        zero_for_one: bool,
    ) -> Result<U256, ExecutionError>;

    /// Current pool state.
    async fn pool_state(&self, pool: &PoolKey) -> Result<PoolState, ExecutionError>;
}
