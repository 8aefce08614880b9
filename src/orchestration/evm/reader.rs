use std::sync::Arc;

use alloy::{
    providers::{Provider, RootProvider},
    rpc::types::{TransactionInput, TransactionRequest},
    transports::{BoxTransport, RpcError, TransportErrorKind},
};
use alloy_primitives::{
    aliases::{U160, U24, U48},
    Address, Bytes as AlloyBytes, TxKind, U256,
};
use alloy_sol_types::SolValue;
use async_trait::async_trait;
use tracing::debug;

use crate::orchestration::{
    chain_reader::ChainReader,
    config::RetryConfig,
    errors::ExecutionError,
    evm::{
        constants::PERMIT2_ADDRESS,
        registry::ClientRegistry,
        retry::RetryPolicy,
        utils::encode_input,
    },
    models::{Chain, PermitAllowance, PoolKey, PoolState, TokenMetadata, NATIVE_TOKEN},
};

/// Type alias for representing Permit2 allowance data as a tuple of
/// (amount, expiration, nonce). Used for decoding.
type Allowance = (U160, U48, U48);

/// Quoter return layout: (amountOut, sqrtPriceX96After, ticksCrossed,
/// gasEstimate).
type QuoteReturns = (U256, U160, u32, U256);

/// Classifies a call failure: error responses from the node are definitive
/// simulation results (reverts such as insufficient liquidity), transport
/// problems are transient and retryable, and serialization failures point at
/// a setup problem.
fn classify_call_error(err: RpcError<TransportErrorKind>) -> ExecutionError {
    match err {
        RpcError::ErrorResp(payload) => {
            ExecutionError::SimulationFailure(payload.message.to_string())
        }
        RpcError::SerError(e) => ExecutionError::FatalError(format!("Request encoding failed: {e}")),
        other => ExecutionError::TransientRpc(format!("{other:?}")),
    }
}

/// JSON-RPC implementation of [`ChainReader`]. Every request runs through
/// the configured retry policy.
pub struct EvmChainReader {
    client: Arc<RootProvider<BoxTransport>>,
    chain: Chain,
    /// Quoter contract simulating exact-input swaps.
    quoter: Address,
    /// Factory contract resolving pool addresses.
    factory: Address,
    retry: RetryPolicy,
}

impl EvmChainReader {
    pub async fn new(
        chain: Chain,
        quoter: Address,
        factory: Address,
        config: &RetryConfig,
    ) -> Result<Self, ExecutionError> {
        let client = ClientRegistry::global()
            .get_or_connect(&chain)
            .await?;
        Ok(Self::with_client(client, chain, quoter, factory, config.into()))
    }

    pub fn with_client(
        client: Arc<RootProvider<BoxTransport>>,
        chain: Chain,
        quoter: Address,
        factory: Address,
        retry: RetryPolicy,
    ) -> Self {
        Self { client, chain, quoter, factory, retry }
    }

    pub fn chain(&self) -> &Chain {
        &self.chain
    }

    async fn call(&self, to: Address, data: Vec<u8>) -> Result<AlloyBytes, ExecutionError> {
        let tx = TransactionRequest {
            to: Some(TxKind::from(to)),
            input: TransactionInput { input: Some(AlloyBytes::from(data)), data: None },
            ..Default::default()
        };
        self.retry
            .retry_request(|| async {
                self.client
                    .call(&tx)
                    .await
                    .map_err(classify_call_error)
            })
            .await
    }

    async fn pool_address(&self, pool: &PoolKey) -> Result<Address, ExecutionError> {
        let args = (pool.token0, pool.token1, U24::from(pool.fee));
        let data = encode_input("getPool(address,address,uint24)", args.abi_encode());
        let response = self.call(self.factory, data).await?;
        let address = Address::abi_decode(&response, true).map_err(|_| {
            ExecutionError::FatalError("Failed to decode response for getPool".to_string())
        })?;
        if address == Address::ZERO {
            return Err(ExecutionError::InvalidInput(format!(
                "No pool deployed for ({}, {}, {})",
                pool.token0, pool.token1, pool.fee
            )));
        }
        Ok(address)
    }
}

#[async_trait]
impl ChainReader for EvmChainReader {
    async fn allowance(
        &self,
        owner: Address,
        token: Address,
        spender: Address,
    ) -> Result<U256, ExecutionError> {
        let args = (owner, spender);
        let data = encode_input("allowance(address,address)", args.abi_encode());
        let response = self.call(token, data).await?;
        U256::abi_decode(&response, true).map_err(|_| {
            ExecutionError::FatalError("Failed to decode response for allowance".to_string())
        })
    }

    async fn permit_allowance(
        &self,
        owner: Address,
        token: Address,
        spender: Address,
    ) -> Result<PermitAllowance, ExecutionError> {
        let args = (owner, token, spender);
        let data = encode_input("allowance(address,address,address)", args.abi_encode());
        let response = self.call(PERMIT2_ADDRESS, data).await?;
        let (amount, expiration, nonce) = Allowance::abi_decode(&response, true).map_err(|_| {
            ExecutionError::FatalError(
                "Failed to decode response for permit2 allowance".to_string(),
            )
        })?;
        Ok(PermitAllowance {
            amount: U256::from(amount),
            expiration: expiration.to::<u64>(),
            nonce: nonce.to::<u64>(),
        })
    }

    async fn balance(&self, owner: Address, token: Address) -> Result<U256, ExecutionError> {
        if token == NATIVE_TOKEN {
            return self
                .retry
                .retry_request(|| async {
                    self.client
                        .get_balance(owner)
                        .await
                        .map_err(classify_call_error)
                })
                .await;
        }
        let data = encode_input("balanceOf(address)", owner.abi_encode());
        let response = self.call(token, data).await?;
        U256::abi_decode(&response, true).map_err(|_| {
            ExecutionError::FatalError("Failed to decode response for balanceOf".to_string())
        })
    }

    async fn token_metadata(&self, token: Address) -> Result<TokenMetadata, ExecutionError> {
        if token == NATIVE_TOKEN {
            return Ok(TokenMetadata { symbol: "ETH".to_string(), decimals: 18 });
        }
        let response = self
            .call(token, encode_input("symbol()", vec![]))
            .await?;
        let symbol = String::abi_decode(&response, true).map_err(|_| {
            ExecutionError::FatalError("Failed to decode response for symbol".to_string())
        })?;
        let response = self
            .call(token, encode_input("decimals()", vec![]))
            .await?;
        let decimals = u8::abi_decode(&response, true).map_err(|_| {
            ExecutionError::FatalError("Failed to decode response for decimals".to_string())
        })?;
        Ok(TokenMetadata { symbol, decimals })
    }

    async fn quote_exact_input(
        &self,
        pool: &PoolKey,
        amount_in: U256,
        zero_for_one: bool,
    ) -> Result<U256, ExecutionError> {
        let (token_in, token_out) = if zero_for_one {
            (pool.token0, pool.token1)
        } else {
            (pool.token1, pool.token0)
        };
        let params = (token_in, token_out, amount_in, U24::from(pool.fee), U160::ZERO);
        let data = encode_input(
            "quoteExactInputSingle((address,address,uint256,uint24,uint160))",
            (params,).abi_encode(),
        );
        let response = self.call(self.quoter, data).await?;
        let (amount_out, _, _, _) = QuoteReturns::abi_decode(&response, true).map_err(|_| {
            ExecutionError::FatalError("Failed to decode response for quote".to_string())
        })?;
        debug!(%amount_in, %amount_out, "Quote simulated");
        Ok(amount_out)
    }

    async fn pool_state(&self, pool: &PoolKey) -> Result<PoolState, ExecutionError> {
        let address = self.pool_address(pool).await?;

        let response = self
            .call(address, encode_input("slot0()", vec![]))
            .await?;
        if response.len() < 64 {
            return Err(ExecutionError::FatalError(
                "Failed to decode response for slot0".to_string(),
            ));
        }
        let sqrt_price_x96 = U256::from_be_slice(&response[0..32]);
        // The int24 tick is sign-extended through its 32-byte word, so the
        // low four bytes carry a valid two's-complement i32.
        let tick_bytes: [u8; 4] = response[60..64].try_into().map_err(|_| {
            ExecutionError::FatalError("Failed to decode response for slot0".to_string())
        })?;
        let tick = i32::from_be_bytes(tick_bytes);

        let response = self
            .call(address, encode_input("liquidity()", vec![]))
            .await?;
        let liquidity = u128::abi_decode(&response, true).map_err(|_| {
            ExecutionError::FatalError("Failed to decode response for liquidity".to_string())
        })?;

        Ok(PoolState { sqrt_price_x96, tick, liquidity })
    }
}
