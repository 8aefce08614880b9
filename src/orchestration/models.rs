use alloy_primitives::{Address, PrimitiveSignature as Signature, B256, U256};
use num_bigint::BigUint;
use serde::{Deserialize, Serialize};

use crate::orchestration::{
    errors::ExecutionError,
    serde_primitives::{biguint_string, biguint_string_option},
};

/// Sentinel address representing the chain's native asset. Native amounts
/// travel in the transaction value field and are excluded from approvals and
/// permit signing.
pub const NATIVE_TOKEN: Address = Address::ZERO;

/// A chain supported by the orchestration layer.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub struct Chain {
    pub id: u64,
    pub name: String,
}

impl Chain {
    pub fn new(id: u64, name: &str) -> Self {
        Self { id, name: name.to_string() }
    }

    pub fn ethereum() -> Self {
        Self::new(1, "ethereum")
    }

    pub fn base() -> Self {
        Self::new(8453, "base")
    }

    /// Environment variable holding this chain's RPC endpoint, e.g.
    /// `ETHEREUM_RPC_URL`. The registry falls back to `RPC_URL`.
    pub fn rpc_url_env_key(&self) -> String {
        format!("{}_RPC_URL", self.name.to_uppercase())
    }
}

/// A transaction ready to be sent.
#[derive(Clone, Debug, PartialEq)]
pub struct Transaction {
    // Address of the contract to call with the calldata
    pub to: Address,
    // Native value to be sent with the transaction.
    pub value: U256,
    // Encoded calldata for the transaction.
    pub data: Vec<u8>,
}

/// The subset of a transaction receipt the orchestration layer acts on.
#[derive(Clone, Debug, PartialEq)]
pub struct Receipt {
    pub transaction_hash: B256,
    pub block_number: u64,
    /// False if the transaction was included but reverted.
    pub status: bool,
}

/// Derived lifecycle status of one tracked transaction.
///
/// Precedence when deriving: `Error` > `Confirmed` > `Confirming` >
/// `Pending` > `Idle`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TxStatus {
    /// Nothing sent yet.
    Idle,
    /// Broadcast in flight: estimating gas or awaiting the wallet signature.
    Pending,
    /// Broadcast, awaiting block inclusion.
    Confirming,
    Confirmed,
    Error,
}

/// Tri-state answer to "is this step needed?".
///
/// `Unknown` means the underlying read has not resolved; callers must never
/// treat it as `NotRequired`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Requirement {
    Unknown,
    NotRequired,
    Required,
}

impl Requirement {
    pub fn is_known(&self) -> bool {
        !matches!(self, Requirement::Unknown)
    }
}

/// Ordered steps of a pipeline. Swap pipelines use a single approval slot;
/// liquidity pipelines use two. The current step is always derived from the
/// component states, never stored.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum PipelineStep {
    Approval0,
    Approval1,
    Permit,
    Execute,
    Completed,
}

/// A token paired with the amount of it an operation requires.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TokenAmount {
    pub token: Address,
    pub amount: U256,
}

impl TokenAmount {
    pub fn new(token: Address, amount: U256) -> Self {
        Self { token, amount }
    }

    pub fn is_native(&self) -> bool {
        self.token == NATIVE_TOKEN
    }

    /// Whether this pair participates in permit signing. Native tokens and
    /// zero amounts are excluded entirely.
    pub fn requires_permit(&self) -> bool {
        !self.is_native() && !self.amount.is_zero()
    }
}

/// Allowance record as tracked by the Permit2 contract.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PermitAllowance {
    pub amount: U256,
    pub expiration: u64,
    pub nonce: u64,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct TokenMetadata {
    pub symbol: String,
    pub decimals: u8,
}

/// Per-token entry of a batched permit payload.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PermitTokenDetails {
    pub token: Address,
    pub amount: U256,
    /// Unix timestamp after which the permit itself lapses.
    pub expiration: u64,
    pub nonce: u64,
}

/// A signed batched authorization for a spender to pull one or more tokens.
///
/// The batch format is used even when a single token needs authorization so
/// that downstream calldata building stays uniform.
#[derive(Clone, Debug, PartialEq)]
pub struct SignedPermitBatch {
    pub details: Vec<PermitTokenDetails>,
    pub spender: Address,
    /// Unix timestamp deadline for submitting the signature on-chain.
    pub sig_deadline: U256,
    pub signature: Signature,
}

/// Result of the off-chain signature step.
///
/// `None` means no contract-based token requires authorization. A value is
/// only valid while the fingerprint of the signing inputs is unchanged.
#[derive(Clone, Debug, PartialEq)]
pub enum PermitSignature {
    None,
    Batch(SignedPermitBatch),
}

impl PermitSignature {
    pub fn batch(&self) -> Option<&SignedPermitBatch> {
        match self {
            PermitSignature::Batch(signed) => Some(signed),
            PermitSignature::None => None,
        }
    }
}

/// What kind of signature the signer will produce for its current inputs.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SigningKind {
    /// No contract-based token with a non-zero amount remains.
    None,
    Batch,
}

/// Identifies a pool by its token pair and fee tier.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub struct PoolKey {
    pub token0: Address,
    pub token1: Address,
    pub fee: u32,
}

impl PoolKey {
    /// Swap direction flag: true when `token_in` is the pool's token0.
    pub fn zero_for_one(&self, token_in: Address) -> bool {
        token_in == self.token0
    }
}

/// On-chain pool state captured at quote time.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PoolState {
    pub sqrt_price_x96: U256,
    pub tick: i32,
    pub liquidity: u128,
}

/// Price-range boundaries of a liquidity position.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct TickRange {
    pub lower: i32,
    pub upper: i32,
}

impl TickRange {
    pub fn validate(&self) -> Result<(), ExecutionError> {
        if self.lower >= self.upper {
            return Err(ExecutionError::InvalidInput(format!(
                "Tick range lower bound {} must be below upper bound {}",
                self.lower, self.upper
            )));
        }
        Ok(())
    }
}

/// User-facing description of a swap.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct SwapParams {
    /// The token being sold.
    pub token_in: Address,
    /// The token being bought.
    pub token_out: Address,
    /// Amount of the sold token.
    #[serde(with = "biguint_string")]
    pub amount_in: BigUint,
    pub pool: PoolKey,
    /// Slippage tolerance in basis points. Defaults to the configured
    /// tolerance when not set.
    #[serde(default)]
    pub slippage_bps: Option<u16>,
    pub receiver: Address,
}

/// User-facing description of a liquidity position operation.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct PositionParams {
    pub pool: PoolKey,
    /// Unset while the caller is still resolving the range.
    #[serde(default)]
    pub tick_range: Option<TickRange>,
    #[serde(with = "biguint_string")]
    pub amount0: BigUint,
    #[serde(with = "biguint_string")]
    pub amount1: BigUint,
    /// Liquidity to remove; only meaningful for decrease operations.
    #[serde(default, with = "biguint_string_option")]
    pub liquidity: Option<BigUint>,
    pub recipient: Address,
}
