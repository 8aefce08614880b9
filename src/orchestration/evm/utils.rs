use alloy_primitives::{Address, Keccak256, B256, U256};
use chrono::Utc;
use num_bigint::BigUint;

use crate::orchestration::models::TokenAmount;

/// Current unix timestamp, the default clock for permit and transaction
/// deadlines.
pub fn unix_now() -> u64 {
    Utc::now()
        .naive_utc()
        .and_utc()
        .timestamp() as u64
}

pub fn biguint_to_u256(value: &BigUint) -> U256 {
    let bytes = value.to_bytes_be();
    U256::from_be_slice(&bytes)
}

/// Assembles calldata from a function signature and pre-encoded arguments.
pub fn encode_input(selector: &str, mut encoded_args: Vec<u8>) -> Vec<u8> {
    let mut hasher = Keccak256::new();
    hasher.update(selector.as_bytes());
    let selector_bytes = &hasher.finalize()[..4];
    let mut call_data = selector_bytes.to_vec();
    // Remove extra prefix if present (32 bytes for dynamic data)
    // Alloy encoding is including a prefix for dynamic data indicating the offset or length
    // but at this point we don't want that
    if encoded_args.len() > 32 &&
        encoded_args[..32] ==
            [0u8; 31]
                .into_iter()
                .chain([32].to_vec())
                .collect::<Vec<u8>>()
    {
        encoded_args = encoded_args[32..].to_vec();
    }
    call_data.extend(encoded_args);
    call_data
}

/// Deterministic hash of a signing operation's inputs.
///
/// A cached signature is only valid while the fingerprint of the current
/// inputs matches the one it was stored under; any change of chain, owner,
/// spender, token set or amount produces a different hash.
pub fn signing_fingerprint(
    chain_id: u64,
    owner: Address,
    spender: Address,
    pairs: &[TokenAmount],
) -> B256 {
    let mut hasher = Keccak256::new();
    hasher.update(chain_id.to_be_bytes());
    hasher.update(owner.as_slice());
    hasher.update(spender.as_slice());
    for pair in pairs {
        hasher.update(pair.token.as_slice());
        hasher.update(pair.amount.to_be_bytes::<32>());
    }
    hasher.finalize()
}
