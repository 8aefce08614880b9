use alloy_primitives::{address, Address, U256};

/// Canonical Permit2 deployment, shared across chains.
pub const PERMIT2_ADDRESS: Address = address!("000000000022D473030F116dDEE9F6B43aC78BA3");

/// Unlimited-approval sentinel used when `approve` is called without an
/// explicit amount.
pub const MAX_ALLOWANCE: U256 = U256::MAX;

/// Expiration period for permits, set to 30 days (in seconds).
pub const PERMIT_EXPIRATION: u64 = 30 * 24 * 60 * 60;
/// Expiration period for permit signatures, set to 30 minutes (in seconds).
pub const PERMIT_SIG_EXPIRATION: u64 = 30 * 60;

/// How often receipt polling checks for inclusion.
pub const RECEIPT_POLL_INTERVAL_MS: u64 = 1000;
