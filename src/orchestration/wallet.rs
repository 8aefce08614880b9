use alloy_primitives::{Address, PrimitiveSignature as Signature, B256};
use async_trait::async_trait;

use crate::orchestration::{
    errors::ExecutionError,
    models::{Receipt, Transaction},
};

/// The signing and sending surface of a connected wallet.
///
/// Every method that prompts the user is a suspension point; a declined
/// prompt surfaces as [`ExecutionError::WalletRejected`].
#[async_trait]
pub trait Wallet: Send + Sync {
    /// The connected account, if any.
    fn address(&self) -> Option<Address>;

    /// Signs an EIP-712 signing hash (domain separator already applied).
    async fn sign_typed_data(&self, hash: B256) -> Result<Signature, ExecutionError>;

    /// Broadcasts a transaction and resolves with its hash once accepted by
    /// the node. Does not wait for inclusion.
    async fn send_transaction(&self, tx: &Transaction) -> Result<B256, ExecutionError>;

    /// Resolves once the transaction is included at the requested
    /// confirmation depth, or errors if it cannot be.
    async fn wait_for_receipt(
        &self,
        hash: B256,
        confirmations: u64,
    ) -> Result<Receipt, ExecutionError>;
}
