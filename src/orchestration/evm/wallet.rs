use std::{str::FromStr, sync::Arc, time::Duration};

use alloy::{
    providers::{Provider, RootProvider},
    rpc::types::{TransactionInput, TransactionRequest},
    signers::{local::PrivateKeySigner, SignerSync},
    transports::{BoxTransport, RpcError, TransportErrorKind},
};
use alloy_primitives::{
    Address, Bytes as AlloyBytes, PrimitiveSignature as Signature, TxKind, B256,
};
use async_trait::async_trait;
use tracing::debug;

use crate::orchestration::{
    errors::ExecutionError,
    evm::{constants::RECEIPT_POLL_INTERVAL_MS, registry::ClientRegistry},
    models::{Chain, Receipt, Transaction},
    wallet::Wallet,
};

/// Maps a send failure: a node-side rejection of the signing request
/// surfaces as [`ExecutionError::WalletRejected`], everything else as a
/// transient problem the caller may retry by resending.
fn classify_send_error(err: RpcError<TransportErrorKind>) -> ExecutionError {
    if let RpcError::ErrorResp(payload) = &err {
        let message = payload.message.to_lowercase();
        if message.contains("rejected") || message.contains("denied") {
            return ExecutionError::WalletRejected;
        }
    }
    ExecutionError::TransientRpc(format!("{err:?}"))
}

/// [`Wallet`] backed by a JSON-RPC node: typed data is signed locally with
/// the configured key, transactions are sent through the node (which must
/// manage the sender account, as an Anvil fork does) and receipts are
/// polled until the requested confirmation depth.
pub struct RpcWallet {
    client: Arc<RootProvider<BoxTransport>>,
    signer: PrivateKeySigner,
    sender: Address,
}

impl RpcWallet {
    pub async fn new(chain: &Chain, private_key: &str) -> Result<Self, ExecutionError> {
        let client = ClientRegistry::global()
            .get_or_connect(chain)
            .await?;
        Self::with_client(client, private_key)
    }

    pub fn with_client(
        client: Arc<RootProvider<BoxTransport>>,
        private_key: &str,
    ) -> Result<Self, ExecutionError> {
        let pk = B256::from_str(private_key).map_err(|_| {
            ExecutionError::FatalError("Failed to convert private key to B256".to_string())
        })?;
        let signer = PrivateKeySigner::from_bytes(&pk).map_err(|_| {
            ExecutionError::FatalError("Failed to create signer from private key".to_string())
        })?;
        let sender = signer.address();
        Ok(Self { client, signer, sender })
    }
}

#[async_trait]
impl Wallet for RpcWallet {
    fn address(&self) -> Option<Address> {
        Some(self.sender)
    }

    async fn sign_typed_data(&self, hash: B256) -> Result<Signature, ExecutionError> {
        self.signer.sign_hash_sync(&hash).map_err(|e| {
            ExecutionError::FatalError(format!("Failed to sign typed data hash: {e}"))
        })
    }

    async fn send_transaction(&self, tx: &Transaction) -> Result<B256, ExecutionError> {
        let request = TransactionRequest {
            from: Some(self.sender),
            to: Some(TxKind::from(tx.to)),
            value: Some(tx.value),
            input: TransactionInput {
                input: Some(AlloyBytes::from(tx.data.clone())),
                data: None,
            },
            ..Default::default()
        };
        let pending = self
            .client
            .send_transaction(request)
            .await
            .map_err(classify_send_error)?;
        let hash = *pending.tx_hash();
        debug!(%hash, "Transaction accepted by node");
        Ok(hash)
    }

    async fn wait_for_receipt(
        &self,
        hash: B256,
        confirmations: u64,
    ) -> Result<Receipt, ExecutionError> {
        loop {
            let receipt = self
                .client
                .get_transaction_receipt(hash)
                .await
                .map_err(|e| ExecutionError::TransientRpc(format!("{e:?}")))?;
            if let Some(receipt) = receipt {
                let block_number = receipt.block_number.ok_or_else(|| {
                    ExecutionError::FatalError("Receipt is missing a block number".to_string())
                })?;
                if confirmations > 1 {
                    self.wait_for_depth(block_number, confirmations)
                        .await?;
                }
                return Ok(Receipt {
                    transaction_hash: hash,
                    block_number,
                    status: receipt.status(),
                });
            }
            tokio::time::sleep(Duration::from_millis(RECEIPT_POLL_INTERVAL_MS)).await;
        }
    }
}

impl RpcWallet {
    async fn wait_for_depth(
        &self,
        included_at: u64,
        confirmations: u64,
    ) -> Result<(), ExecutionError> {
        loop {
            let latest = self
                .client
                .get_block_number()
                .await
                .map_err(|e| ExecutionError::TransientRpc(format!("{e:?}")))?;
            if latest + 1 >= included_at + confirmations {
                return Ok(());
            }
            tokio::time::sleep(Duration::from_millis(RECEIPT_POLL_INTERVAL_MS)).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejection_classification() {
        use alloy::rpc::json_rpc::ErrorPayload;

        let rejected = RpcError::<TransportErrorKind>::ErrorResp(ErrorPayload {
            code: 4001,
            message: "User rejected the request".into(),
            data: None,
        });
        assert_eq!(classify_send_error(rejected), ExecutionError::WalletRejected);

        let transient = RpcError::<TransportErrorKind>::NullResp;
        assert!(classify_send_error(transient).is_transient());
    }
}
