use std::sync::{Arc, Mutex};

use alloy_primitives::{Address, B256, U256};
use alloy_sol_types::SolValue;
use tracing::debug;

use crate::orchestration::{
    chain_reader::ChainReader,
    errors::ExecutionError,
    evm::{constants::MAX_ALLOWANCE, tracker::TransactionTracker, utils::encode_input},
    models::{Receipt, Requirement, Transaction, TxStatus, NATIVE_TOKEN},
    wallet::Wallet,
};

/// Decides whether a spender's allowance for one token covers a required
/// amount, and issues the approval transaction when it does not.
///
/// The answer is tri-state: until the allowance read resolves it is
/// [`Requirement::Unknown`], which callers must treat as "don't know yet",
/// never as "not required". The native asset short-circuits to
/// `NotRequired` without any read.
pub struct TokenApprovalManager {
    token: Address,
    spender: Address,
    required_amount: Mutex<U256>,
    /// Last observed allowance; `None` until the first read resolves.
    allowance: Mutex<Option<U256>>,
    reader: Arc<dyn ChainReader>,
    wallet: Arc<dyn Wallet>,
    tracker: TransactionTracker,
}

impl TokenApprovalManager {
    pub fn new(
        token: Address,
        spender: Address,
        required_amount: U256,
        reader: Arc<dyn ChainReader>,
        wallet: Arc<dyn Wallet>,
        confirmations: u64,
    ) -> Self {
        Self {
            token,
            spender,
            required_amount: Mutex::new(required_amount),
            allowance: Mutex::new(None),
            reader,
            wallet: wallet.clone(),
            tracker: TransactionTracker::new(wallet, confirmations),
        }
    }

    pub fn token(&self) -> Address {
        self.token
    }

    pub fn is_native(&self) -> bool {
        self.token == NATIVE_TOKEN
    }

    pub fn status(&self) -> TxStatus {
        self.tracker.status()
    }

    pub fn tracker(&self) -> &TransactionTracker {
        &self.tracker
    }

    /// Re-targets the checker at a new required amount. The stored allowance
    /// read stays valid; only the comparison changes.
    pub fn set_required_amount(&self, amount: U256) {
        *self
            .required_amount
            .lock()
            .expect("required amount lock poisoned") = amount;
    }

    /// Whether an approval transaction is needed, derived from the current
    /// allowance read and required amount.
    pub fn requirement(&self) -> Requirement {
        if self.is_native() {
            return Requirement::NotRequired;
        }
        let required = *self
            .required_amount
            .lock()
            .expect("required amount lock poisoned");
        if required.is_zero() {
            return Requirement::NotRequired;
        }
        match *self.allowance.lock().expect("allowance lock poisoned") {
            None => Requirement::Unknown,
            Some(allowance) if allowance < required => Requirement::Required,
            Some(_) => Requirement::NotRequired,
        }
    }

    /// Reads the current allowance for (owner, token, spender). A no-op for
    /// the native asset.
    pub async fn refresh_allowance(&self) -> Result<(), ExecutionError> {
        if self.is_native() {
            return Ok(());
        }
        let owner = self
            .wallet
            .address()
            .ok_or(ExecutionError::WalletNotConnected)?;
        let current = self
            .reader
            .allowance(owner, self.token, self.spender)
            .await?;
        debug!(token = %self.token, spender = %self.spender, allowance = %current, "Allowance read");
        *self.allowance.lock().expect("allowance lock poisoned") = Some(current);
        Ok(())
    }

    /// Issues the approval transaction. Defaults to an unlimited approval
    /// when no amount is given.
    pub async fn approve(&self, amount: Option<U256>) -> Result<B256, ExecutionError> {
        if self.is_native() {
            return Err(ExecutionError::NativeTokenNotApprovable);
        }
        if self.wallet.address().is_none() {
            return Err(ExecutionError::WalletNotConnected);
        }
        let amount = amount.unwrap_or(MAX_ALLOWANCE);
        let args = (self.spender, amount);
        let data = encode_input("approve(address,uint256)", args.abi_encode());
        let tx = Transaction { to: self.token, value: U256::ZERO, data };
        self.tracker.send(&tx).await
    }

    /// Waits for the in-flight approval to confirm, then refetches the
    /// allowance so [`Self::requirement`] flips without a manual poll.
    pub async fn wait_for_confirmation(&self) -> Result<Receipt, ExecutionError> {
        let receipt = self.tracker.wait_for_confirmation().await?;
        self.refresh_allowance().await?;
        Ok(receipt)
    }

    /// Clears the allowance read and the embedded tracker.
    pub fn reset(&self) {
        self.tracker.reset();
        *self.allowance.lock().expect("allowance lock poisoned") = None;
    }
}
