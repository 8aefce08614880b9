use std::sync::{Arc, Mutex};

use alloy_primitives::B256;
use tracing::debug;

use crate::orchestration::{
    errors::ExecutionError,
    models::{Receipt, Transaction, TxStatus},
    wallet::Wallet,
};

type SuccessCallback = Box<dyn Fn(&Receipt) + Send + Sync>;

/// Tracks one transaction's send -> broadcast -> confirm lifecycle.
///
/// A tracker owns exactly one transaction at a time. `send` resolves once
/// the transaction is broadcast; `wait_for_confirmation` resolves once it is
/// included (idempotently after the first observation). The derived status
/// follows a fixed precedence: error > confirmed > confirming > pending >
/// idle.
///
/// `reset` bumps an internal generation counter. Any wait that was started
/// before the reset observes the mismatch when it wakes, performs no state
/// mutation, and fails with `NoTransactionInFlight` — state the tracker no
/// longer owns is never written.
pub struct TransactionTracker {
    wallet: Arc<dyn Wallet>,
    confirmations: u64,
    on_success: Option<SuccessCallback>,
    state: Mutex<TrackerState>,
}

#[derive(Default)]
struct TrackerState {
    generation: u64,
    broadcasting: bool,
    hash: Option<B256>,
    receipt: Option<Receipt>,
    error: Option<ExecutionError>,
    success_notified: bool,
}

impl TransactionTracker {
    pub fn new(wallet: Arc<dyn Wallet>, confirmations: u64) -> Self {
        Self { wallet, confirmations, on_success: None, state: Mutex::new(TrackerState::default()) }
    }

    /// Registers a callback invoked exactly once per confirmed transaction.
    pub fn with_on_success(mut self, callback: SuccessCallback) -> Self {
        self.on_success = Some(callback);
        self
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, TrackerState> {
        self.state
            .lock()
            .expect("tracker state lock poisoned")
    }

    pub fn status(&self) -> TxStatus {
        let state = self.lock();
        if state.error.is_some() {
            TxStatus::Error
        } else if state.receipt.is_some() {
            TxStatus::Confirmed
        } else if state.hash.is_some() {
            TxStatus::Confirming
        } else if state.broadcasting {
            TxStatus::Pending
        } else {
            TxStatus::Idle
        }
    }

    pub fn hash(&self) -> Option<B256> {
        self.lock().hash
    }

    pub fn error(&self) -> Option<ExecutionError> {
        self.lock().error.clone()
    }

    /// Broadcasts `tx` and resolves with its hash. Confirmation is awaited
    /// separately via [`Self::wait_for_confirmation`].
    pub async fn send(&self, tx: &Transaction) -> Result<B256, ExecutionError> {
        let generation = {
            let mut state = self.lock();
            if state.broadcasting || state.receipt.is_some() ||
                (state.hash.is_some() && state.error.is_none())
            {
                return Err(ExecutionError::ExecutionInProgress);
            }
            // A resend after an error starts the lifecycle over.
            state.error = None;
            state.hash = None;
            state.broadcasting = true;
            state.generation
        };

        let result = self.wallet.send_transaction(tx).await;

        let mut state = self.lock();
        if state.generation != generation {
            // Reset happened mid-broadcast; the outcome belongs to the
            // caller but not to the tracker's current lifecycle.
            return result;
        }
        state.broadcasting = false;
        match result {
            Ok(hash) => {
                debug!(%hash, to = %tx.to, "Transaction broadcast");
                state.hash = Some(hash);
                Ok(hash)
            }
            Err(err) => {
                state.error = Some(err.clone());
                Err(err)
            }
        }
    }

    /// Resolves with the receipt once the tracked transaction is included,
    /// or fails if it errors instead.
    ///
    /// Idempotent after a confirmation has been observed. Fails with
    /// `NoTransactionInFlight` when nothing was sent, or when a reset
    /// invalidated the wait while it was suspended.
    pub async fn wait_for_confirmation(&self) -> Result<Receipt, ExecutionError> {
        let (hash, generation) = {
            let state = self.lock();
            if let Some(err) = &state.error {
                return Err(err.clone());
            }
            if let Some(receipt) = &state.receipt {
                return Ok(receipt.clone());
            }
            match state.hash {
                Some(hash) => (hash, state.generation),
                None => return Err(ExecutionError::NoTransactionInFlight),
            }
        };

        let result = self
            .wallet
            .wait_for_receipt(hash, self.confirmations)
            .await;

        let mut state = self.lock();
        if state.generation != generation {
            return Err(ExecutionError::NoTransactionInFlight);
        }
        match result {
            Ok(receipt) if receipt.status => {
                debug!(%hash, block = receipt.block_number, "Transaction confirmed");
                state.receipt = Some(receipt.clone());
                let notify = !state.success_notified;
                state.success_notified = true;
                drop(state);
                if notify {
                    if let Some(callback) = &self.on_success {
                        callback(&receipt);
                    }
                }
                Ok(receipt)
            }
            Ok(_) => {
                let err = ExecutionError::TransactionReverted(format!("{hash}"));
                state.error = Some(err.clone());
                Err(err)
            }
            Err(err) => {
                state.error = Some(err.clone());
                Err(err)
            }
        }
    }

    /// Returns the tracker to idle and invalidates any outstanding wait.
    pub fn reset(&self) {
        let mut state = self.lock();
        state.generation += 1;
        state.broadcasting = false;
        state.hash = None;
        state.receipt = None;
        state.error = None;
        state.success_notified = false;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };

    use alloy_primitives::U256;
    use tokio::sync::Notify;

    use super::*;
    use crate::orchestration::evm::testing::{addr, MockWallet};

    fn transfer_tx() -> Transaction {
        Transaction { to: addr(0x01), value: U256::ZERO, data: vec![0x01, 0x02] }
    }

    #[tokio::test]
    async fn test_lifecycle_idle_to_confirmed() {
        let wallet = Arc::new(MockWallet::new());
        let tracker = TransactionTracker::new(wallet.clone(), 1);
        assert_eq!(tracker.status(), TxStatus::Idle);

        let hash = tracker.send(&transfer_tx()).await.unwrap();
        assert_eq!(tracker.status(), TxStatus::Confirming);
        assert_eq!(tracker.hash(), Some(hash));

        let receipt = tracker.wait_for_confirmation().await.unwrap();
        assert_eq!(receipt.transaction_hash, hash);
        assert_eq!(tracker.status(), TxStatus::Confirmed);
    }

    #[tokio::test]
    async fn test_wait_without_transaction_fails() {
        let tracker = TransactionTracker::new(Arc::new(MockWallet::new()), 1);
        assert_eq!(
            tracker.wait_for_confirmation().await,
            Err(ExecutionError::NoTransactionInFlight)
        );
    }

    #[tokio::test]
    async fn test_wait_is_idempotent_after_confirmation() {
        let wallet = Arc::new(MockWallet::new());
        let tracker = TransactionTracker::new(wallet.clone(), 1);
        tracker.send(&transfer_tx()).await.unwrap();

        let first = tracker.wait_for_confirmation().await.unwrap();
        let second = tracker.wait_for_confirmation().await.unwrap();
        assert_eq!(first, second);
        // The second wait resolved from the stored receipt.
        assert_eq!(wallet.receipt_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_on_success_fires_exactly_once() {
        let wallet = Arc::new(MockWallet::new());
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = fired.clone();
        let tracker = TransactionTracker::new(wallet, 1).with_on_success(Box::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        tracker.send(&transfer_tx()).await.unwrap();
        tracker.wait_for_confirmation().await.unwrap();
        tracker.wait_for_confirmation().await.unwrap();
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_reverted_receipt_surfaces_as_error() {
        let wallet = Arc::new(MockWallet::new());
        *wallet.receipt_status.lock().unwrap() = false;
        let tracker = TransactionTracker::new(wallet, 1);

        tracker.send(&transfer_tx()).await.unwrap();
        let result = tracker.wait_for_confirmation().await;
        assert!(matches!(result, Err(ExecutionError::TransactionReverted(_))));
        assert_eq!(tracker.status(), TxStatus::Error);
    }

    #[tokio::test]
    async fn test_double_send_rejected_while_in_flight() {
        let wallet = Arc::new(MockWallet::new());
        let tracker = TransactionTracker::new(wallet, 1);
        tracker.send(&transfer_tx()).await.unwrap();
        assert_eq!(
            tracker.send(&transfer_tx()).await,
            Err(ExecutionError::ExecutionInProgress)
        );
    }

    #[tokio::test]
    async fn test_reset_invalidates_suspended_wait() {
        let wallet = Arc::new(MockWallet::new());
        let gate = Arc::new(Notify::new());
        *wallet.receipt_gate.lock().unwrap() = Some(gate.clone());
        let tracker = Arc::new(TransactionTracker::new(wallet, 1));

        tracker.send(&transfer_tx()).await.unwrap();
        let waiter = {
            let tracker = tracker.clone();
            tokio::spawn(async move { tracker.wait_for_confirmation().await })
        };
        // Let the waiter reach the receipt gate, then pull the rug.
        tokio::task::yield_now().await;
        tracker.reset();
        gate.notify_one();

        let result = waiter.await.unwrap();
        assert_eq!(result, Err(ExecutionError::NoTransactionInFlight));
        // The abandoned wait wrote nothing into the reset tracker.
        assert_eq!(tracker.status(), TxStatus::Idle);
        assert_eq!(tracker.hash(), None);
    }

    #[tokio::test]
    async fn test_reset_allows_fresh_lifecycle() {
        let wallet = Arc::new(MockWallet::new());
        let tracker = TransactionTracker::new(wallet, 1);
        tracker.send(&transfer_tx()).await.unwrap();
        tracker.wait_for_confirmation().await.unwrap();

        tracker.reset();
        assert_eq!(tracker.status(), TxStatus::Idle);
        tracker.send(&transfer_tx()).await.unwrap();
        assert_eq!(tracker.status(), TxStatus::Confirming);
    }
}
