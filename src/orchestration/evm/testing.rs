//! Scripted mock collaborators for pipeline tests.
//!
//! Each mock counts its calls so tests can assert prompt/read behavior
//! (signature idempotence, retry counts, refetch-after-approval) without a
//! chain or a wallet.

use std::{
    collections::{HashMap, VecDeque},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
};

use alloy_primitives::{Address, Keccak256, PrimitiveSignature as Signature, B256, U256};
use async_trait::async_trait;
use tokio::sync::Notify;

use crate::orchestration::{
    calldata_builder::CalldataBuilder,
    chain_reader::ChainReader,
    errors::ExecutionError,
    models::{
        PermitAllowance, PoolKey, PoolState, Receipt, SignedPermitBatch, TokenMetadata,
        Transaction, NATIVE_TOKEN,
    },
    wallet::Wallet,
};

pub(crate) fn addr(byte: u8) -> Address {
    Address::repeat_byte(byte)
}

pub(crate) struct MockWallet {
    pub address: Option<Address>,
    pub reject_signing: bool,
    pub sign_calls: AtomicUsize,
    pub sent: Mutex<Vec<Transaction>>,
    pub receipt_calls: AtomicUsize,
    /// Status reported by every receipt; false simulates a revert.
    pub receipt_status: Mutex<bool>,
    /// When set, the next `wait_for_receipt` call blocks until notified.
    pub receipt_gate: Mutex<Option<Arc<Notify>>>,
}

impl MockWallet {
    pub fn new() -> Self {
        Self {
            address: Some(addr(0xaa)),
            reject_signing: false,
            sign_calls: AtomicUsize::new(0),
            sent: Mutex::new(Vec::new()),
            receipt_calls: AtomicUsize::new(0),
            receipt_status: Mutex::new(true),
            receipt_gate: Mutex::new(None),
        }
    }

    pub fn disconnected() -> Self {
        Self { address: None, ..Self::new() }
    }

    pub fn sent_calldata(&self) -> Vec<Vec<u8>> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .map(|tx| tx.data.clone())
            .collect()
    }
}

#[async_trait]
impl Wallet for MockWallet {
    fn address(&self) -> Option<Address> {
        self.address
    }

    async fn sign_typed_data(&self, hash: B256) -> Result<Signature, ExecutionError> {
        if self.reject_signing {
            return Err(ExecutionError::WalletRejected);
        }
        self.sign_calls.fetch_add(1, Ordering::SeqCst);
        // Deterministic signature derived from the signing hash.
        let r = U256::from_be_bytes(hash.0);
        Ok(Signature::new(r, U256::from(7u64), false))
    }

    async fn send_transaction(&self, tx: &Transaction) -> Result<B256, ExecutionError> {
        let mut sent = self.sent.lock().unwrap();
        let mut hasher = Keccak256::new();
        hasher.update((sent.len() as u64).to_be_bytes());
        hasher.update(&tx.data);
        sent.push(tx.clone());
        Ok(hasher.finalize())
    }

    async fn wait_for_receipt(
        &self,
        hash: B256,
        _confirmations: u64,
    ) -> Result<Receipt, ExecutionError> {
        let gate = self.receipt_gate.lock().unwrap().take();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        self.receipt_calls.fetch_add(1, Ordering::SeqCst);
        let status = *self.receipt_status.lock().unwrap();
        Ok(Receipt { transaction_hash: hash, block_number: 1, status })
    }
}

pub(crate) struct MockReader {
    /// Scripted allowance responses per token; the last entry repeats.
    pub allowances: Mutex<HashMap<Address, VecDeque<U256>>>,
    pub allowance_calls: AtomicUsize,
    pub permit_nonces: Mutex<HashMap<Address, u64>>,
    pub permit_calls: AtomicUsize,
    /// Balances per token; tokens without an entry report an ample balance.
    pub balances: Mutex<HashMap<Address, U256>>,
    pub metadata_calls: AtomicUsize,
    /// Scripted quote responses; the last entry repeats. Unscripted quotes
    /// echo the input amount.
    pub quotes: Mutex<VecDeque<Result<U256, ExecutionError>>>,
    pub quote_calls: AtomicUsize,
}

impl MockReader {
    pub fn new() -> Self {
        Self {
            allowances: Mutex::new(HashMap::new()),
            allowance_calls: AtomicUsize::new(0),
            permit_nonces: Mutex::new(HashMap::new()),
            permit_calls: AtomicUsize::new(0),
            balances: Mutex::new(HashMap::new()),
            metadata_calls: AtomicUsize::new(0),
            quotes: Mutex::new(VecDeque::new()),
            quote_calls: AtomicUsize::new(0),
        }
    }

    pub fn script_allowances(&self, token: Address, values: &[U256]) {
        self.allowances
            .lock()
            .unwrap()
            .insert(token, values.iter().copied().collect());
    }

    pub fn set_balance(&self, token: Address, amount: U256) {
        self.balances.lock().unwrap().insert(token, amount);
    }

    pub fn script_quotes(&self, responses: Vec<Result<U256, ExecutionError>>) {
        *self.quotes.lock().unwrap() = responses.into_iter().collect();
    }
}

#[async_trait]
impl ChainReader for MockReader {
    async fn allowance(
        &self,
        _owner: Address,
        token: Address,
        _spender: Address,
    ) -> Result<U256, ExecutionError> {
        self.allowance_calls.fetch_add(1, Ordering::SeqCst);
        let mut allowances = self.allowances.lock().unwrap();
        match allowances.get_mut(&token) {
            Some(scripted) if scripted.len() > 1 => Ok(scripted.pop_front().unwrap()),
            Some(scripted) => Ok(scripted.front().copied().unwrap_or(U256::ZERO)),
            None => Ok(U256::ZERO),
        }
    }

    async fn permit_allowance(
        &self,
        _owner: Address,
        token: Address,
        _spender: Address,
    ) -> Result<PermitAllowance, ExecutionError> {
        self.permit_calls.fetch_add(1, Ordering::SeqCst);
        let nonce = self
            .permit_nonces
            .lock()
            .unwrap()
            .get(&token)
            .copied()
            .unwrap_or(0);
        Ok(PermitAllowance { amount: U256::ZERO, expiration: 0, nonce })
    }

    async fn balance(&self, _owner: Address, token: Address) -> Result<U256, ExecutionError> {
        Ok(self
            .balances
            .lock()
            .unwrap()
            .get(&token)
            .copied()
            .unwrap_or(U256::MAX))
    }

    async fn token_metadata(&self, token: Address) -> Result<TokenMetadata, ExecutionError> {
        self.metadata_calls.fetch_add(1, Ordering::SeqCst);
        let symbol = if token == NATIVE_TOKEN { "ETH" } else { "MOCK" };
        Ok(TokenMetadata { symbol: symbol.to_string(), decimals: 18 })
    }

    async fn quote_exact_input(
        &self,
        _pool: &PoolKey,
        amount_in: U256,
        _zero_for_one: bool,
    ) -> Result<U256, ExecutionError> {
        self.quote_calls.fetch_add(1, Ordering::SeqCst);
        let mut quotes = self.quotes.lock().unwrap();
        match quotes.len() {
            0 => Ok(amount_in),
            1 => quotes.front().cloned().unwrap(),
            _ => quotes.pop_front().unwrap(),
        }
    }

    async fn pool_state(&self, _pool: &PoolKey) -> Result<PoolState, ExecutionError> {
        Ok(PoolState {
            sqrt_price_x96: U256::from(1u128) << 96,
            tick: 0,
            liquidity: 1_000_000,
        })
    }
}

/// Builds deterministic calldata embedding the args and any permit payload,
/// so tests can compare manual and automated execution byte for byte.
pub(crate) struct RecordingBuilder {
    pub to: Address,
}

impl RecordingBuilder {
    pub fn new() -> Self {
        Self { to: addr(0xee) }
    }
}

impl CalldataBuilder for RecordingBuilder {
    type Args = Vec<u8>;

    fn build_calldata(
        &self,
        signature: Option<&SignedPermitBatch>,
        args: &Self::Args,
    ) -> Result<Transaction, ExecutionError> {
        let mut data = vec![0xfa, 0xce];
        data.extend_from_slice(args);
        if let Some(batch) = signature {
            for details in &batch.details {
                data.extend_from_slice(details.token.as_slice());
                data.extend_from_slice(&details.amount.to_be_bytes::<32>());
            }
            data.extend_from_slice(&batch.signature.as_bytes());
        }
        Ok(Transaction { to: self.to, value: U256::ZERO, data })
    }
}
