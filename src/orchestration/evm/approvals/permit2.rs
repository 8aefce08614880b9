use std::sync::{Arc, Mutex};

use alloy_primitives::{
    aliases::{U160, U48},
    Address, B256, U256,
};
use alloy_sol_types::{eip712_domain, sol, SolStruct};
use tracing::debug;

use crate::orchestration::{
    chain_reader::ChainReader,
    errors::ExecutionError,
    evm::{
        constants::{PERMIT2_ADDRESS, PERMIT_EXPIRATION, PERMIT_SIG_EXPIRATION},
        utils::{signing_fingerprint, unix_now},
    },
    models::{Chain, PermitSignature, PermitTokenDetails, SignedPermitBatch, SigningKind, TokenAmount},
    wallet::Wallet,
};

sol! {
    #[derive(Debug)]
    struct PermitDetails {
        address token;
        uint160 amount;
        uint48 expiration;
        uint48 nonce;
    }

    #[derive(Debug)]
    struct PermitBatch {
        PermitDetails[] details;
        address spender;
        uint256 sigDeadline;
    }
}

struct CachedPermit {
    fingerprint: B256,
    signed: SignedPermitBatch,
}

/// Manages the off-chain signature step authorizing a spender to pull one or
/// two tokens through Permit2.
///
/// Results are cached under a fingerprint of the signing inputs (chain,
/// owner, spender, token/amount pairs): a repeated `sign` call with an
/// unchanged fingerprint returns the cached result without prompting the
/// wallet again, and any input change invalidates the cache. The batch
/// payload format is used even for a single token so that calldata building
/// stays uniform downstream.
pub struct Permit2Signer {
    chain: Chain,
    spender: Address,
    pairs: Mutex<Vec<TokenAmount>>,
    reader: Arc<dyn ChainReader>,
    wallet: Arc<dyn Wallet>,
    cache: Mutex<Option<CachedPermit>>,
    last_error: Mutex<Option<ExecutionError>>,
    /// Timestamp source for permit deadlines; injectable so deadlines can be
    /// pinned in deterministic contexts.
    clock: fn() -> u64,
}

impl Permit2Signer {
    pub fn new(
        chain: Chain,
        spender: Address,
        pairs: Vec<TokenAmount>,
        reader: Arc<dyn ChainReader>,
        wallet: Arc<dyn Wallet>,
    ) -> Self {
        Self {
            chain,
            spender,
            pairs: Mutex::new(pairs),
            reader,
            wallet,
            cache: Mutex::new(None),
            last_error: Mutex::new(None),
            clock: unix_now,
        }
    }

    /// Overrides the timestamp source used for permit deadlines.
    pub fn with_clock(mut self, clock: fn() -> u64) -> Self {
        self.clock = clock;
        self
    }

    /// The pairs that actually participate in signing: native tokens and
    /// zero amounts are excluded entirely.
    fn relevant_pairs(&self) -> Vec<TokenAmount> {
        self.pairs
            .lock()
            .expect("signer pairs lock poisoned")
            .iter()
            .filter(|pair| pair.requires_permit())
            .copied()
            .collect()
    }

    pub fn signing_kind(&self) -> SigningKind {
        if self.relevant_pairs().is_empty() {
            SigningKind::None
        } else {
            SigningKind::Batch
        }
    }

    /// Replaces the token/amount pairs. A previously cached signature stays
    /// stored but no longer matches the fingerprint, so the next `sign`
    /// prompts again.
    pub fn update_pairs(&self, pairs: Vec<TokenAmount>) {
        *self.pairs.lock().expect("signer pairs lock poisoned") = pairs;
    }

    fn fingerprint(&self, owner: Address) -> B256 {
        signing_fingerprint(self.chain.id, owner, self.spender, &self.relevant_pairs())
    }

    /// The cached signed batch, if one exists for the current inputs.
    pub fn cached(&self) -> Option<SignedPermitBatch> {
        let owner = self.wallet.address()?;
        let fingerprint = self.fingerprint(owner);
        self.cache
            .lock()
            .expect("signer cache lock poisoned")
            .as_ref()
            .filter(|cached| cached.fingerprint == fingerprint)
            .map(|cached| cached.signed.clone())
    }

    pub fn last_error(&self) -> Option<ExecutionError> {
        self.last_error
            .lock()
            .expect("signer error lock poisoned")
            .clone()
    }

    /// Produces the batched signature for the current inputs, reusing the
    /// cache when the fingerprint is unchanged.
    pub async fn sign(&self) -> Result<PermitSignature, ExecutionError> {
        let result = self.sign_inner().await;
        *self
            .last_error
            .lock()
            .expect("signer error lock poisoned") = result.as_ref().err().cloned();
        result
    }

    async fn sign_inner(&self) -> Result<PermitSignature, ExecutionError> {
        let owner = self
            .wallet
            .address()
            .ok_or(ExecutionError::WalletNotConnected)?;
        let pairs = self.relevant_pairs();
        if pairs.is_empty() {
            return Ok(PermitSignature::None);
        }

        let fingerprint = self.fingerprint(owner);
        if let Some(signed) = self.cached() {
            debug!(%fingerprint, "Reusing cached permit signature");
            return Ok(PermitSignature::Batch(signed));
        }

        let now = (self.clock)();
        let expiration = now + PERMIT_EXPIRATION;
        let sig_deadline = U256::from(now + PERMIT_SIG_EXPIRATION);

        let mut details = Vec::with_capacity(pairs.len());
        for pair in &pairs {
            let allowance = self
                .reader
                .permit_allowance(owner, pair.token, self.spender)
                .await?;
            details.push(PermitTokenDetails {
                token: pair.token,
                amount: pair.amount,
                expiration,
                nonce: allowance.nonce,
            });
        }

        let batch = to_sol_batch(&details, self.spender, sig_deadline);
        let domain = eip712_domain! {
            name: "Permit2",
            chain_id: self.chain.id,
            verifying_contract: PERMIT2_ADDRESS,
        };
        let hash = batch.eip712_signing_hash(&domain);
        let signature = self.wallet.sign_typed_data(hash).await?;
        debug!(%fingerprint, tokens = details.len(), "Permit batch signed");

        let signed = SignedPermitBatch { details, spender: self.spender, sig_deadline, signature };
        *self.cache.lock().expect("signer cache lock poisoned") =
            Some(CachedPermit { fingerprint, signed: signed.clone() });
        Ok(PermitSignature::Batch(signed))
    }

    /// Clears the cache and any stored signature error, independent of the
    /// current fingerprint.
    pub fn reset(&self) {
        *self.cache.lock().expect("signer cache lock poisoned") = None;
        *self
            .last_error
            .lock()
            .expect("signer error lock poisoned") = None;
    }
}

fn to_sol_batch(
    details: &[PermitTokenDetails],
    spender: Address,
    sig_deadline: U256,
) -> PermitBatch {
    PermitBatch {
        details: details
            .iter()
            .map(|entry| PermitDetails {
                token: entry.token,
                amount: U160::from(entry.amount),
                expiration: U48::from(entry.expiration),
                nonce: U48::from(entry.nonce),
            })
            .collect(),
        spender,
        sigDeadline: sig_deadline,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use super::*;
    use crate::orchestration::evm::testing::{addr, MockReader, MockWallet};

    fn fixed_clock() -> u64 {
        1_700_000_000
    }

    fn signer_with(
        pairs: Vec<TokenAmount>,
        reader: Arc<MockReader>,
        wallet: Arc<MockWallet>,
    ) -> Permit2Signer {
        Permit2Signer::new(Chain::ethereum(), addr(0x55), pairs, reader, wallet)
            .with_clock(fixed_clock)
    }

    fn erc20_pair() -> TokenAmount {
        TokenAmount::new(addr(0x10), U256::from(1000u64))
    }

    #[test]
    fn test_signing_kind_excludes_native_and_zero() {
        let reader = Arc::new(MockReader::new());
        let wallet = Arc::new(MockWallet::new());

        let none = signer_with(
            vec![
                TokenAmount::new(crate::orchestration::models::NATIVE_TOKEN, U256::from(5u64)),
                TokenAmount::new(addr(0x10), U256::ZERO),
            ],
            reader.clone(),
            wallet.clone(),
        );
        assert_eq!(none.signing_kind(), SigningKind::None);

        let batch = signer_with(vec![erc20_pair()], reader, wallet);
        assert_eq!(batch.signing_kind(), SigningKind::Batch);
    }

    #[tokio::test]
    async fn test_sign_with_no_relevant_tokens_skips_wallet() {
        let wallet = Arc::new(MockWallet::new());
        let signer = signer_with(
            vec![TokenAmount::new(
                crate::orchestration::models::NATIVE_TOKEN,
                U256::from(5u64),
            )],
            Arc::new(MockReader::new()),
            wallet.clone(),
        );

        assert_eq!(signer.sign().await.unwrap(), PermitSignature::None);
        assert_eq!(wallet.sign_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_sign_is_idempotent_for_unchanged_fingerprint() {
        let reader = Arc::new(MockReader::new());
        let wallet = Arc::new(MockWallet::new());
        let signer = signer_with(vec![erc20_pair()], reader.clone(), wallet.clone());

        let first = signer.sign().await.unwrap();
        let second = signer.sign().await.unwrap();

        assert_eq!(first, second);
        // One wallet prompt, one nonce read.
        assert_eq!(wallet.sign_calls.load(Ordering::SeqCst), 1);
        assert_eq!(reader.permit_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_amount_change_invalidates_cache() {
        let reader = Arc::new(MockReader::new());
        let wallet = Arc::new(MockWallet::new());
        let signer = signer_with(vec![erc20_pair()], reader, wallet.clone());

        let first = signer.sign().await.unwrap();
        signer.update_pairs(vec![TokenAmount::new(addr(0x10), U256::from(2000u64))]);
        assert_eq!(signer.cached(), None);

        let second = signer.sign().await.unwrap();
        assert_ne!(first, second);
        assert_eq!(wallet.sign_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_sign_requires_connected_wallet() {
        let signer = signer_with(
            vec![erc20_pair()],
            Arc::new(MockReader::new()),
            Arc::new(MockWallet::disconnected()),
        );
        assert_eq!(signer.sign().await, Err(ExecutionError::WalletNotConnected));
    }

    #[tokio::test]
    async fn test_rejection_is_stored_and_cleared_by_reset() {
        let reader = Arc::new(MockReader::new());
        let wallet = Arc::new(MockWallet { reject_signing: true, ..MockWallet::new() });
        let signer = signer_with(vec![erc20_pair()], reader, wallet);

        assert_eq!(signer.sign().await, Err(ExecutionError::WalletRejected));
        assert_eq!(signer.last_error(), Some(ExecutionError::WalletRejected));

        signer.reset();
        assert_eq!(signer.last_error(), None);
    }

    #[tokio::test]
    async fn test_reset_forces_a_new_prompt() {
        let reader = Arc::new(MockReader::new());
        let wallet = Arc::new(MockWallet::new());
        let signer = signer_with(vec![erc20_pair()], reader, wallet.clone());

        signer.sign().await.unwrap();
        signer.reset();
        assert_eq!(signer.cached(), None);
        signer.sign().await.unwrap();
        assert_eq!(wallet.sign_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_deadlines_derive_from_clock() {
        let reader = Arc::new(MockReader::new());
        let signer = signer_with(vec![erc20_pair()], reader, Arc::new(MockWallet::new()));

        let signed = match signer.sign().await.unwrap() {
            PermitSignature::Batch(signed) => signed,
            PermitSignature::None => panic!("expected a batch signature"),
        };
        assert_eq!(signed.details.len(), 1);
        assert_eq!(signed.details[0].expiration, fixed_clock() + PERMIT_EXPIRATION);
        assert_eq!(
            signed.sig_deadline,
            U256::from(fixed_clock() + PERMIT_SIG_EXPIRATION)
        );
    }
}
