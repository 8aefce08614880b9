use std::sync::atomic::{AtomicBool, Ordering};

use alloy_primitives::B256;
use tracing::{debug, info};

use crate::orchestration::{
    calldata_builder::CalldataBuilder,
    errors::ExecutionError,
    evm::{
        approvals::{allowance::TokenApprovalManager, permit2::Permit2Signer},
        pipeline::steps::{derive_step, SigningState},
        tracker::TransactionTracker,
    },
    models::{PipelineStep, Requirement, SigningKind},
};

/// Composes approval checkers, the permit signer and the execute tracker
/// into one pipeline.
///
/// Swap pipelines carry one approval slot, liquidity-provision pipelines
/// two, burn-style operations none. The pipeline exposes both manual
/// per-step control (each approval's `approve`, the signer's `sign`, the
/// final `execute`) and [`Self::execute_all`], which is exactly that
/// sequence automated — the two paths are observably equivalent for
/// identical inputs.
pub struct StepPipeline<B: CalldataBuilder> {
    approvals: Vec<TokenApprovalManager>,
    signer: Permit2Signer,
    execute: TransactionTracker,
    builder: B,
    executing: AtomicBool,
}

impl<B: CalldataBuilder> StepPipeline<B> {
    pub fn new(
        approvals: Vec<TokenApprovalManager>,
        signer: Permit2Signer,
        execute: TransactionTracker,
        builder: B,
    ) -> Result<Self, ExecutionError> {
        if approvals.len() > 2 {
            return Err(ExecutionError::InvalidInput(format!(
                "Pipelines support at most two approval slots, got {}",
                approvals.len()
            )));
        }
        Ok(Self { approvals, signer, execute, builder, executing: AtomicBool::new(false) })
    }

    pub fn approvals(&self) -> &[TokenApprovalManager] {
        &self.approvals
    }

    pub fn signer(&self) -> &Permit2Signer {
        &self.signer
    }

    pub fn execute_tracker(&self) -> &TransactionTracker {
        &self.execute
    }

    /// The first unmet requirement, derived on demand from the component
    /// states.
    pub fn current_step(&self) -> PipelineStep {
        let requirements: Vec<Requirement> = self
            .approvals
            .iter()
            .map(|approval| approval.requirement())
            .collect();
        let signing = SigningState {
            required: self.signer.signing_kind() == SigningKind::Batch,
            cached: self.signer.cached().is_some(),
        };
        derive_step(&requirements, signing, self.execute.status())
    }

    /// Loads the allowance for every approval slot. Without a connected
    /// account the slots stay [`Requirement::Unknown`].
    pub async fn refresh(&self) -> Result<(), ExecutionError> {
        for approval in &self.approvals {
            approval.refresh_allowance().await?;
        }
        Ok(())
    }

    /// The final step: builds calldata (passing the cached batch signature,
    /// or nothing when the signing kind is `None`) and broadcasts the
    /// execute transaction.
    ///
    /// Fails with [`ExecutionError::PermitRequired`] if a required signature
    /// has not been produced yet — a sequencing error, not a user error.
    pub async fn execute(&self, args: &B::Args) -> Result<B256, ExecutionError> {
        let signature = match self.signer.signing_kind() {
            SigningKind::Batch => {
                Some(self.signer.cached().ok_or(ExecutionError::PermitRequired)?)
            }
            SigningKind::None => None,
        };
        let tx = self.builder.build_calldata(signature.as_ref(), args)?;
        self.execute.send(&tx).await
    }

    /// Runs every remaining step in order: each required approval is issued
    /// and awaited before the next, then the batch signature is produced
    /// (reusing the cache when valid), then the execute transaction is
    /// broadcast. Resolves with the execute hash at broadcast time — callers
    /// that need inclusion wait on [`Self::execute_tracker`] explicitly.
    ///
    /// Non-reentrant: a second call while one is still awaiting a step fails
    /// with [`ExecutionError::ExecutionInProgress`].
    pub async fn execute_all(&self, args: &B::Args) -> Result<B256, ExecutionError> {
        if self.executing.swap(true, Ordering::SeqCst) {
            return Err(ExecutionError::ExecutionInProgress);
        }
        let result = self.execute_all_inner(args).await;
        self.executing.store(false, Ordering::SeqCst);
        result
    }

    async fn execute_all_inner(&self, args: &B::Args) -> Result<B256, ExecutionError> {
        // Refuse to guess: every slot's requirement must be known up front.
        for approval in &self.approvals {
            if approval.requirement() == Requirement::Unknown {
                return Err(ExecutionError::AwaitingApprovalStatus(
                    approval.token().to_string(),
                ));
            }
        }

        for approval in &self.approvals {
            if approval.requirement() == Requirement::Required {
                debug!(token = %approval.token(), "Issuing approval");
                approval.approve(None).await?;
                approval.wait_for_confirmation().await?;
            }
        }

        if self.signer.signing_kind() == SigningKind::Batch {
            self.signer.sign().await?;
        }

        let hash = self.execute(args).await?;
        info!(%hash, "Execute transaction broadcast");
        Ok(hash)
    }

    /// Resets every owned tracker and the signature cache. Data owned by
    /// adapters (quotes, pool state) is untouched.
    pub fn reset(&self) {
        for approval in &self.approvals {
            approval.reset();
        }
        self.signer.reset();
        self.execute.reset();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{atomic::Ordering as AtomicOrdering, Arc};

    use alloy_primitives::{Address, U256};
    use tokio::sync::Notify;

    use super::*;
    use crate::orchestration::{
        evm::{
            constants::MAX_ALLOWANCE,
            testing::{addr, MockReader, MockWallet, RecordingBuilder},
        },
        models::{Chain, TokenAmount, TxStatus, NATIVE_TOKEN},
    };

    fn fixed_clock() -> u64 {
        1_700_000_000
    }

    fn build_pipeline(
        tokens: &[(Address, u64)],
        reader: &Arc<MockReader>,
        wallet: &Arc<MockWallet>,
    ) -> StepPipeline<RecordingBuilder> {
        let spender = addr(0x55);
        let approvals = tokens
            .iter()
            .map(|(token, amount)| {
                TokenApprovalManager::new(
                    *token,
                    spender,
                    U256::from(*amount),
                    reader.clone(),
                    wallet.clone(),
                    1,
                )
            })
            .collect();
        let pairs = tokens
            .iter()
            .map(|(token, amount)| TokenAmount::new(*token, U256::from(*amount)))
            .collect();
        let signer = Permit2Signer::new(
            Chain::ethereum(),
            spender,
            pairs,
            reader.clone(),
            wallet.clone(),
        )
        .with_clock(fixed_clock);
        let execute = TransactionTracker::new(wallet.clone(), 1);
        StepPipeline::new(approvals, signer, execute, RecordingBuilder::new()).unwrap()
    }

    fn erc20() -> (Address, u64) {
        (addr(0x10), 1000)
    }

    #[tokio::test]
    async fn test_step_progression_through_full_flow() {
        let reader = Arc::new(MockReader::new());
        reader.script_allowances(erc20().0, &[U256::ZERO, MAX_ALLOWANCE]);
        let wallet = Arc::new(MockWallet::new());
        let pipeline = build_pipeline(&[erc20()], &reader, &wallet);

        // Allowance not read yet: don't know, so hold at the approval slot.
        assert_eq!(pipeline.current_step(), PipelineStep::Approval0);

        pipeline.refresh().await.unwrap();
        assert_eq!(pipeline.current_step(), PipelineStep::Approval0);

        pipeline.approvals()[0].approve(None).await.unwrap();
        pipeline.approvals()[0]
            .wait_for_confirmation()
            .await
            .unwrap();
        assert_eq!(pipeline.current_step(), PipelineStep::Permit);

        pipeline.signer().sign().await.unwrap();
        assert_eq!(pipeline.current_step(), PipelineStep::Execute);

        pipeline.execute(&vec![0x01]).await.unwrap();
        // Broadcast but not yet included: still the execute step.
        assert_eq!(pipeline.current_step(), PipelineStep::Execute);

        pipeline
            .execute_tracker()
            .wait_for_confirmation()
            .await
            .unwrap();
        assert_eq!(pipeline.current_step(), PipelineStep::Completed);
    }

    #[tokio::test]
    async fn test_execute_all_refuses_unknown_requirement() {
        let reader = Arc::new(MockReader::new());
        let wallet = Arc::new(MockWallet::new());
        let pipeline = build_pipeline(&[erc20()], &reader, &wallet);

        let result = pipeline.execute_all(&vec![]).await;
        assert!(matches!(result, Err(ExecutionError::AwaitingApprovalStatus(_))));
        // Nothing was sent or signed.
        assert!(wallet.sent.lock().unwrap().is_empty());
        assert_eq!(wallet.sign_calls.load(AtomicOrdering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_execute_all_runs_every_required_step() {
        let reader = Arc::new(MockReader::new());
        reader.script_allowances(erc20().0, &[U256::ZERO, MAX_ALLOWANCE]);
        let wallet = Arc::new(MockWallet::new());
        let pipeline = build_pipeline(&[erc20()], &reader, &wallet);

        pipeline.refresh().await.unwrap();
        pipeline.execute_all(&vec![0x01]).await.unwrap();

        let sent = wallet.sent_calldata();
        assert_eq!(sent.len(), 2, "approve then execute");
        assert_eq!(hex::encode(&sent[0][..4]), "095ea7b3");
        assert!(sent[1].starts_with(&[0xfa, 0xce]));
        assert_eq!(wallet.sign_calls.load(AtomicOrdering::SeqCst), 1);
        assert_eq!(pipeline.current_step(), PipelineStep::Execute);

        pipeline
            .execute_tracker()
            .wait_for_confirmation()
            .await
            .unwrap();
        assert_eq!(pipeline.current_step(), PipelineStep::Completed);
    }

    #[tokio::test]
    async fn test_manual_and_automated_paths_are_equivalent() {
        let manual_reader = Arc::new(MockReader::new());
        manual_reader.script_allowances(erc20().0, &[U256::ZERO, MAX_ALLOWANCE]);
        let manual_wallet = Arc::new(MockWallet::new());
        let manual = build_pipeline(&[erc20()], &manual_reader, &manual_wallet);

        let auto_reader = Arc::new(MockReader::new());
        auto_reader.script_allowances(erc20().0, &[U256::ZERO, MAX_ALLOWANCE]);
        let auto_wallet = Arc::new(MockWallet::new());
        let auto = build_pipeline(&[erc20()], &auto_reader, &auto_wallet);

        let args = vec![0x0a, 0x0b];

        manual.refresh().await.unwrap();
        manual.approvals()[0].approve(None).await.unwrap();
        manual.approvals()[0]
            .wait_for_confirmation()
            .await
            .unwrap();
        manual.signer().sign().await.unwrap();
        manual.execute(&args).await.unwrap();
        manual
            .execute_tracker()
            .wait_for_confirmation()
            .await
            .unwrap();

        auto.refresh().await.unwrap();
        auto.execute_all(&args).await.unwrap();
        auto.execute_tracker()
            .wait_for_confirmation()
            .await
            .unwrap();

        assert_eq!(manual_wallet.sent_calldata(), auto_wallet.sent_calldata());
        assert_eq!(
            manual.execute_tracker().status(),
            auto.execute_tracker().status()
        );
        assert_eq!(manual.current_step(), auto.current_step());
    }

    #[tokio::test]
    async fn test_all_native_pipeline_jumps_to_execute() {
        let reader = Arc::new(MockReader::new());
        let wallet = Arc::new(MockWallet::new());
        let pipeline = build_pipeline(&[(NATIVE_TOKEN, 5000)], &reader, &wallet);

        // No reads needed: the native slot is NotRequired and nothing needs
        // signing.
        assert_eq!(pipeline.current_step(), PipelineStep::Execute);

        pipeline.execute_all(&vec![0x01]).await.unwrap();
        let sent = wallet.sent_calldata();
        assert_eq!(sent.len(), 1, "no approval, no permit, only execute");
        assert_eq!(wallet.sign_calls.load(AtomicOrdering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_execute_without_signature_is_a_sequencing_error() {
        let reader = Arc::new(MockReader::new());
        reader.script_allowances(erc20().0, &[MAX_ALLOWANCE]);
        let wallet = Arc::new(MockWallet::new());
        let pipeline = build_pipeline(&[erc20()], &reader, &wallet);

        pipeline.refresh().await.unwrap();
        assert_eq!(
            pipeline.execute(&vec![]).await,
            Err(ExecutionError::PermitRequired)
        );
    }

    #[tokio::test]
    async fn test_execute_all_is_non_reentrant() {
        let reader = Arc::new(MockReader::new());
        reader.script_allowances(erc20().0, &[U256::ZERO, MAX_ALLOWANCE]);
        let wallet = Arc::new(MockWallet::new());
        let gate = Arc::new(Notify::new());
        *wallet.receipt_gate.lock().unwrap() = Some(gate.clone());
        let pipeline = Arc::new(build_pipeline(&[erc20()], &reader, &wallet));

        pipeline.refresh().await.unwrap();

        let first = {
            let pipeline = pipeline.clone();
            tokio::spawn(async move { pipeline.execute_all(&vec![0x01]).await })
        };
        // The first run is now suspended awaiting the approval receipt.
        tokio::task::yield_now().await;
        assert_eq!(
            pipeline.execute_all(&vec![0x01]).await,
            Err(ExecutionError::ExecutionInProgress)
        );

        gate.notify_one();
        assert!(first.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_reset_recomputes_from_scratch() {
        let reader = Arc::new(MockReader::new());
        reader.script_allowances(erc20().0, &[U256::ZERO, MAX_ALLOWANCE]);
        let wallet = Arc::new(MockWallet::new());
        let pipeline = build_pipeline(&[erc20()], &reader, &wallet);

        pipeline.refresh().await.unwrap();
        pipeline.execute_all(&vec![0x01]).await.unwrap();
        pipeline
            .execute_tracker()
            .wait_for_confirmation()
            .await
            .unwrap();
        assert_eq!(pipeline.current_step(), PipelineStep::Completed);

        pipeline.reset();
        // Allowance read cleared, signature cache cleared, trackers idle.
        assert_eq!(pipeline.current_step(), PipelineStep::Approval0);
        assert_eq!(pipeline.signer().cached(), None);
        assert_eq!(pipeline.execute_tracker().status(), TxStatus::Idle);
    }

    #[test]
    fn test_more_than_two_approval_slots_rejected() {
        let reader = Arc::new(MockReader::new());
        let wallet = Arc::new(MockWallet::new());
        let spender = addr(0x55);
        let approvals = (0..3)
            .map(|i| {
                TokenApprovalManager::new(
                    addr(0x10 + i),
                    spender,
                    U256::from(1u64),
                    reader.clone(),
                    wallet.clone(),
                    1,
                )
            })
            .collect();
        let signer =
            Permit2Signer::new(Chain::ethereum(), spender, vec![], reader.clone(), wallet.clone());
        let execute = TransactionTracker::new(wallet, 1);
        assert!(StepPipeline::new(approvals, signer, execute, RecordingBuilder::new()).is_err());
    }
}
