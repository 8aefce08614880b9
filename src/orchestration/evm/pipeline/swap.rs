use std::sync::{Arc, Mutex};

use alloy_primitives::{Address, B256, U256};
use tracing::{debug, info, warn};

use crate::orchestration::{
    calldata_builder::CalldataBuilder,
    chain_reader::ChainReader,
    config::ExecutionConfig,
    errors::ExecutionError,
    evm::{
        approvals::{allowance::TokenApprovalManager, permit2::Permit2Signer},
        pipeline::orchestrator::StepPipeline,
        registry::TokenRegistry,
        tracker::TransactionTracker,
        utils::{biguint_to_u256, unix_now},
    },
    models::{Chain, PipelineStep, PoolKey, SwapParams, TokenAmount, TxStatus},
    wallet::Wallet,
};

/// Steps of a swap pipeline: a leading quote step ahead of the shared
/// approval/permit/execute sequence.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SwapStep {
    /// No quote matching the current trade inputs, or no connected account.
    Quote,
    Approval,
    Permit,
    Execute,
    Completed,
}

impl From<PipelineStep> for SwapStep {
    fn from(step: PipelineStep) -> Self {
        match step {
            PipelineStep::Approval0 | PipelineStep::Approval1 => SwapStep::Approval,
            PipelineStep::Permit => SwapStep::Permit,
            PipelineStep::Execute => SwapStep::Execute,
            PipelineStep::Completed => SwapStep::Completed,
        }
    }
}

/// A quote for the configured trade. Only valid while `amount_in` matches
/// the pipeline's current input amount.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SwapQuote {
    pub amount_in: U256,
    pub amount_out: U256,
    /// Slippage-protected floor the execute transaction enforces.
    pub minimum_amount_out: U256,
}

/// Arguments handed to the swap calldata builder.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SwapExecuteArgs {
    pub token_in: Address,
    pub amount_in: U256,
    pub minimum_amount_out: U256,
    pub receiver: Address,
    /// Unix timestamp after which the execute transaction must not settle.
    pub deadline: u64,
}

/// Worst acceptable output after applying a basis-point slippage tolerance.
///
/// Integer arithmetic throughout: `amount_out * (10000 - bps) / 10000`,
/// flooring the result.
pub fn minimum_amount_out(amount_out: U256, slippage_bps: u16) -> U256 {
    debug_assert!(slippage_bps <= 10_000);
    amount_out * U256::from(10_000 - u64::from(slippage_bps)) / U256::from(10_000u64)
}

/// Swap specialization of the step pipeline: adds quote acquisition and the
/// slippage-protected minimum output ahead of the shared step sequence.
pub struct SwapPipeline<B: CalldataBuilder<Args = SwapExecuteArgs>> {
    chain: Chain,
    pool: PoolKey,
    token_in: Address,
    amount_in: Mutex<U256>,
    slippage_bps: u16,
    receiver: Address,
    reader: Arc<dyn ChainReader>,
    wallet: Arc<dyn Wallet>,
    config: ExecutionConfig,
    pipeline: StepPipeline<B>,
    quote: Mutex<Option<SwapQuote>>,
    clock: fn() -> u64,
}

impl<B: CalldataBuilder<Args = SwapExecuteArgs>> SwapPipeline<B> {
    /// Validates the trade inputs and assembles the pipeline. Fails before
    /// any network call on an out-of-range slippage tolerance.
    pub fn new(
        chain: Chain,
        params: &SwapParams,
        spender: Address,
        reader: Arc<dyn ChainReader>,
        wallet: Arc<dyn Wallet>,
        builder: B,
        config: ExecutionConfig,
    ) -> Result<Self, ExecutionError> {
        let slippage_bps = params.slippage_bps.unwrap_or(config.slippage_bps);
        if slippage_bps > 10_000 {
            return Err(ExecutionError::InvalidInput(format!(
                "Slippage tolerance {slippage_bps} exceeds 10000 basis points"
            )));
        }
        let amount_in = biguint_to_u256(&params.amount_in);

        let approval = TokenApprovalManager::new(
            params.token_in,
            spender,
            amount_in,
            reader.clone(),
            wallet.clone(),
            config.confirmations,
        );
        let signer = Permit2Signer::new(
            chain.clone(),
            spender,
            vec![TokenAmount::new(params.token_in, amount_in)],
            reader.clone(),
            wallet.clone(),
        );
        let execute = TransactionTracker::new(wallet.clone(), config.confirmations)
            .with_on_success(Box::new(|receipt| {
                info!(hash = %receipt.transaction_hash, "Swap confirmed");
            }));
        let pipeline = StepPipeline::new(vec![approval], signer, execute, builder)?;

        Ok(Self {
            chain,
            pool: params.pool,
            token_in: params.token_in,
            amount_in: Mutex::new(amount_in),
            slippage_bps,
            receiver: params.receiver,
            reader,
            wallet,
            config,
            pipeline,
            quote: Mutex::new(None),
            clock: unix_now,
        })
    }

    /// Overrides the timestamp source used for transaction deadlines.
    pub fn with_clock(mut self, clock: fn() -> u64) -> Self {
        self.clock = clock;
        self
    }

    /// The underlying step pipeline, for manual per-step control.
    pub fn pipeline(&self) -> &StepPipeline<B> {
        &self.pipeline
    }

    fn amount_in(&self) -> U256 {
        *self.amount_in.lock().expect("amount lock poisoned")
    }

    /// The stored quote, if it still matches the current input amount.
    pub fn quote(&self) -> Option<SwapQuote> {
        let amount_in = self.amount_in();
        self.quote
            .lock()
            .expect("quote lock poisoned")
            .filter(|quote| quote.amount_in == amount_in)
    }

    /// Simulates the trade and stores the resulting quote with its
    /// slippage-protected minimum output.
    pub async fn refresh_quote(&self) -> Result<SwapQuote, ExecutionError> {
        let amount_in = self.amount_in();
        let zero_for_one = self.pool.zero_for_one(self.token_in);
        let amount_out = self
            .reader
            .quote_exact_input(&self.pool, amount_in, zero_for_one)
            .await?;
        let quote = SwapQuote {
            amount_in,
            amount_out,
            minimum_amount_out: minimum_amount_out(amount_out, self.slippage_bps),
        };
        debug!(amount_in = %amount_in, amount_out = %amount_out, "Quote refreshed");
        *self.quote.lock().expect("quote lock poisoned") = Some(quote);
        Ok(quote)
    }

    /// Whether the periodic quote refresh is currently suspended. Refreshing
    /// stops once the swap is confirmed and resumes after a reset.
    pub fn refresh_suspended(&self) -> bool {
        self.pipeline.execute_tracker().status() == TxStatus::Confirmed
    }

    /// Refreshes the quote on the configured interval until aborted,
    /// skipping ticks while the pipeline is confirmed. Callers spawn this
    /// alongside the pipeline and abort it when the pipeline is dropped.
    pub async fn run_quote_refresh(&self) {
        let mut ticker = tokio::time::interval(self.config.quote_refresh_interval);
        loop {
            ticker.tick().await;
            if self.refresh_suspended() {
                continue;
            }
            if let Err(err) = self.refresh_quote().await {
                warn!(error = %err, "Quote refresh failed");
            }
        }
    }

    /// Re-targets the pipeline at a new input amount: the approval
    /// requirement and the permit pairs follow, and any stored quote or
    /// cached signature no longer matches.
    pub fn update_amount_in(&self, amount_in: U256) {
        *self.amount_in.lock().expect("amount lock poisoned") = amount_in;
        self.pipeline.approvals()[0].set_required_amount(amount_in);
        self.pipeline
            .signer()
            .update_pairs(vec![TokenAmount::new(self.token_in, amount_in)]);
    }

    /// The current step, including the leading quote step.
    pub fn current_step(&self) -> SwapStep {
        if self.wallet.address().is_none() || self.quote().is_none() {
            return SwapStep::Quote;
        }
        self.pipeline.current_step().into()
    }

    fn execute_args(&self) -> Result<SwapExecuteArgs, ExecutionError> {
        let quote = self.quote().ok_or(ExecutionError::QuoteNotLoaded)?;
        Ok(SwapExecuteArgs {
            token_in: self.token_in,
            amount_in: quote.amount_in,
            minimum_amount_out: quote.minimum_amount_out,
            receiver: self.receiver,
            deadline: (self.clock)() + self.config.deadline_secs,
        })
    }

    async fn check_balance(&self, owner: Address) -> Result<(), ExecutionError> {
        let amount_in = self.amount_in();
        let balance = self.reader.balance(owner, self.token_in).await?;
        if balance < amount_in {
            let metadata = TokenRegistry::global()
                .get_or_fetch(self.chain.id, self.token_in, self.reader.as_ref())
                .await?;
            return Err(ExecutionError::InsufficientBalance {
                symbol: metadata.symbol,
                required: amount_in.to_string(),
                available: balance.to_string(),
            });
        }
        Ok(())
    }

    /// Broadcasts the execute transaction using the current quote. Manual
    /// counterpart of the final [`Self::execute_all`] stage.
    pub async fn execute(&self) -> Result<B256, ExecutionError> {
        let args = self.execute_args()?;
        self.pipeline.execute(&args).await
    }

    /// Runs every remaining step for the configured swap: balance check,
    /// any required approval, the permit signature, then execution.
    pub async fn execute_all(&self) -> Result<B256, ExecutionError> {
        let owner = self
            .wallet
            .address()
            .ok_or(ExecutionError::WalletNotConnected)?;
        let args = self.execute_args()?;
        self.check_balance(owner).await?;
        self.pipeline.execute_all(&args).await
    }

    /// Resets the owned step pipeline. The quote is adapter-owned data and
    /// survives; periodic refresh resumes because the pipeline is idle
    /// again.
    pub fn reset(&self) {
        self.pipeline.reset();
    }
}
