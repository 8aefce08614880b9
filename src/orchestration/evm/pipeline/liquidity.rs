use std::sync::{Arc, Mutex};

use alloy_primitives::{Address, B256, U256};
use tracing::{debug, info};

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
    models::{
        Chain, PipelineStep, PoolKey, PoolState, PositionParams, TickRange, TokenAmount,
    },
    wallet::Wallet,
};

/// The liquidity operations a position pipeline can drive.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PositionAction {
    /// Mint a new position. Two approval slots, both tokens in the permit
    /// batch.
    Create,
    /// Add liquidity to an existing position. Same step shape as `Create`.
    Increase,
    /// Remove liquidity. Burns owned value, so no approvals and no permit.
    Decrease,
    /// Collect accrued fees. No approvals and no permit.
    Collect,
}

impl PositionAction {
    fn deposits_tokens(&self) -> bool {
        matches!(self, PositionAction::Create | PositionAction::Increase)
    }
}

/// Arguments handed to the position calldata builder.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PositionExecuteArgs {
    pub action: PositionAction,
    pub pool: PoolKey,
    pub tick_range: Option<TickRange>,
    pub amount0: U256,
    pub amount1: U256,
    /// Liquidity to remove; only set for decrease operations.
    pub liquidity: Option<U256>,
    pub recipient: Address,
    pub deadline: u64,
}

/// Pipeline adapter for liquidity position operations.
///
/// Deposit-style operations (create, increase) carry two approval slots and
/// sign a batch permit over both tokens; burn-style operations (decrease,
/// collect) need neither, so their current step starts at `Execute`.
pub struct PositionPipeline<B: CalldataBuilder<Args = PositionExecuteArgs>> {
    chain: Chain,
    action: PositionAction,
    pool: PoolKey,
    tick_range: Option<TickRange>,
    amount0: U256,
    amount1: U256,
    liquidity: Option<U256>,
    recipient: Address,
    reader: Arc<dyn ChainReader>,
    wallet: Arc<dyn Wallet>,
    config: ExecutionConfig,
    pipeline: StepPipeline<B>,
    /// Loaded through the reader and owned by this adapter; pipeline resets
    /// do not touch it.
    pool_state: Mutex<Option<PoolState>>,
    clock: fn() -> u64,
}

impl<B: CalldataBuilder<Args = PositionExecuteArgs>> PositionPipeline<B> {
    pub fn create(
        chain: Chain,
        params: &PositionParams,
        spender: Address,
        reader: Arc<dyn ChainReader>,
        wallet: Arc<dyn Wallet>,
        builder: B,
        config: ExecutionConfig,
    ) -> Result<Self, ExecutionError> {
        Self::with_action(PositionAction::Create, chain, params, spender, reader, wallet, builder, config)
    }

    pub fn increase(
        chain: Chain,
        params: &PositionParams,
        spender: Address,
        reader: Arc<dyn ChainReader>,
        wallet: Arc<dyn Wallet>,
        builder: B,
        config: ExecutionConfig,
    ) -> Result<Self, ExecutionError> {
        Self::with_action(PositionAction::Increase, chain, params, spender, reader, wallet, builder, config)
    }

    pub fn decrease(
        chain: Chain,
        params: &PositionParams,
        spender: Address,
        reader: Arc<dyn ChainReader>,
        wallet: Arc<dyn Wallet>,
        builder: B,
        config: ExecutionConfig,
    ) -> Result<Self, ExecutionError> {
        if params.liquidity.is_none() {
            return Err(ExecutionError::InvalidInput(
                "Decrease operations require a liquidity amount".to_string(),
            ));
        }
        Self::with_action(PositionAction::Decrease, chain, params, spender, reader, wallet, builder, config)
    }

    pub fn collect(
        chain: Chain,
        params: &PositionParams,
        spender: Address,
        reader: Arc<dyn ChainReader>,
        wallet: Arc<dyn Wallet>,
        builder: B,
        config: ExecutionConfig,
    ) -> Result<Self, ExecutionError> {
        Self::with_action(PositionAction::Collect, chain, params, spender, reader, wallet, builder, config)
    }

    #[allow(clippy::too_many_arguments)]
    fn with_action(
        action: PositionAction,
        chain: Chain,
        params: &PositionParams,
        spender: Address,
        reader: Arc<dyn ChainReader>,
        wallet: Arc<dyn Wallet>,
        builder: B,
        config: ExecutionConfig,
    ) -> Result<Self, ExecutionError> {
        if let Some(range) = &params.tick_range {
            range.validate()?;
        }
        let amount0 = biguint_to_u256(&params.amount0);
        let amount1 = biguint_to_u256(&params.amount1);
        let pairs = vec![
            TokenAmount::new(params.pool.token0, amount0),
            TokenAmount::new(params.pool.token1, amount1),
        ];

        let approvals = if action.deposits_tokens() {
            pairs
                .iter()
                .map(|pair| {
                    TokenApprovalManager::new(
                        pair.token,
                        spender,
                        pair.amount,
                        reader.clone(),
                        wallet.clone(),
                        config.confirmations,
                    )
                })
                .collect()
        } else {
            Vec::new()
        };
        let signer_pairs = if action.deposits_tokens() { pairs } else { Vec::new() };
        let signer = Permit2Signer::new(
            chain.clone(),
            spender,
            signer_pairs,
            reader.clone(),
            wallet.clone(),
        );
        let execute = TransactionTracker::new(wallet.clone(), config.confirmations)
            .with_on_success(Box::new(move |receipt| {
                info!(hash = %receipt.transaction_hash, ?action, "Position operation confirmed");
            }));
        let pipeline = StepPipeline::new(approvals, signer, execute, builder)?;

        Ok(Self {
            chain,
            action,
            pool: params.pool,
            tick_range: params.tick_range,
            amount0,
            amount1,
            liquidity: params.liquidity.as_ref().map(biguint_to_u256),
            recipient: params.recipient,
            reader,
            wallet,
            config,
            pipeline,
            pool_state: Mutex::new(None),
            clock: unix_now,
        })
    }

    /// Overrides the timestamp source used for transaction deadlines.
    pub fn with_clock(mut self, clock: fn() -> u64) -> Self {
        self.clock = clock;
        self
    }

    pub fn action(&self) -> PositionAction {
        self.action
    }

    /// The underlying step pipeline, for manual per-step control.
    pub fn pipeline(&self) -> &StepPipeline<B> {
        &self.pipeline
    }

    pub fn pool_loaded(&self) -> bool {
        self.pool_state
            .lock()
            .expect("pool state lock poisoned")
            .is_some()
    }

    /// Reads and stores the current pool state.
    pub async fn load_pool(&self) -> Result<PoolState, ExecutionError> {
        let state = self.reader.pool_state(&self.pool).await?;
        debug!(tick = state.tick, "Pool state loaded");
        *self
            .pool_state
            .lock()
            .expect("pool state lock poisoned") = Some(state);
        Ok(state)
    }

    pub fn current_step(&self) -> PipelineStep {
        self.pipeline.current_step()
    }

    fn execute_args(&self) -> Result<PositionExecuteArgs, ExecutionError> {
        if self.action.deposits_tokens() {
            if !self.pool_loaded() {
                return Err(ExecutionError::PoolNotLoaded);
            }
            if self.tick_range.is_none() {
                return Err(ExecutionError::TickRangeUnresolved);
            }
        }
        Ok(PositionExecuteArgs {
            action: self.action,
            pool: self.pool,
            tick_range: self.tick_range,
            amount0: self.amount0,
            amount1: self.amount1,
            liquidity: self.liquidity,
            recipient: self.recipient,
            deadline: (self.clock)() + self.config.deadline_secs,
        })
    }

    async fn check_balances(&self, owner: Address) -> Result<(), ExecutionError> {
        for pair in [
            TokenAmount::new(self.pool.token0, self.amount0),
            TokenAmount::new(self.pool.token1, self.amount1),
        ] {
            if pair.amount.is_zero() {
                continue;
            }
            let balance = self.reader.balance(owner, pair.token).await?;
            if balance < pair.amount {
                let metadata = TokenRegistry::global()
                    .get_or_fetch(self.chain.id, pair.token, self.reader.as_ref())
                    .await?;
                return Err(ExecutionError::InsufficientBalance {
                    symbol: metadata.symbol,
                    required: pair.amount.to_string(),
                    available: balance.to_string(),
                });
            }
        }
        Ok(())
    }

    /// Broadcasts the execute transaction. Manual counterpart of the final
    /// [`Self::execute_all`] stage.
    pub async fn execute(&self) -> Result<B256, ExecutionError> {
        let args = self.execute_args()?;
        self.pipeline.execute(&args).await
    }

    /// Runs every remaining step for the configured operation.
    pub async fn execute_all(&self) -> Result<B256, ExecutionError> {
        let owner = self
            .wallet
            .address()
            .ok_or(ExecutionError::WalletNotConnected)?;
        let args = self.execute_args()?;
        if self.action.deposits_tokens() {
            self.check_balances(owner).await?;
        }
        self.pipeline.execute_all(&args).await
    }

    /// Resets the owned step pipeline. The pool state read is adapter-owned
    /// and survives.
    pub fn reset(&self) {
        self.pipeline.reset();
    }
}
