//! Client-side orchestration of multi-step operations against AMM protocols.
//!
//! An on-chain swap or liquidity operation is rarely a single transaction: it
//! is a short pipeline of dependent steps — ERC-20 approvals, an off-chain
//! batched permit signature, and the final execution call — whose exact shape
//! depends on whether the involved assets are native or contract-based. This
//! crate provides the primitives those pipelines are built from (transaction
//! lifecycle tracking, allowance checking, Permit2 batch signing) and the
//! orchestrator that reduces their state into a single "what comes next"
//! answer, supporting both manual per-step control and one-shot execution.

pub mod orchestration;
