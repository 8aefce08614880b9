//! The pure reduction from component states to the pipeline's current step.
//!
//! The current step is never stored: it is recomputed on demand from the
//! approval requirements, the signing state and the execute transaction
//! status, so it cannot diverge from its inputs.

use crate::orchestration::models::{PipelineStep, Requirement, TxStatus};

/// Snapshot of the signer as seen by the reduction.
#[derive(Clone, Copy, Debug)]
pub struct SigningState {
    /// Whether the pipeline needs a batch signature at all.
    pub required: bool,
    /// Whether a signature matching the current fingerprint is cached.
    pub cached: bool,
}

/// Derives the current step: the first unmet requirement wins, in fixed
/// order — approval slots by index, then the permit, then execution.
///
/// An approval slot whose requirement is still [`Requirement::Unknown`]
/// holds the pipeline at that slot; not knowing is not the same as not
/// needing.
pub fn derive_step(
    approvals: &[Requirement],
    signing: SigningState,
    execute_status: TxStatus,
) -> PipelineStep {
    debug_assert!(approvals.len() <= 2, "pipelines use at most two approval slots");
    for (index, requirement) in approvals.iter().enumerate() {
        match requirement {
            Requirement::NotRequired => continue,
            Requirement::Unknown | Requirement::Required => {
                return if index == 0 { PipelineStep::Approval0 } else { PipelineStep::Approval1 };
            }
        }
    }
    if signing.required && !signing.cached {
        return PipelineStep::Permit;
    }
    if execute_status != TxStatus::Confirmed {
        return PipelineStep::Execute;
    }
    PipelineStep::Completed
}
