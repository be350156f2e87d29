use crate::error::{PipelineError, PipelineResult};
use crate::models::ProcessId;

use super::states::ProcessStatus;

/// Transition rule shared by every ledger backend:
///
/// - `next == FAILED` is always allowed
/// - `actual == next` is rejected
/// - `next == CREATED` is rejected
/// - otherwise allowed iff `rank(actual) < rank(next)`
pub fn is_transition_allowed(actual: ProcessStatus, next: ProcessStatus) -> bool {
    if next == ProcessStatus::Failed {
        return true;
    }
    if actual == next || next == ProcessStatus::Created {
        return false;
    }
    actual.rank() < next.rank()
}

/// Every status from which `next` may be reached. Storage backends use this to
/// push the comparison into a conditional update.
pub fn allowed_predecessors(next: ProcessStatus) -> Vec<ProcessStatus> {
    ProcessStatus::ALL
        .into_iter()
        .filter(|actual| is_transition_allowed(*actual, next))
        .collect()
}

/// Guard used by ledger backends before writing a new status
#[derive(Debug, Clone, Copy, Default)]
pub struct StatusTransitionGuard;

impl StatusTransitionGuard {
    pub fn check(
        &self,
        process_id: ProcessId,
        actual: ProcessStatus,
        next: ProcessStatus,
    ) -> PipelineResult<()> {
        if is_transition_allowed(actual, next) {
            Ok(())
        } else {
            Err(PipelineError::workflow_status(process_id, next, actual))
        }
    }

    pub fn description(&self) -> &'static str {
        "Status must advance along CREATED < VALIDATED < COMPLETED|UNSUPPORTED, or move to FAILED"
    }
}
