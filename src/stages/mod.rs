//! # Pipeline Stages
//!
//! Plain units of work over their dependencies (ledger, claim store,
//! transport, sinks). A stage returns a typed error and never decides on
//! redelivery itself; [`crate::orchestration::configure_route`] attaches
//! the shared error policy.

pub mod ingestion;
pub mod type_processor;
pub mod validation;

use async_trait::async_trait;
use tracing::debug;

use crate::error::{PipelineError, PipelineResult};
use crate::ledger::ProcessLedger;
use crate::messaging::Envelope;
use crate::models::ProcessId;
use crate::state_machine::ProcessStatus;

pub use ingestion::{IngestOutcome, IngestionStage, RecoveryOutcome};
pub use type_processor::{
    CompletedArtifact, Pacs008Processor, TypeProcessor, TypeProcessorRegistry, TypeProcessorStage,
};
pub use validation::ValidationStage;

/// An envelope-consuming stage
#[async_trait]
pub trait Stage: Send + Sync + 'static {
    fn route_id(&self) -> &str;

    async fn process(&self, envelope: Envelope) -> PipelineResult<()>;
}

/// Move the ledger to `status`. A record already at `status` means this
/// delivery is a replay of one that got that far, so it is accepted.
pub(crate) async fn advance_status(
    ledger: &dyn ProcessLedger,
    process_id: ProcessId,
    status: ProcessStatus,
) -> PipelineResult<()> {
    match ledger.update_status(process_id, status).await {
        Ok(_) => Ok(()),
        Err(PipelineError::WorkflowStatus { actual, .. }) if actual == status => {
            debug!(
                process_id = process_id.get(),
                status = %status,
                "Status already recorded, continuing replayed delivery"
            );
            Ok(())
        }
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::InMemoryProcessLedger;

    #[tokio::test]
    async fn replayed_status_is_accepted_but_regressions_are_not() {
        let ledger = InMemoryProcessLedger::new();
        let record = ledger.create("a.xml", "<a/>").await.unwrap();

        advance_status(&ledger, record.id, ProcessStatus::Validated)
            .await
            .unwrap();
        advance_status(&ledger, record.id, ProcessStatus::Validated)
            .await
            .unwrap();
        advance_status(&ledger, record.id, ProcessStatus::Completed)
            .await
            .unwrap();

        let error = advance_status(&ledger, record.id, ProcessStatus::Validated)
            .await
            .unwrap_err();
        assert!(matches!(error, PipelineError::WorkflowStatus { .. }));
        assert_eq!(ledger.transitions(record.id).await.unwrap().len(), 3);
    }
}
