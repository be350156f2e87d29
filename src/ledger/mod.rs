//! # Process Ledger
//!
//! Persistent record-per-message store. Every backend enforces the status
//! transition rule atomically, so two concurrent redeliveries of the same
//! message can never both advance its status.
//!
//! ## Backends
//!
//! - [`InMemoryProcessLedger`]: mutex-guarded map, used by tests and
//!   single-process runs
//! - [`PgProcessLedger`]: PostgreSQL via `sqlx`, row lock plus conditional
//!   update inside one transaction

pub mod in_memory;
pub mod postgres;

use async_trait::async_trait;

use crate::error::PipelineResult;
use crate::models::{ProcessId, ProcessRecord, StatusTransition};
use crate::state_machine::ProcessStatus;

pub use in_memory::InMemoryProcessLedger;
pub use postgres::PgProcessLedger;

#[async_trait]
pub trait ProcessLedger: Send + Sync + 'static {
    /// Insert a record with status CREATED. Atomic: no partial record on failure.
    async fn create(&self, name: &str, payload: &str) -> PipelineResult<ProcessRecord>;

    /// Conditionally move a record to `new_status`.
    ///
    /// Fails with `WorkflowStatus` when the transition rule rejects the change
    /// and with `ProcessNotFound` when the id is unknown.
    async fn update_status(
        &self,
        id: ProcessId,
        new_status: ProcessStatus,
    ) -> PipelineResult<ProcessRecord>;

    async fn find_by_id(&self, id: ProcessId) -> PipelineResult<ProcessRecord>;

    async fn find_by_status(&self, status: ProcessStatus) -> PipelineResult<Vec<ProcessRecord>>;

    /// Audit trail in the order the changes were accepted
    async fn transitions(&self, id: ProcessId) -> PipelineResult<Vec<StatusTransition>>;

    async fn count(&self) -> PipelineResult<u64>;
}
