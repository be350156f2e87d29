use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;

use super::ProcessLedger;
use crate::error::{PipelineError, PipelineResult};
use crate::logging::log_ledger_operation;
use crate::models::{ProcessId, ProcessRecord, StatusTransition};
use crate::state_machine::{ProcessStatus, StatusTransitionGuard};

const COMPONENT: &str = "process ledger";

#[derive(Debug, Default)]
struct LedgerState {
    records: BTreeMap<ProcessId, ProcessRecord>,
    transitions: Vec<StatusTransition>,
    last_id: i64,
}

/// In-memory ledger. Compare-and-write happens under a single mutex.
#[derive(Debug)]
pub struct InMemoryProcessLedger {
    state: Mutex<LedgerState>,
    reachable: AtomicBool,
    guard: StatusTransitionGuard,
}

impl Default for InMemoryProcessLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryProcessLedger {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(LedgerState::default()),
            reachable: AtomicBool::new(true),
            guard: StatusTransitionGuard,
        }
    }

    /// Simulate a store outage. Records survive; calls fail while offline.
    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }

    fn check_reachable(&self) -> PipelineResult<()> {
        if self.reachable.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(PipelineError::infrastructure_unavailable(
                COMPONENT,
                "ledger store is offline",
            ))
        }
    }
}

#[async_trait]
impl ProcessLedger for InMemoryProcessLedger {
    async fn create(&self, name: &str, payload: &str) -> PipelineResult<ProcessRecord> {
        self.check_reachable()?;
        let record = {
            let mut state = self.state.lock();
            state.last_id += 1;
            let now = Utc::now();
            let record = ProcessRecord {
                id: ProcessId::from(state.last_id),
                name: name.to_string(),
                payload: payload.to_string(),
                status: ProcessStatus::Created,
                created_at: now,
                updated_at: now,
            };
            state.records.insert(record.id, record.clone());
            state.transitions.push(StatusTransition {
                process_id: record.id,
                from_status: None,
                to_status: ProcessStatus::Created,
                transitioned_at: now,
            });
            record
        };

        log_ledger_operation("create", record.id, record.status, Some(&record.name));
        Ok(record)
    }

    async fn update_status(
        &self,
        id: ProcessId,
        new_status: ProcessStatus,
    ) -> PipelineResult<ProcessRecord> {
        self.check_reachable()?;
        let (previous, record) = {
            let mut state = self.state.lock();
            let record = state
                .records
                .get_mut(&id)
                .ok_or(PipelineError::ProcessNotFound { process_id: id })?;

            let previous = record.status;
            self.guard.check(id, previous, new_status)?;

            let now = Utc::now();
            record.status = new_status;
            record.updated_at = now;
            let updated = record.clone();

            state.transitions.push(StatusTransition {
                process_id: id,
                from_status: Some(previous),
                to_status: new_status,
                transitioned_at: now,
            });
            (previous, updated)
        };

        log_ledger_operation(
            "update_status",
            id,
            new_status,
            Some(&format!("from status={previous}")),
        );
        Ok(record)
    }

    async fn find_by_id(&self, id: ProcessId) -> PipelineResult<ProcessRecord> {
        self.check_reachable()?;
        self.state
            .lock()
            .records
            .get(&id)
            .cloned()
            .ok_or(PipelineError::ProcessNotFound { process_id: id })
    }

    async fn find_by_status(&self, status: ProcessStatus) -> PipelineResult<Vec<ProcessRecord>> {
        self.check_reachable()?;
        Ok(self
            .state
            .lock()
            .records
            .values()
            .filter(|r| r.status == status)
            .cloned()
            .collect())
    }

    async fn transitions(&self, id: ProcessId) -> PipelineResult<Vec<StatusTransition>> {
        self.check_reachable()?;
        Ok(self
            .state
            .lock()
            .transitions
            .iter()
            .filter(|t| t.process_id == id)
            .cloned()
            .collect())
    }

    async fn count(&self) -> PipelineResult<u64> {
        self.check_reachable()?;
        Ok(self.state.lock().records.len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn create_assigns_increasing_ids() {
        let ledger = InMemoryProcessLedger::new();
        let a = ledger.create("a.xml", "<a/>").await.unwrap();
        let b = ledger.create("b.xml", "<b/>").await.unwrap();
        assert!(b.id > a.id);
        assert_eq!(a.status, ProcessStatus::Created);
        assert_eq!(ledger.count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn happy_path_records_transition_history() {
        let ledger = InMemoryProcessLedger::new();
        let record = ledger.create("a.xml", "<a/>").await.unwrap();
        ledger
            .update_status(record.id, ProcessStatus::Validated)
            .await
            .unwrap();
        let done = ledger
            .update_status(record.id, ProcessStatus::Completed)
            .await
            .unwrap();
        assert_eq!(done.status, ProcessStatus::Completed);
        assert!(done.updated_at >= record.updated_at);

        let history: Vec<ProcessStatus> = ledger
            .transitions(record.id)
            .await
            .unwrap()
            .into_iter()
            .map(|t| t.to_status)
            .collect();
        assert_eq!(
            history,
            vec![
                ProcessStatus::Created,
                ProcessStatus::Validated,
                ProcessStatus::Completed
            ]
        );
    }

    #[tokio::test]
    async fn rejected_transition_leaves_record_untouched() {
        let ledger = InMemoryProcessLedger::new();
        let record = ledger.create("a.xml", "<a/>").await.unwrap();
        ledger
            .update_status(record.id, ProcessStatus::Completed)
            .await
            .unwrap();

        let err = ledger
            .update_status(record.id, ProcessStatus::Validated)
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::WorkflowStatus { .. }));
        assert_eq!(
            ledger.find_by_id(record.id).await.unwrap().status,
            ProcessStatus::Completed
        );
        assert_eq!(ledger.transitions(record.id).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn concurrent_updates_advance_once() {
        let ledger = Arc::new(InMemoryProcessLedger::new());
        let record = ledger.create("a.xml", "<a/>").await.unwrap();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let ledger = Arc::clone(&ledger);
                tokio::spawn(async move {
                    ledger
                        .update_status(record.id, ProcessStatus::Validated)
                        .await
                        .is_ok()
                })
            })
            .collect();

        let mut successes = 0;
        for handle in handles {
            if handle.await.unwrap() {
                successes += 1;
            }
        }
        assert_eq!(successes, 1);
    }

    #[tokio::test]
    async fn unknown_ids_and_outages() {
        let ledger = InMemoryProcessLedger::new();
        let err = ledger
            .update_status(ProcessId::from(99), ProcessStatus::Failed)
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::ProcessNotFound { .. }));

        ledger.set_reachable(false);
        let err = ledger.create("a.xml", "<a/>").await.unwrap_err();
        assert!(matches!(err, PipelineError::InfrastructureUnavailable { .. }));
        ledger.set_reachable(true);
        assert_eq!(ledger.count().await.unwrap(), 0);
    }
}
