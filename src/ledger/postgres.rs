//! PostgreSQL process ledger.
//!
//! `update_status` locks the row, checks the transition, then issues an
//! `UPDATE ... WHERE status = ANY(<allowed predecessors>)` so the storage layer
//! itself refuses an invalid sequence.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tracing::{error, instrument};

use super::ProcessLedger;
use crate::error::{PipelineError, PipelineResult};
use crate::logging::log_ledger_operation;
use crate::models::{ProcessId, ProcessRecord, StatusTransition};
use crate::state_machine::{allowed_predecessors, ProcessStatus, StatusTransitionGuard};

const COMPONENT: &str = "process ledger";

#[derive(sqlx::FromRow)]
struct ProcessRow {
    id: i64,
    name: String,
    payload: String,
    status: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<ProcessRow> for ProcessRecord {
    type Error = PipelineError;

    fn try_from(row: ProcessRow) -> Result<Self, Self::Error> {
        Ok(ProcessRecord {
            id: ProcessId::from(row.id),
            name: row.name,
            payload: row.payload,
            status: parse_status(&row.status)?,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct TransitionRow {
    process_id: i64,
    from_status: Option<String>,
    to_status: String,
    transitioned_at: DateTime<Utc>,
}

fn parse_status(raw: &str) -> PipelineResult<ProcessStatus> {
    raw.parse().map_err(PipelineError::unexpected)
}

fn storage_error(operation: &str, e: sqlx::Error) -> PipelineError {
    error!("Process ledger {} failed: {}", operation, e);
    PipelineError::from_sqlx(COMPONENT, e)
}

const RETURNING: &str = "id, name, payload, status, created_at, updated_at";

#[derive(Debug, Clone)]
pub struct PgProcessLedger {
    pool: PgPool,
    guard: StatusTransitionGuard,
}

impl PgProcessLedger {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            guard: StatusTransitionGuard,
        }
    }
}

#[async_trait]
impl ProcessLedger for PgProcessLedger {
    #[instrument(skip(self, payload))]
    async fn create(&self, name: &str, payload: &str) -> PipelineResult<ProcessRecord> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| storage_error("begin", e))?;

        let row: ProcessRow = sqlx::query_as(&format!(
            "INSERT INTO mx_processes (name, payload, status) VALUES ($1, $2, $3) RETURNING {RETURNING}"
        ))
        .bind(name)
        .bind(payload)
        .bind(ProcessStatus::Created.as_str())
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| storage_error("create", e))?;

        sqlx::query(
            "INSERT INTO mx_process_transitions (process_id, from_status, to_status) VALUES ($1, NULL, $2)",
        )
        .bind(row.id)
        .bind(ProcessStatus::Created.as_str())
        .execute(&mut *tx)
        .await
        .map_err(|e| storage_error("record transition", e))?;

        tx.commit().await.map_err(|e| storage_error("commit", e))?;

        let record = ProcessRecord::try_from(row)?;
        log_ledger_operation("create", record.id, record.status, Some(&record.name));
        Ok(record)
    }

    #[instrument(skip(self), fields(process_id = %id))]
    async fn update_status(
        &self,
        id: ProcessId,
        new_status: ProcessStatus,
    ) -> PipelineResult<ProcessRecord> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| storage_error("begin", e))?;

        let current: Option<String> =
            sqlx::query_scalar("SELECT status FROM mx_processes WHERE id = $1 FOR UPDATE")
                .bind(id.get())
                .fetch_optional(&mut *tx)
                .await
                .map_err(|e| storage_error("lock", e))?;

        let actual = match current {
            Some(raw) => parse_status(&raw)?,
            None => return Err(PipelineError::ProcessNotFound { process_id: id }),
        };
        self.guard.check(id, actual, new_status)?;

        let predecessors: Vec<String> = allowed_predecessors(new_status)
            .iter()
            .map(|s| s.as_str().to_string())
            .collect();

        let row: Option<ProcessRow> = sqlx::query_as(&format!(
            "UPDATE mx_processes SET status = $2, updated_at = NOW() \
             WHERE id = $1 AND status = ANY($3) RETURNING {RETURNING}"
        ))
        .bind(id.get())
        .bind(new_status.as_str())
        .bind(&predecessors)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| storage_error("update_status", e))?;

        let Some(row) = row else {
            return Err(PipelineError::workflow_status(id, new_status, actual));
        };

        sqlx::query(
            "INSERT INTO mx_process_transitions (process_id, from_status, to_status) VALUES ($1, $2, $3)",
        )
        .bind(id.get())
        .bind(actual.as_str())
        .bind(new_status.as_str())
        .execute(&mut *tx)
        .await
        .map_err(|e| storage_error("record transition", e))?;

        tx.commit().await.map_err(|e| storage_error("commit", e))?;

        log_ledger_operation(
            "update_status",
            id,
            new_status,
            Some(&format!("from status={actual}")),
        );
        ProcessRecord::try_from(row)
    }

    async fn find_by_id(&self, id: ProcessId) -> PipelineResult<ProcessRecord> {
        let row: Option<ProcessRow> = sqlx::query_as(&format!(
            "SELECT {RETURNING} FROM mx_processes WHERE id = $1"
        ))
        .bind(id.get())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| storage_error("find_by_id", e))?;

        row.map(ProcessRecord::try_from)
            .unwrap_or(Err(PipelineError::ProcessNotFound { process_id: id }))
    }

    async fn find_by_status(&self, status: ProcessStatus) -> PipelineResult<Vec<ProcessRecord>> {
        let rows: Vec<ProcessRow> = sqlx::query_as(&format!(
            "SELECT {RETURNING} FROM mx_processes WHERE status = $1 ORDER BY id"
        ))
        .bind(status.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| storage_error("find_by_status", e))?;

        rows.into_iter().map(ProcessRecord::try_from).collect()
    }

    async fn transitions(&self, id: ProcessId) -> PipelineResult<Vec<StatusTransition>> {
        let rows: Vec<TransitionRow> = sqlx::query_as(
            "SELECT process_id, from_status, to_status, transitioned_at \
             FROM mx_process_transitions WHERE process_id = $1 ORDER BY id",
        )
        .bind(id.get())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| storage_error("transitions", e))?;

        rows.into_iter()
            .map(|row| {
                Ok(StatusTransition {
                    process_id: ProcessId::from(row.process_id),
                    from_status: row.from_status.as_deref().map(parse_status).transpose()?,
                    to_status: parse_status(&row.to_status)?,
                    transitioned_at: row.transitioned_at,
                })
            })
            .collect()
    }

    async fn count(&self) -> PipelineResult<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM mx_processes")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| storage_error("count", e))?;
        Ok(u64::try_from(count).unwrap_or(0))
    }
}
