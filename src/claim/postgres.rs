//! PostgreSQL claim store. Takeover of expired markers is pushed into a
//! single `INSERT ... ON CONFLICT DO UPDATE ... WHERE` statement.

use std::time::Duration;

use async_trait::async_trait;
use sqlx::PgPool;
use tracing::{debug, error, instrument};

use super::{ClaimKey, ClaimOutcome, ClaimStore, COMPONENT};
use crate::error::{PipelineError, PipelineResult};

#[derive(Debug, Clone)]
pub struct PgClaimStore {
    pool: PgPool,
}

impl PgClaimStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Remove markers that expired more than `grace` ago
    pub async fn purge_expired(&self, grace: Duration) -> PipelineResult<u64> {
        let result = sqlx::query(
            "DELETE FROM mx_file_claims WHERE expires_at < NOW() - make_interval(secs => $1::double precision)",
        )
        .bind(grace.as_secs_f64())
        .execute(&self.pool)
        .await
        .map_err(|e| store_error("purge_expired", e))?;
        Ok(result.rows_affected())
    }
}

fn store_error(operation: &str, e: sqlx::Error) -> PipelineError {
    error!("Claim store {} failed: {}", operation, e);
    PipelineError::from_sqlx(COMPONENT, e)
}

#[async_trait]
impl ClaimStore for PgClaimStore {
    #[instrument(skip(self), fields(key = %key))]
    async fn try_claim(
        &self,
        key: &ClaimKey,
        owner: &str,
        ttl: Duration,
    ) -> PipelineResult<ClaimOutcome> {
        let claimed: Option<String> = sqlx::query_scalar(
            r#"
            INSERT INTO mx_file_claims (claim_key, owner, claimed_at, expires_at)
            VALUES ($1, $2, NOW(), NOW() + make_interval(secs => $3::double precision))
            ON CONFLICT (claim_key) DO UPDATE
                SET owner = EXCLUDED.owner,
                    claimed_at = EXCLUDED.claimed_at,
                    expires_at = EXCLUDED.expires_at
                WHERE mx_file_claims.expires_at <= NOW()
            RETURNING claim_key
            "#,
        )
        .bind(key.as_str())
        .bind(owner)
        .bind(ttl.as_secs_f64())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| store_error("try_claim", e))?;

        let outcome = if claimed.is_some() {
            ClaimOutcome::Acquired
        } else {
            ClaimOutcome::AlreadyClaimed
        };
        debug!(owner = %owner, outcome = ?outcome, "Claim attempted");
        Ok(outcome)
    }

    async fn extend(&self, key: &ClaimKey, owner: &str, ttl: Duration) -> PipelineResult<bool> {
        let result = sqlx::query(
            "UPDATE mx_file_claims SET expires_at = NOW() + make_interval(secs => $3::double precision) \
             WHERE claim_key = $1 AND owner = $2",
        )
        .bind(key.as_str())
        .bind(owner)
        .bind(ttl.as_secs_f64())
        .execute(&self.pool)
        .await
        .map_err(|e| store_error("extend", e))?;
        Ok(result.rows_affected() == 1)
    }

    async fn release(&self, key: &ClaimKey, owner: &str) -> PipelineResult<bool> {
        let result = sqlx::query("DELETE FROM mx_file_claims WHERE claim_key = $1 AND owner = $2")
            .bind(key.as_str())
            .bind(owner)
            .execute(&self.pool)
            .await
            .map_err(|e| store_error("release", e))?;
        Ok(result.rows_affected() == 1)
    }
}
