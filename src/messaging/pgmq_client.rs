//! # PostgreSQL Message Queue Provider
//!
//! [`MessagingService`] over the pgmq extension, called through its SQL API on
//! a shared `sqlx` pool. Redelivery delays map onto `pgmq.set_vt`, so the
//! receive count survives process restarts.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tracing::{debug, info};

use super::errors::MessagingError;
use super::service::MessagingService;
use super::types::{MessageId, QueuedMessage, ReceiptHandle};

/// pgmq works in whole seconds; round up so a delay never shrinks to zero
fn whole_seconds(duration: Duration) -> i32 {
    let secs = duration.as_secs() + u64::from(duration.subsec_nanos() > 0);
    i32::try_from(secs).unwrap_or(i32::MAX)
}

#[derive(Debug, Clone)]
pub struct PgmqMessagingService {
    pool: PgPool,
}

impl PgmqMessagingService {
    /// Create a provider on an existing connection pool
    pub fn new_with_pool(pool: PgPool) -> Self {
        info!("🚀 Creating pgmq messaging service with shared connection pool");
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    fn receipt_id(receipt_handle: &ReceiptHandle) -> Result<i64, MessagingError> {
        receipt_handle
            .as_i64()
            .ok_or_else(|| MessagingError::invalid_receipt_handle(receipt_handle.as_str()))
    }
}

#[async_trait]
impl MessagingService for PgmqMessagingService {
    async fn ensure_queue(&self, queue_name: &str) -> Result<(), MessagingError> {
        debug!("📋 Creating queue: {}", queue_name);
        sqlx::query("SELECT pgmq.create($1::text)")
            .bind(queue_name)
            .execute(&self.pool)
            .await
            .map_err(|e| MessagingError::from_sqlx("pgmq.create", e))?;
        Ok(())
    }

    async fn send_json(
        &self,
        queue_name: &str,
        payload: serde_json::Value,
    ) -> Result<MessageId, MessagingError> {
        let message_id: i64 = sqlx::query_scalar("SELECT pgmq.send($1::text, $2::jsonb)")
            .bind(queue_name)
            .bind(payload)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| MessagingError::from_sqlx("pgmq.send", e))?;

        debug!(queue = queue_name, message_id, "📤 Message sent");
        Ok(MessageId::from(message_id))
    }

    async fn receive_json(
        &self,
        queue_name: &str,
        max_messages: usize,
        visibility_timeout: Duration,
    ) -> Result<Vec<QueuedMessage<serde_json::Value>>, MessagingError> {
        let rows: Vec<(i64, i32, DateTime<Utc>, serde_json::Value)> = sqlx::query_as(
            "SELECT msg_id, read_ct, enqueued_at, message \
             FROM pgmq.read($1::text, $2::integer, $3::integer)",
        )
        .bind(queue_name)
        .bind(whole_seconds(visibility_timeout).max(1))
        .bind(i32::try_from(max_messages).unwrap_or(i32::MAX))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| MessagingError::from_sqlx("pgmq.read", e))?;

        if !rows.is_empty() {
            debug!(queue = queue_name, count = rows.len(), "📨 Read messages");
        }

        Ok(rows
            .into_iter()
            .map(|(msg_id, read_ct, enqueued_at, message)| QueuedMessage {
                receipt_handle: ReceiptHandle::new(msg_id.to_string()),
                message,
                receive_count: u32::try_from(read_ct).unwrap_or(0),
                enqueued_at,
            })
            .collect())
    }

    async fn ack_message(
        &self,
        queue_name: &str,
        receipt_handle: &ReceiptHandle,
    ) -> Result<(), MessagingError> {
        let message_id = Self::receipt_id(receipt_handle)?;
        let deleted: bool = sqlx::query_scalar("SELECT pgmq.delete($1::text, $2::bigint)")
            .bind(queue_name)
            .bind(message_id)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| MessagingError::from_sqlx("pgmq.delete", e))?;

        if deleted {
            debug!(queue = queue_name, message_id, "🗑️ Message deleted");
            Ok(())
        } else {
            Err(MessagingError::message_not_found(message_id.to_string()))
        }
    }

    async fn retry_later(
        &self,
        queue_name: &str,
        receipt_handle: &ReceiptHandle,
        delay: Duration,
    ) -> Result<(), MessagingError> {
        let message_id = Self::receipt_id(receipt_handle)?;
        let updated: Option<i64> = sqlx::query_scalar(
            "SELECT msg_id FROM pgmq.set_vt($1::text, $2::bigint, $3::integer)",
        )
        .bind(queue_name)
        .bind(message_id)
        .bind(whole_seconds(delay))
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| MessagingError::from_sqlx("pgmq.set_vt", e))?;

        updated
            .map(|_| ())
            .ok_or_else(|| MessagingError::message_not_found(message_id.to_string()))
    }

    async fn queue_depth(&self, queue_name: &str) -> Result<u64, MessagingError> {
        let length: i64 = sqlx::query_scalar("SELECT queue_length FROM pgmq.metrics($1::text)")
            .bind(queue_name)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| MessagingError::from_sqlx("pgmq.metrics", e))?;
        Ok(u64::try_from(length).unwrap_or(0))
    }

    fn provider_name(&self) -> &'static str {
        "pgmq"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delays_round_up_to_whole_seconds() {
        assert_eq!(whole_seconds(Duration::ZERO), 0);
        assert_eq!(whole_seconds(Duration::from_millis(1)), 1);
        assert_eq!(whole_seconds(Duration::from_millis(1500)), 2);
        assert_eq!(whole_seconds(Duration::from_secs(60)), 60);
    }
}
