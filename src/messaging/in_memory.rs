//! # In-Memory Messaging Service
//!
//! Thread-safe in-memory queues for tests and single-process deployments.
//!
//! ## Features
//!
//! - **Visibility Timeout**: Messages become invisible after receive, re-visible after timeout
//! - **Delayed Redelivery**: `retry_later` hides a message for the backoff delay
//! - **Outage Simulation**: `set_reachable(false)` makes every call fail as a connection failure

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use super::errors::MessagingError;
use super::service::MessagingService;
use super::types::{MessageId, QueuedMessage, ReceiptHandle};

#[derive(Debug, Clone)]
struct InMemoryQueuedMessage {
    id: u64,
    payload: serde_json::Value,
    enqueued_at: DateTime<Utc>,
    /// When the message becomes visible again (None = visible now)
    visible_at: Option<DateTime<Utc>>,
    receive_count: u32,
}

#[derive(Debug, Default)]
struct InMemoryQueue {
    messages: VecDeque<InMemoryQueuedMessage>,
    total_sent: u64,
    total_acked: u64,
}

fn to_chrono(duration: Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or_else(|_| chrono::Duration::days(365))
}

/// In-memory messaging service
///
/// Messages are stored in a `VecDeque` per queue; message ids are unique
/// across all queues of one service instance.
#[derive(Debug)]
pub struct InMemoryMessagingService {
    queues: RwLock<HashMap<String, InMemoryQueue>>,
    next_id: AtomicU64,
    reachable: AtomicBool,
}

impl Default for InMemoryMessagingService {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryMessagingService {
    pub fn new() -> Self {
        Self {
            queues: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            reachable: AtomicBool::new(true),
        }
    }

    /// Simulate the transport going away and coming back
    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }

    fn check_reachable(&self) -> Result<(), MessagingError> {
        if self.reachable.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(MessagingError::unavailable("in-memory transport is offline"))
        }
    }

    /// Number of messages in a queue, visible or not (for testing)
    pub async fn queue_length(&self, queue_name: &str) -> usize {
        let queues = self.queues.read().await;
        queues
            .get(queue_name)
            .map(|q| q.messages.len())
            .unwrap_or(0)
    }

    /// Copies of every payload currently held by a queue (for testing)
    pub async fn peek_all(&self, queue_name: &str) -> Vec<serde_json::Value> {
        let queues = self.queues.read().await;
        queues
            .get(queue_name)
            .map(|q| q.messages.iter().map(|m| m.payload.clone()).collect())
            .unwrap_or_default()
    }

    /// Total sends and acknowledgements recorded for a queue
    pub async fn counters(&self, queue_name: &str) -> (u64, u64) {
        let queues = self.queues.read().await;
        queues
            .get(queue_name)
            .map(|q| (q.total_sent, q.total_acked))
            .unwrap_or((0, 0))
    }

    fn parse_handle(receipt_handle: &ReceiptHandle) -> Result<u64, MessagingError> {
        receipt_handle
            .as_str()
            .parse()
            .map_err(|_| MessagingError::invalid_receipt_handle(receipt_handle.as_str()))
    }
}

#[async_trait]
impl MessagingService for InMemoryMessagingService {
    async fn ensure_queue(&self, queue_name: &str) -> Result<(), MessagingError> {
        self.check_reachable()?;
        let mut queues = self.queues.write().await;
        queues.entry(queue_name.to_string()).or_default();
        Ok(())
    }

    async fn send_json(
        &self,
        queue_name: &str,
        payload: serde_json::Value,
    ) -> Result<MessageId, MessagingError> {
        self.check_reachable()?;
        let mut queues = self.queues.write().await;
        let queue = queues
            .get_mut(queue_name)
            .ok_or_else(|| MessagingError::queue_not_found(queue_name))?;

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        queue.total_sent += 1;
        queue.messages.push_back(InMemoryQueuedMessage {
            id,
            payload,
            enqueued_at: Utc::now(),
            visible_at: None,
            receive_count: 0,
        });

        Ok(MessageId::from(id))
    }

    async fn receive_json(
        &self,
        queue_name: &str,
        max_messages: usize,
        visibility_timeout: Duration,
    ) -> Result<Vec<QueuedMessage<serde_json::Value>>, MessagingError> {
        self.check_reachable()?;
        let mut queues = self.queues.write().await;
        let queue = queues
            .get_mut(queue_name)
            .ok_or_else(|| MessagingError::queue_not_found(queue_name))?;

        let now = Utc::now();
        let visible_until = now + to_chrono(visibility_timeout);
        let mut received = Vec::new();

        for msg in queue.messages.iter_mut() {
            if received.len() >= max_messages {
                break;
            }

            let is_visible = msg.visible_at.map(|vt| vt <= now).unwrap_or(true);
            if is_visible {
                msg.visible_at = Some(visible_until);
                msg.receive_count += 1;
                received.push(QueuedMessage {
                    receipt_handle: ReceiptHandle::new(msg.id.to_string()),
                    message: msg.payload.clone(),
                    receive_count: msg.receive_count,
                    enqueued_at: msg.enqueued_at,
                });
            }
        }

        Ok(received)
    }

    async fn ack_message(
        &self,
        queue_name: &str,
        receipt_handle: &ReceiptHandle,
    ) -> Result<(), MessagingError> {
        self.check_reachable()?;
        let message_id = Self::parse_handle(receipt_handle)?;

        let mut queues = self.queues.write().await;
        let queue = queues
            .get_mut(queue_name)
            .ok_or_else(|| MessagingError::queue_not_found(queue_name))?;

        if let Some(pos) = queue.messages.iter().position(|m| m.id == message_id) {
            queue.messages.remove(pos);
            queue.total_acked += 1;
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
        self.check_reachable()?;
        let message_id = Self::parse_handle(receipt_handle)?;

        let mut queues = self.queues.write().await;
        let queue = queues
            .get_mut(queue_name)
            .ok_or_else(|| MessagingError::queue_not_found(queue_name))?;

        match queue.messages.iter_mut().find(|m| m.id == message_id) {
            Some(msg) => {
                msg.visible_at = Some(Utc::now() + to_chrono(delay));
                Ok(())
            }
            None => Err(MessagingError::message_not_found(message_id.to_string())),
        }
    }

    async fn queue_depth(&self, queue_name: &str) -> Result<u64, MessagingError> {
        self.check_reachable()?;
        let queues = self.queues.read().await;
        queues
            .get(queue_name)
            .map(|q| q.messages.len() as u64)
            .ok_or_else(|| MessagingError::queue_not_found(queue_name))
    }

    fn provider_name(&self) -> &'static str {
        "in_memory"
    }
}
