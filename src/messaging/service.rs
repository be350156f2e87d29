//! # Messaging Service Trait
//!
//! Object-safe queue abstraction used at every stage boundary. Payloads cross
//! the trait as JSON; [`MessagingServiceExt`] layers typed helpers on top.

use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;

use super::errors::MessagingError;
use super::types::{MessageId, QueuedMessage, ReceiptHandle};

#[async_trait]
pub trait MessagingService: Send + Sync + 'static {
    /// Create the queue if it does not exist
    async fn ensure_queue(&self, queue_name: &str) -> Result<(), MessagingError>;

    async fn send_json(
        &self,
        queue_name: &str,
        payload: serde_json::Value,
    ) -> Result<MessageId, MessagingError>;

    /// Receive up to `max_messages`, hiding them for `visibility_timeout`
    async fn receive_json(
        &self,
        queue_name: &str,
        max_messages: usize,
        visibility_timeout: Duration,
    ) -> Result<Vec<QueuedMessage<serde_json::Value>>, MessagingError>;

    /// Remove a processed message
    async fn ack_message(
        &self,
        queue_name: &str,
        receipt_handle: &ReceiptHandle,
    ) -> Result<(), MessagingError>;

    /// Keep a received message invisible for `delay`, after which it is
    /// redelivered with an incremented receive count
    async fn retry_later(
        &self,
        queue_name: &str,
        receipt_handle: &ReceiptHandle,
        delay: Duration,
    ) -> Result<(), MessagingError>;

    /// Number of messages in the queue, visible or not
    async fn queue_depth(&self, queue_name: &str) -> Result<u64, MessagingError>;

    fn provider_name(&self) -> &'static str;
}

/// Typed send/receive over any [`MessagingService`]
#[async_trait]
pub trait MessagingServiceExt: MessagingService {
    async fn send<T: Serialize + Sync>(
        &self,
        queue_name: &str,
        message: &T,
    ) -> Result<MessageId, MessagingError> {
        let payload = serde_json::to_value(message)
            .map_err(|e| MessagingError::message_serialization(e.to_string()))?;
        self.send_json(queue_name, payload).await
    }

    async fn receive<T: DeserializeOwned + Send>(
        &self,
        queue_name: &str,
        max_messages: usize,
        visibility_timeout: Duration,
    ) -> Result<Vec<QueuedMessage<T>>, MessagingError> {
        let received = self
            .receive_json(queue_name, max_messages, visibility_timeout)
            .await?;
        received
            .into_iter()
            .map(|msg| {
                let QueuedMessage {
                    receipt_handle,
                    message,
                    receive_count,
                    enqueued_at,
                } = msg;
                serde_json::from_value(message)
                    .map(|message| QueuedMessage {
                        receipt_handle,
                        message,
                        receive_count,
                        enqueued_at,
                    })
                    .map_err(|e| MessagingError::message_deserialization(e.to_string()))
            })
            .collect()
    }
}

impl<S: MessagingService + ?Sized> MessagingServiceExt for S {}
