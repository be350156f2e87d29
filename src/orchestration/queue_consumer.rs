//! # Queue Consumer
//!
//! Polling workers that feed one queue into one [`Route`]. Each delivery is
//! acknowledged once its route completes or routes it terminally; otherwise
//! it is hidden for the redelivery delay and comes back with an incremented
//! receive count.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, error, info, instrument, warn};

use super::route::{Route, RouteOutcome};
use crate::messaging::{Envelope, MessagingError, MessagingService, QueuedMessage};

#[derive(Clone)]
pub struct QueueConsumer {
    queue_name: String,
    route: Route,
    messaging: Arc<dyn MessagingService>,
    batch_size: usize,
    visibility_timeout: Duration,
    poll_interval: Duration,
}

impl std::fmt::Debug for QueueConsumer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueConsumer")
            .field("queue_name", &self.queue_name)
            .field("route_id", &self.route.route_id())
            .field("provider", &self.messaging.provider_name())
            .finish()
    }
}

impl QueueConsumer {
    pub fn new(
        queue_name: impl Into<String>,
        route: Route,
        messaging: Arc<dyn MessagingService>,
        batch_size: usize,
        visibility_timeout: Duration,
        poll_interval: Duration,
    ) -> Self {
        Self {
            queue_name: queue_name.into(),
            route,
            messaging,
            batch_size: batch_size.max(1),
            visibility_timeout,
            poll_interval,
        }
    }

    pub fn queue_name(&self) -> &str {
        &self.queue_name
    }

    /// Start `workers` concurrent polling loops. They stop after the current
    /// batch once `shutdown` flips to true.
    pub fn spawn(&self, workers: usize, shutdown: watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
        info!(
            queue = %self.queue_name,
            route_id = %self.route.route_id(),
            workers = workers,
            "🚀 Starting queue consumers"
        );
        (0..workers)
            .map(|worker| {
                let consumer = self.clone();
                let shutdown = shutdown.clone();
                tokio::spawn(async move { consumer.run(worker, shutdown).await })
            })
            .collect()
    }

    async fn run(&self, worker: usize, mut shutdown: watch::Receiver<bool>) {
        loop {
            if *shutdown.borrow() {
                break;
            }

            let idle = match self.poll_once().await {
                Ok(processed) => processed == 0,
                Err(e) => {
                    error!(
                        queue = %self.queue_name,
                        worker = worker,
                        error = %e,
                        "Error receiving from queue"
                    );
                    true
                }
            };

            if idle {
                tokio::select! {
                    _ = sleep(self.poll_interval) => {}
                    _ = shutdown.changed() => {}
                }
            }
        }
        debug!(queue = %self.queue_name, worker = worker, "🛑 Queue consumer stopped");
    }

    /// Receive and process one batch; returns how many deliveries were handled
    #[instrument(skip(self), fields(queue = %self.queue_name))]
    pub async fn poll_once(&self) -> Result<usize, MessagingError> {
        let messages = self
            .messaging
            .receive_json(&self.queue_name, self.batch_size, self.visibility_timeout)
            .await?;

        let count = messages.len();
        for message in messages {
            self.handle(message).await;
        }
        Ok(count)
    }

    async fn handle(&self, message: QueuedMessage<serde_json::Value>) {
        let QueuedMessage {
            receipt_handle,
            message: raw,
            receive_count,
            ..
        } = message;

        let outcome = match serde_json::from_value::<Envelope>(raw.clone()) {
            Ok(envelope) => self.route.run(envelope, receive_count).await,
            Err(e) => {
                warn!(queue = %self.queue_name, error = %e, "Undecodable envelope");
                self.route
                    .reject_unreadable(&raw, &e.to_string(), receive_count)
                    .await
            }
        };

        let settled = match outcome {
            RouteOutcome::Completed | RouteOutcome::Handled => {
                self.messaging.ack_message(&self.queue_name, &receipt_handle).await
            }
            RouteOutcome::Redeliver { delay } => {
                self.messaging
                    .retry_later(&self.queue_name, &receipt_handle, delay)
                    .await
            }
        };

        // the visibility timeout brings the message back if this fails
        if let Err(e) = settled {
            warn!(
                queue = %self.queue_name,
                receipt_handle = %receipt_handle,
                error = %e,
                "Failed to settle delivery; it will reappear after the visibility timeout"
            );
        }
    }
}
