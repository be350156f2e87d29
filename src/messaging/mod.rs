//! # Messaging Module
//!
//! Queue transport between pipeline stages: the provider-agnostic service
//! trait, an in-memory provider and a pgmq provider, plus the envelope and
//! dead-letter message types.

pub mod errors;
pub mod in_memory;
pub mod message;
pub mod pgmq_client;
pub mod service;
pub mod types;

pub use errors::MessagingError;
pub use in_memory::InMemoryMessagingService;
pub use message::{DeadLetterMessage, Envelope, EnvelopeHeaders};
pub use pgmq_client::PgmqMessagingService;
pub use service::{MessagingService, MessagingServiceExt};
pub use types::{MessageId, QueuedMessage, ReceiptHandle};
