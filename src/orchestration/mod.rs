//! # Orchestration
//!
//! Everything between the stages: error classification and backoff, the
//! shared error policy and terminal routing, queue consumers, the ingestion
//! worker and pipeline bootstrap.
//!
//! ## Core Components
//!
//! - **StandardErrorClassifier**: maps a [`crate::error::PipelineError`] and
//!   its attempt number to retry or terminal handling
//! - **BackoffCalculator**: exponential redelivery delay with jitter
//! - **ErrorHandler**: terminal routing to the ledger, dead-letter queue and
//!   file sinks
//! - **ErrorPolicy / Route**: one policy shared by every stage route
//! - **QueueConsumer / IngestionWorker**: the polling loops
//! - **Pipeline**: wiring and lifecycle

pub mod backoff_calculator;
pub mod bootstrap;
pub mod error_classifier;
pub mod error_handler;
pub mod ingestion_worker;
pub mod queue_consumer;
pub mod route;

pub use backoff_calculator::{BackoffCalculator, BackoffCalculatorConfig};
pub use bootstrap::{Pipeline, PipelineComponents, PipelineHandle};
pub use error_classifier::{
    ErrorClass, ErrorClassification, ErrorClassifier, ErrorContext, StandardErrorClassifier,
};
pub use error_handler::{ErrorHandler, FailedMessage};
pub use ingestion_worker::{IngestionWorker, TickSummary};
pub use queue_consumer::QueueConsumer;
pub use route::{configure_route, ErrorPolicy, PolicyOutcome, Route, RouteOutcome};
