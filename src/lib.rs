#![allow(clippy::doc_markdown)] // Allow technical terms like PostgreSQL, SQLx in docs
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # MX Pipeline
//!
//! Coordination layer for ISO 20022 MX file ingestion.
//!
//! ## Overview
//!
//! Files dropped into an input directory are claimed exactly once across
//! competing instances, recorded in a process ledger, tagged with their
//! process id and passed through validation and a per-message-type
//! processor. Every stage shares one error policy that classifies failures
//! into unsupported, terminal, unlimited-retry and bounded-retry handling.
//!
//! ## Module Organization
//!
//! - [`claim`] - idempotent claim store and the changed-file read lock
//! - [`ledger`] - process records with a monotonic status
//! - [`state_machine`] - status ranks and the transition guard
//! - [`messaging`] - queue transport and the correlation envelope
//! - [`stages`] - ingestion, validation and type processors
//! - [`orchestration`] - error policy, consumers and bootstrap
//! - [`sinks`] - write-once output directories
//! - [`config`] - layered configuration
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use mx_pipeline::config::ConfigManager;
//! use mx_pipeline::orchestration::Pipeline;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ConfigManager::load()?.into_config();
//! mx_pipeline::logging::init_structured_logging(&config.logging);
//!
//! let pipeline = Pipeline::bootstrap(config).await?;
//! tokio::signal::ctrl_c().await?;
//! pipeline.shutdown().await;
//! # Ok(())
//! # }
//! ```
//!
//! ## Testing
//!
//! In-memory backends cover the full pipeline; PostgreSQL tests are ignored
//! unless `DATABASE_URL` points at a database with the pgmq extension:
//!
//! ```bash
//! cargo test                       # Unit and in-memory integration tests
//! cargo test -- --ignored          # PostgreSQL backends
//! ```

pub mod claim;
pub mod config;
pub mod constants;
pub mod context;
pub mod error;
pub mod ledger;
pub mod logging;
pub mod messaging;
pub mod models;
pub mod orchestration;
pub mod sinks;
pub mod stages;
pub mod state_machine;
pub mod utils;

pub use claim::{ClaimKey, ClaimOutcome, ClaimStore};
pub use config::{ConfigManager, PipelineConfig};
pub use context::CorrelationContext;
pub use error::{PipelineError, PipelineResult};
pub use ledger::ProcessLedger;
pub use messaging::{Envelope, MessagingService};
pub use models::{ProcessId, ProcessRecord};
pub use orchestration::{Pipeline, PipelineComponents, PipelineHandle};
pub use state_machine::ProcessStatus;
