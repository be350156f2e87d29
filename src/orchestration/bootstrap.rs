//! # Pipeline Bootstrap
//!
//! Builds the whole pipeline from a [`PipelineConfig`]: storage backends,
//! queues and directories, the shared error policy, one route per stage, the
//! queue consumers and the ingestion worker.
//!
//! - [`Pipeline::bootstrap`] picks backends from `backend.kind` and runs the
//!   migrations when PostgreSQL is selected
//! - [`Pipeline::with_components`] takes prebuilt backends, which is how tests
//!   and embedding applications inject in-memory doubles

use std::sync::Arc;

use sqlx::postgres::PgPoolOptions;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use super::error_classifier::StandardErrorClassifier;
use super::error_handler::ErrorHandler;
use super::ingestion_worker::IngestionWorker;
use super::queue_consumer::QueueConsumer;
use super::route::{configure_route, ErrorPolicy};
use super::BackoffCalculator;
use crate::claim::{ClaimStore, InMemoryClaimStore, PgClaimStore};
use crate::config::{BackendKind, ConfigurationError, PipelineConfig};
use crate::error::{PipelineError, PipelineResult};
use crate::ledger::{InMemoryProcessLedger, PgProcessLedger, ProcessLedger};
use crate::messaging::{InMemoryMessagingService, MessagingService, PgmqMessagingService};
use crate::sinks::OutputSinks;
use crate::stages::{IngestionStage, TypeProcessorRegistry, TypeProcessorStage, ValidationStage};

/// Storage and transport backends shared by every stage
#[derive(Clone)]
pub struct PipelineComponents {
    pub ledger: Arc<dyn ProcessLedger>,
    pub claims: Arc<dyn ClaimStore>,
    pub messaging: Arc<dyn MessagingService>,
    pub processors: TypeProcessorRegistry,
}

impl std::fmt::Debug for PipelineComponents {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineComponents")
            .field("messaging", &self.messaging.provider_name())
            .finish()
    }
}

impl PipelineComponents {
    /// In-memory backends with the built-in type processors
    pub fn in_memory() -> Self {
        Self {
            ledger: Arc::new(InMemoryProcessLedger::new()),
            claims: Arc::new(InMemoryClaimStore::new()),
            messaging: Arc::new(InMemoryMessagingService::new()),
            processors: TypeProcessorRegistry::with_defaults(),
        }
    }

    /// PostgreSQL ledger and claims plus pgmq transport over one pool
    pub async fn postgres(config: &PipelineConfig) -> PipelineResult<Self> {
        let database_url = config.backend.database_url.as_deref().ok_or_else(|| {
            ConfigurationError::missing_required_field("database_url", "backend")
        })?;

        let pool = PgPoolOptions::new()
            .max_connections(config.backend.max_connections)
            .acquire_timeout(config.backend.acquire_timeout())
            .connect(database_url)
            .await
            .map_err(|e| {
                error!(error = %e, "Failed to connect to the pipeline database");
                PipelineError::from_sqlx("database", e)
            })?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|e| {
                error!(error = %e, "Failed to run pipeline migrations");
                PipelineError::unexpected(format!("migrations: {e}"))
            })?;
        info!("💾 Database migrations applied");

        Ok(Self {
            ledger: Arc::new(PgProcessLedger::new(pool.clone())),
            claims: Arc::new(PgClaimStore::new(pool.clone())),
            messaging: Arc::new(PgmqMessagingService::new_with_pool(pool)),
            processors: TypeProcessorRegistry::with_defaults(),
        })
    }
}

pub struct Pipeline;

impl Pipeline {
    /// Build backends from `config.backend` and start the pipeline
    pub async fn bootstrap(config: PipelineConfig) -> PipelineResult<PipelineHandle> {
        let components = match config.backend.kind {
            BackendKind::InMemory => {
                warn!("Using in-memory backends; state is lost on restart and not shared between instances");
                PipelineComponents::in_memory()
            }
            BackendKind::Postgres => PipelineComponents::postgres(&config).await?,
        };
        Self::with_components(config, components).await
    }

    /// Start the pipeline on prebuilt backends
    pub async fn with_components(
        config: PipelineConfig,
        components: PipelineComponents,
    ) -> PipelineResult<PipelineHandle> {
        config.validate()?;
        components
            .processors
            .ensure_covers(&config.queues.message_types)?;

        for directory in config.files.all_directories() {
            tokio::fs::create_dir_all(directory)
                .await
                .map_err(|e| PipelineError::io("create directory", directory, e))?;
        }
        let sinks = OutputSinks::from_config(&config.files);
        sinks.ensure_roots().await?;

        let PipelineComponents {
            ledger,
            claims,
            messaging,
            processors,
        } = components;

        let mut queue_names = vec![
            config.queues.validator.clone(),
            config.queues.dead_letter.clone(),
        ];
        queue_names.extend(config.queues.message_types.iter().map(|r| r.queue.clone()));
        for queue in &queue_names {
            messaging.ensure_queue(queue).await?;
        }

        let backoff = BackoffCalculator::new((&config.redelivery).into());
        let handler = ErrorHandler::new(
            ledger.clone(),
            messaging.clone(),
            sinks.clone(),
            config.queues.dead_letter.clone(),
        );
        let policy = Arc::new(ErrorPolicy::new(
            Arc::new(StandardErrorClassifier::new(backoff.clone())),
            handler,
            backoff,
            config.redelivery.max_attempts,
        ));

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let mut workers = Vec::new();

        let consumer = |queue: &str, route| {
            QueueConsumer::new(
                queue,
                route,
                messaging.clone(),
                config.queues.batch_size,
                config.queues.visibility_timeout(),
                config.queues.poll_interval(),
            )
        };

        let validation = Arc::new(ValidationStage::new(
            ledger.clone(),
            messaging.clone(),
            config.queues.clone(),
            config.files.accepted_extension.clone(),
        ));
        workers.extend(
            consumer(
                &config.queues.validator,
                configure_route(validation, policy.clone()),
            )
            .spawn(config.consumers.validator, shutdown_rx.clone()),
        );

        for route in &config.queues.message_types {
            let processor = processors.get(&route.id).ok_or_else(|| {
                ConfigurationError::invalid_value(
                    "queues.message_types",
                    route.id.as_str(),
                    "no type processor registered",
                )
            })?;
            let stage = Arc::new(TypeProcessorStage::new(
                processor,
                ledger.clone(),
                sinks.success.clone(),
            ));
            workers.extend(
                consumer(&route.queue, configure_route(stage, policy.clone()))
                    .spawn(config.consumers.message_types, shutdown_rx.clone()),
            );
        }

        let ingestion = Arc::new(IngestionStage::new(
            ledger,
            claims,
            messaging.clone(),
            policy,
            &config,
        ));
        let worker = Arc::new(IngestionWorker::new(
            ingestion,
            &config.files.input,
            config.claim.check_interval(),
            config.consumers.ingest_max_in_flight,
        ));
        workers.push(worker.spawn(shutdown_rx));

        info!(
            provider = messaging.provider_name(),
            input = %config.files.input.display(),
            message_types = config.queues.message_types.len(),
            workers = workers.len(),
            "✅ Pipeline started"
        );

        Ok(PipelineHandle {
            shutdown_tx,
            workers,
        })
    }
}

/// Running pipeline; dropping it without [`PipelineHandle::shutdown`]
/// leaves the workers running until the runtime stops
#[derive(Debug)]
pub struct PipelineHandle {
    shutdown_tx: watch::Sender<bool>,
    workers: Vec<JoinHandle<()>>,
}

impl PipelineHandle {
    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Signal every worker and wait for them to stop
    pub async fn shutdown(self) {
        info!("🛑 Pipeline shutdown requested");
        let _ = self.shutdown_tx.send(true);
        for worker in self.workers {
            if let Err(e) = worker.await {
                error!(error = %e, "Pipeline worker ended abnormally");
            }
        }
        info!("✅ Pipeline stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{FilesConfig, MessageTypeRoute};

    #[tokio::test]
    async fn starts_and_stops_on_in_memory_backends() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = PipelineConfig::default();
        config.files = FilesConfig::rooted_at(dir.path());

        let handle = Pipeline::with_components(config.clone(), PipelineComponents::in_memory())
            .await
            .unwrap();
        // validator + type processors + ingestion worker
        let expected = config.consumers.validator
            + config.consumers.message_types * config.queues.message_types.len()
            + 1;
        assert_eq!(handle.worker_count(), expected);
        assert!(config.files.error.is_dir());
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn routes_without_processors_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = PipelineConfig::default();
        config.files = FilesConfig::rooted_at(dir.path());
        config.queues.message_types.push(MessageTypeRoute {
            id: "camt.053.001.08".to_string(),
            queue: "mx_camt_053_001_08".to_string(),
        });

        let error = Pipeline::with_components(config, PipelineComponents::in_memory())
            .await
            .unwrap_err();
        assert!(matches!(error, PipelineError::Configuration(_)));
    }
}
