//! # Terminal Routing
//!
//! What happens to a message once redelivery is over: the ledger records
//! the terminal status, then the message lands in the unsupported sink, or
//! in both the dead-letter queue and the error sink.
//!
//! Sink delivery is best effort. A failed sink write is logged and never
//! re-enters the redelivery policy. Only a ledger outage is reported back
//! to the caller, so the message can be redelivered once the store returns.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use tracing::{error, info, warn};

use crate::error::{PipelineError, PipelineResult};
use crate::ledger::ProcessLedger;
use crate::logging::log_error;
use crate::messaging::{DeadLetterMessage, Envelope, MessagingService, MessagingServiceExt};
use crate::models::ProcessId;
use crate::sinks::{FileSink, OutputSinks};
use crate::state_machine::ProcessStatus;
use crate::utils::tag_file_name;

/// Everything terminal routing needs to know about a failed message
#[derive(Debug, Clone, PartialEq)]
pub struct FailedMessage {
    pub process_id: Option<ProcessId>,
    pub route_id: String,
    pub original_file_name: String,
    pub tagged_file_name: Option<String>,
    pub payload: String,
}

impl FailedMessage {
    pub fn from_envelope(route_id: &str, envelope: &Envelope) -> Self {
        Self {
            process_id: Some(envelope.process_id()),
            route_id: route_id.to_string(),
            original_file_name: envelope.headers.original_file_name.clone(),
            tagged_file_name: Some(envelope.headers.updated_file_name.clone()),
            payload: envelope.payload.clone(),
        }
    }

    /// Name used in the unsupported and error sinks
    pub fn sink_file_name(&self) -> String {
        if let Some(tagged) = &self.tagged_file_name {
            return tagged.clone();
        }
        if let Some(process_id) = self.process_id {
            if let Ok(tagged) = tag_file_name(&self.original_file_name, process_id) {
                return tagged;
            }
        }
        format!("{}_{}", uuid::Uuid::new_v4(), self.original_file_name)
    }
}

#[derive(Clone)]
pub struct ErrorHandler {
    ledger: Arc<dyn ProcessLedger>,
    messaging: Arc<dyn MessagingService>,
    sinks: OutputSinks,
    dead_letter_queue: String,
}

impl std::fmt::Debug for ErrorHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ErrorHandler")
            .field("messaging", &self.messaging.provider_name())
            .field("sinks", &self.sinks)
            .field("dead_letter_queue", &self.dead_letter_queue)
            .finish()
    }
}

impl ErrorHandler {
    pub fn new(
        ledger: Arc<dyn ProcessLedger>,
        messaging: Arc<dyn MessagingService>,
        sinks: OutputSinks,
        dead_letter_queue: impl Into<String>,
    ) -> Self {
        Self {
            ledger,
            messaging,
            sinks,
            dead_letter_queue: dead_letter_queue.into(),
        }
    }

    /// Ledger UNSUPPORTED, then the unsupported sink
    pub async fn route_unsupported(
        &self,
        failed: &FailedMessage,
        cause: &PipelineError,
    ) -> PipelineResult<()> {
        self.record_terminal_status(failed, ProcessStatus::Unsupported)
            .await?;

        info!(
            process_id = failed.process_id.map(|id| id.get()),
            route_id = %failed.route_id,
            reason = %cause,
            "🚫 Routing message to unsupported sink"
        );
        self.write_sink_file(&self.sinks.unsupported, failed).await;
        Ok(())
    }

    /// Ledger FAILED, then the dead-letter queue and error sink concurrently
    pub async fn route_failure(
        &self,
        failed: &FailedMessage,
        cause: &PipelineError,
    ) -> PipelineResult<()> {
        self.record_terminal_status(failed, ProcessStatus::Failed)
            .await?;

        let dead_letter = DeadLetterMessage {
            process_id: failed.process_id,
            route_id: failed.route_id.clone(),
            file_name: failed
                .tagged_file_name
                .clone()
                .unwrap_or_else(|| failed.original_file_name.clone()),
            error_code: cause.error_code().to_string(),
            error_message: cause.to_string(),
            payload: failed.payload.clone(),
            failed_at: Utc::now(),
        };

        let (queued, _) = tokio::join!(
            self.messaging.send(&self.dead_letter_queue, &dead_letter),
            self.write_sink_file(&self.sinks.error, failed),
        );
        match queued {
            Ok(message_id) => info!(
                process_id = failed.process_id.map(|id| id.get()),
                route_id = %failed.route_id,
                queue = %self.dead_letter_queue,
                message_id = %message_id,
                error_code = cause.error_code(),
                "☠️ Message delivered to dead-letter queue"
            ),
            Err(e) => log_error(
                "error_handler",
                "dead_letter_send",
                &e.to_string(),
                Some(&format!(
                    "process_id={:?} route_id={}",
                    failed.process_id.map(|id| id.get()),
                    failed.route_id
                )),
            ),
        }
        Ok(())
    }

    /// Only an unreachable ledger is propagated
    async fn record_terminal_status(
        &self,
        failed: &FailedMessage,
        status: ProcessStatus,
    ) -> PipelineResult<()> {
        let Some(process_id) = failed.process_id else {
            warn!(
                route_id = %failed.route_id,
                file_name = %failed.original_file_name,
                status = %status,
                "Terminal message carries no process id, ledger not updated"
            );
            return Ok(());
        };

        match self.ledger.update_status(process_id, status).await {
            Ok(_) => Ok(()),
            Err(e @ PipelineError::InfrastructureUnavailable { .. }) => Err(e),
            Err(e) => {
                warn!(
                    process_id = process_id.get(),
                    route_id = %failed.route_id,
                    status = %status,
                    error = %e,
                    "Ledger refused terminal status, continuing with sink routing"
                );
                Ok(())
            }
        }
    }

    async fn write_sink_file(&self, sink: &FileSink, failed: &FailedMessage) {
        let name = PathBuf::from(failed.sink_file_name());
        if let Err(e) = sink.write_once(&name, failed.payload.as_bytes()).await {
            error!(
                sink = sink.name(),
                process_id = failed.process_id.map(|id| id.get()),
                route_id = %failed.route_id,
                error = %e,
                "Failed to write terminal sink file"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FilesConfig;
    use crate::ledger::InMemoryProcessLedger;
    use crate::messaging::InMemoryMessagingService;

    const DLQ: &str = "swift-dead-letter";

    struct Fixture {
        _dir: tempfile::TempDir,
        files: FilesConfig,
        ledger: Arc<InMemoryProcessLedger>,
        messaging: Arc<InMemoryMessagingService>,
        handler: ErrorHandler,
    }

    async fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let files = FilesConfig::rooted_at(dir.path());
        let ledger = Arc::new(InMemoryProcessLedger::new());
        let messaging = Arc::new(InMemoryMessagingService::new());
        messaging.ensure_queue(DLQ).await.unwrap();
        let handler = ErrorHandler::new(
            ledger.clone(),
            messaging.clone(),
            OutputSinks::from_config(&files),
            DLQ,
        );
        Fixture {
            _dir: dir,
            files,
            ledger,
            messaging,
            handler,
        }
    }

    fn failed(process_id: Option<ProcessId>) -> FailedMessage {
        FailedMessage {
            process_id,
            route_id: "mx-validation".to_string(),
            original_file_name: "bad.xml".to_string(),
            tagged_file_name: process_id.map(|id| format!("$${id}$$bad.xml")),
            payload: "<a><b>x</a>".to_string(),
        }
    }

    #[tokio::test]
    async fn failure_fans_out_to_dead_letter_and_error_sink() {
        let fx = fixture().await;
        let record = fx.ledger.create("bad.xml", "<a><b>x</a>").await.unwrap();
        let message = failed(Some(record.id));

        fx.handler
            .route_failure(&message, &PipelineError::malformed_xml("XML is not well-formed"))
            .await
            .unwrap();

        let stored = fx.ledger.find_by_id(record.id).await.unwrap();
        assert_eq!(stored.status, ProcessStatus::Failed);
        assert_eq!(fx.messaging.queue_length(DLQ).await, 1);
        let dead = &fx.messaging.peek_all(DLQ).await[0];
        assert_eq!(dead["error_code"], "MALFORMED_XML");
        assert!(fx
            .files
            .error
            .join(format!("$${}$$bad.xml", record.id))
            .exists());
    }

    #[tokio::test]
    async fn dead_letter_outage_does_not_block_error_sink() {
        let fx = fixture().await;
        let record = fx.ledger.create("bad.xml", "x").await.unwrap();
        fx.messaging.set_reachable(false);

        fx.handler
            .route_failure(&failed(Some(record.id)), &PipelineError::unexpected("boom"))
            .await
            .unwrap();

        assert!(fx
            .files
            .error
            .join(format!("$${}$$bad.xml", record.id))
            .exists());
    }

    #[tokio::test]
    async fn ledger_outage_is_reported_for_redelivery() {
        let fx = fixture().await;
        let record = fx.ledger.create("bad.xml", "x").await.unwrap();
        fx.ledger.set_reachable(false);

        let result = fx
            .handler
            .route_unsupported(&failed(Some(record.id)), &PipelineError::unsupported("nope"))
            .await;
        assert!(matches!(
            result,
            Err(PipelineError::InfrastructureUnavailable { .. })
        ));
        assert!(!fx.files.unsupported.exists());
    }

    #[tokio::test]
    async fn rejected_unsupported_transition_still_routes() {
        let fx = fixture().await;
        let record = fx.ledger.create("x.txt", "x").await.unwrap();
        fx.ledger
            .update_status(record.id, ProcessStatus::Failed)
            .await
            .unwrap();

        fx.handler
            .route_unsupported(&failed(Some(record.id)), &PipelineError::unsupported("nope"))
            .await
            .unwrap();
        assert!(fx
            .files
            .unsupported
            .join(format!("$${}$$bad.xml", record.id))
            .exists());
    }

    #[test]
    fn anonymous_failures_get_unique_sink_names() {
        let message = failed(None);
        let a = message.sink_file_name();
        let b = message.sink_file_name();
        assert_ne!(a, b);
        assert!(a.ends_with("_bad.xml"));
    }
}
