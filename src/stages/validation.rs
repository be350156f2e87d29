//! Validation stage: extension, well-formedness, message type, then routing
//! to the type's processing queue.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use super::{advance_status, Stage};
use crate::config::QueuesConfig;
use crate::constants::routes;
use crate::error::{PipelineError, PipelineResult};
use crate::ledger::ProcessLedger;
use crate::logging::log_stage_operation;
use crate::messaging::{Envelope, MessagingService, MessagingServiceExt};
use crate::state_machine::ProcessStatus;
use crate::utils::{has_extension, identify_message_type, is_well_formed};

pub struct ValidationStage {
    ledger: Arc<dyn ProcessLedger>,
    messaging: Arc<dyn MessagingService>,
    queues: QueuesConfig,
    accepted_extension: String,
}

impl ValidationStage {
    pub fn new(
        ledger: Arc<dyn ProcessLedger>,
        messaging: Arc<dyn MessagingService>,
        queues: QueuesConfig,
        accepted_extension: impl Into<String>,
    ) -> Self {
        Self {
            ledger,
            messaging,
            queues,
            accepted_extension: accepted_extension.into(),
        }
    }
}

#[async_trait]
impl Stage for ValidationStage {
    fn route_id(&self) -> &str {
        routes::VALIDATION
    }

    async fn process(&self, mut envelope: Envelope) -> PipelineResult<()> {
        let original_name = envelope.headers.original_file_name.clone();
        if !has_extension(&original_name, &self.accepted_extension) {
            return Err(PipelineError::unsupported(format!(
                "Unsupported file extension: '{original_name}'"
            )));
        }

        if !is_well_formed(Some(&envelope.payload)) {
            return Err(PipelineError::malformed_xml("XML is not well-formed"));
        }

        let message_type_id = identify_message_type(&envelope.payload);
        envelope.set_message_type_id(Some(&message_type_id));
        let queue = self
            .queues
            .queue_for(envelope.message_type_id())
            .ok_or_else(|| {
                PipelineError::unsupported(format!(
                    "Message is not a supported type='{}'",
                    envelope.message_type_id()
                ))
            })?
            .to_string();

        let process_id = envelope.process_id();
        advance_status(self.ledger.as_ref(), process_id, ProcessStatus::Validated).await?;
        envelope.set_status(ProcessStatus::Validated);

        debug!(
            queue = %queue,
            message_type_id = %envelope.message_type_id(),
            "📤 Sending to queue"
        );
        let message_id = self.messaging.send(&queue, &envelope).await?;
        debug!(queue = %queue, message_id = %message_id, "📤 Sent");

        log_stage_operation(
            routes::VALIDATION,
            Some(process_id),
            ProcessStatus::Validated,
            Some(&format!("message_type_id={} queue={}", envelope.message_type_id(), queue)),
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::InMemoryProcessLedger;
    use crate::messaging::InMemoryMessagingService;

    const PACS_008: &str = r#"<Document xmlns="urn:iso:std:iso:20022:tech:xsd:pacs.008.001.08"><FIToFICstmrCdtTrf/></Document>"#;

    async fn setup() -> (
        Arc<InMemoryProcessLedger>,
        Arc<InMemoryMessagingService>,
        ValidationStage,
    ) {
        let ledger = Arc::new(InMemoryProcessLedger::new());
        let messaging = Arc::new(InMemoryMessagingService::new());
        let queues = QueuesConfig::default();
        messaging.ensure_queue("swift-pacs.008.001.08").await.unwrap();
        let stage = ValidationStage::new(ledger.clone(), messaging.clone(), queues, "xml");
        (ledger, messaging, stage)
    }

    async fn envelope(ledger: &InMemoryProcessLedger, name: &str, payload: &str) -> Envelope {
        let record = ledger.create(name, payload).await.unwrap();
        Envelope::new(&record, format!("$${}$${name}", record.id))
    }

    #[tokio::test]
    async fn supported_message_is_validated_and_forwarded() {
        let (ledger, messaging, stage) = setup().await;
        let envelope = envelope(&ledger, "pacs.008.001.08.xml", PACS_008).await;
        let id = envelope.process_id();

        stage.process(envelope).await.unwrap();

        assert_eq!(
            ledger.find_by_id(id).await.unwrap().status,
            ProcessStatus::Validated
        );
        let forwarded = messaging.peek_all("swift-pacs.008.001.08").await;
        assert_eq!(forwarded.len(), 1);
        assert_eq!(forwarded[0]["headers"]["message_type_id"], "pacs.008.001.08");
        assert_eq!(forwarded[0]["headers"]["status"], "VALIDATED");
    }

    #[tokio::test]
    async fn wrong_extension_is_unsupported_before_parsing() {
        let (ledger, _, stage) = setup().await;
        let envelope = envelope(&ledger, "notes.txt", "not xml").await;
        let error = stage.process(envelope).await.unwrap_err();
        assert_eq!(
            error.to_string(),
            "Unsupported message: Unsupported file extension: 'notes.txt'"
        );
    }

    #[tokio::test]
    async fn malformed_payload_is_terminal() {
        let (ledger, _, stage) = setup().await;
        let envelope = envelope(&ledger, "bad.xml", "<a><b>x</a>").await;
        let error = stage.process(envelope).await.unwrap_err();
        assert!(matches!(error, PipelineError::MalformedXml { .. }));
    }

    #[tokio::test]
    async fn unknown_type_is_unsupported_and_ledger_untouched() {
        let (ledger, _, stage) = setup().await;
        let envelope = envelope(&ledger, "plain.xml", "<a><b>x</b></a>").await;
        let id = envelope.process_id();
        let error = stage.process(envelope).await.unwrap_err();
        assert!(error.to_string().contains("type='unknown'"));
        assert_eq!(
            ledger.find_by_id(id).await.unwrap().status,
            ProcessStatus::Created
        );
    }

    #[tokio::test]
    async fn replayed_delivery_forwards_again() {
        let (ledger, messaging, stage) = setup().await;
        let envelope = envelope(&ledger, "pacs.008.001.08.xml", PACS_008).await;
        stage.process(envelope.clone()).await.unwrap();
        stage.process(envelope).await.unwrap();
        assert_eq!(messaging.queue_length("swift-pacs.008.001.08").await, 2);
    }
}
