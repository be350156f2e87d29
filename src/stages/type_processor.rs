//! # Type Processors
//!
//! One processor per supported message type. The generic stage checks the
//! tagged name, runs the processor, records COMPLETED, then writes the
//! artifact to the success sink under `<process id>/<original name>`.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use super::{advance_status, Stage};
use crate::config::MessageTypeRoute;
use crate::constants::{routes, PACS_008_001_08};
use crate::error::{PipelineError, PipelineResult};
use crate::ledger::ProcessLedger;
use crate::logging::log_stage_operation;
use crate::messaging::Envelope;
use crate::sinks::{FileSink, WriteOutcome};
use crate::state_machine::ProcessStatus;
use crate::utils::{document_body_element, extract_original_name, extract_process_id};

/// Output of a completed message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedArtifact {
    /// Original, untagged file name
    pub file_name: String,
    pub contents: Vec<u8>,
}

#[async_trait]
pub trait TypeProcessor: Send + Sync + 'static {
    fn message_type_id(&self) -> &str;

    async fn complete(&self, envelope: &Envelope) -> PipelineResult<CompletedArtifact>;
}

/// FI to FI customer credit transfer
#[derive(Debug, Default)]
pub struct Pacs008Processor;

const PACS_008_BODY: &str = "FIToFICstmrCdtTrf";

#[async_trait]
impl TypeProcessor for Pacs008Processor {
    fn message_type_id(&self) -> &str {
        PACS_008_001_08
    }

    async fn complete(&self, envelope: &Envelope) -> PipelineResult<CompletedArtifact> {
        match document_body_element(&envelope.payload) {
            Some(body) if body == PACS_008_BODY => {}
            other => {
                return Err(PipelineError::malformed_xml(format!(
                    "{PACS_008_001_08} document must contain {PACS_008_BODY}, found {}",
                    other.as_deref().unwrap_or("no body element")
                )))
            }
        }

        Ok(CompletedArtifact {
            file_name: extract_original_name(&envelope.headers.updated_file_name)?,
            contents: envelope.payload.as_bytes().to_vec(),
        })
    }
}

/// Message type id to processor
#[derive(Clone, Default)]
pub struct TypeProcessorRegistry {
    processors: HashMap<String, Arc<dyn TypeProcessor>>,
}

impl std::fmt::Debug for TypeProcessorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut ids: Vec<&String> = self.processors.keys().collect();
        ids.sort();
        f.debug_struct("TypeProcessorRegistry")
            .field("message_types", &ids)
            .finish()
    }
}

impl TypeProcessorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every built-in processor
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(Pacs008Processor));
        registry
    }

    pub fn register(&mut self, processor: Arc<dyn TypeProcessor>) {
        self.processors
            .insert(processor.message_type_id().to_string(), processor);
    }

    pub fn get(&self, message_type_id: &str) -> Option<Arc<dyn TypeProcessor>> {
        self.processors.get(message_type_id).cloned()
    }

    /// Every configured message type must have a processor
    pub fn ensure_covers(&self, routes: &[MessageTypeRoute]) -> PipelineResult<()> {
        match routes.iter().find(|route| !self.processors.contains_key(&route.id)) {
            Some(route) => Err(crate::config::ConfigurationError::invalid_value(
                "queues.message_types.id",
                route.id.as_str(),
                "no type processor is registered for this message type",
            )
            .into()),
            None => Ok(()),
        }
    }
}

pub struct TypeProcessorStage {
    route_id: String,
    processor: Arc<dyn TypeProcessor>,
    ledger: Arc<dyn ProcessLedger>,
    success: FileSink,
}

impl TypeProcessorStage {
    pub fn new(
        processor: Arc<dyn TypeProcessor>,
        ledger: Arc<dyn ProcessLedger>,
        success: FileSink,
    ) -> Self {
        Self {
            route_id: routes::type_processor(processor.message_type_id()),
            processor,
            ledger,
            success,
        }
    }
}

#[async_trait]
impl Stage for TypeProcessorStage {
    fn route_id(&self) -> &str {
        &self.route_id
    }

    async fn process(&self, envelope: Envelope) -> PipelineResult<()> {
        let process_id = envelope.process_id();
        let tagged = &envelope.headers.updated_file_name;
        let tagged_id = extract_process_id(tagged)?;
        if tagged_id != process_id {
            return Err(PipelineError::filename_format(
                tagged.as_str(),
                format!("tag carries process id {tagged_id}, envelope carries {process_id}"),
            ));
        }
        if envelope.message_type_id() != self.processor.message_type_id() {
            return Err(PipelineError::unsupported(format!(
                "Message is not a supported type='{}'",
                envelope.message_type_id()
            )));
        }

        let artifact = self.processor.complete(&envelope).await?;

        advance_status(self.ledger.as_ref(), process_id, ProcessStatus::Completed).await?;

        let relative = PathBuf::from(process_id.to_string()).join(&artifact.file_name);
        match self.success.write_once(&relative, &artifact.contents).await? {
            WriteOutcome::Written(path) => {
                debug!(path = %path.display(), "📤 Success artifact written");
            }
            WriteOutcome::AlreadyPresent(path) => {
                debug!(path = %path.display(), "Success artifact already present");
            }
        }

        log_stage_operation(
            &self.route_id,
            Some(process_id),
            ProcessStatus::Completed,
            Some(&artifact.file_name),
        );
        Ok(())
    }
}
