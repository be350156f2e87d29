//! # Correlation Context
//!
//! Per-message correlation attached explicitly to each unit of work. Stage
//! futures run inside the context's span, so every event they emit carries
//! the process id and route id without thread-local state. The span closes
//! when the future completes.

use std::future::Future;

use tracing::{Instrument, Span};

use crate::messaging::Envelope;
use crate::models::ProcessId;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorrelationContext {
    pub process_id: Option<ProcessId>,
    pub route_id: String,
    pub file_name: Option<String>,
}

impl CorrelationContext {
    pub fn new(route_id: impl Into<String>) -> Self {
        Self {
            process_id: None,
            route_id: route_id.into(),
            file_name: None,
        }
    }

    pub fn from_envelope(route_id: impl Into<String>, envelope: &Envelope) -> Self {
        Self {
            process_id: Some(envelope.process_id()),
            route_id: route_id.into(),
            file_name: Some(envelope.headers.updated_file_name.clone()),
        }
    }

    pub fn with_process_id(mut self, process_id: ProcessId) -> Self {
        self.process_id = Some(process_id);
        self
    }

    pub fn with_file_name(mut self, file_name: impl Into<String>) -> Self {
        self.file_name = Some(file_name.into());
        self
    }

    pub fn span(&self) -> Span {
        tracing::info_span!(
            "mx_message",
            process_id = self.process_id.map(|id| id.get()),
            route_id = %self.route_id,
            file_name = self.file_name.as_deref(),
        )
    }
}

/// Run `future` inside the span of `context`
pub async fn with_correlation<F>(context: &CorrelationContext, future: F) -> F::Output
where
    F: Future,
{
    future.instrument(context.span()).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ProcessRecord;
    use crate::state_machine::ProcessStatus;
    use chrono::Utc;

    #[test]
    fn context_from_envelope_carries_tagged_name() {
        let record = ProcessRecord {
            id: ProcessId::from(3),
            name: "a.xml".to_string(),
            payload: "<a/>".to_string(),
            status: ProcessStatus::Created,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        let envelope = Envelope::new(&record, "$$3$$a.xml");
        let context = CorrelationContext::from_envelope("mx-validation", &envelope);
        assert_eq!(context.process_id, Some(ProcessId::from(3)));
        assert_eq!(context.file_name.as_deref(), Some("$$3$$a.xml"));
        assert_eq!(context.route_id, "mx-validation");
    }

    #[tokio::test]
    async fn with_correlation_returns_inner_output() {
        let context = CorrelationContext::new("file-ingestion").with_file_name("a.xml");
        let output = with_correlation(&context, async { 41 + 1 }).await;
        assert_eq!(output, 42);
    }
}
