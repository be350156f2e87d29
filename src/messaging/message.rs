//! # Pipeline Messages
//!
//! The envelope carried between stages and the payload delivered to the
//! dead-letter queue.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::constants::unknown_if_blank;
use crate::models::{ProcessId, ProcessRecord};
use crate::state_machine::ProcessStatus;
use crate::utils::serde::{deserialize_message_type_id, unknown_message_type};

/// Correlation headers threaded through every stage.
///
/// `status` mirrors the ledger at the time the envelope was last touched. It is
/// advisory only; the ledger decides whether a transition is legal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnvelopeHeaders {
    pub process_id: ProcessId,
    pub original_file_name: String,
    /// Process-id tagged name
    pub updated_file_name: String,
    #[serde(
        default = "unknown_message_type",
        deserialize_with = "deserialize_message_type_id"
    )]
    message_type_id: String,
    pub status: ProcessStatus,
}

impl EnvelopeHeaders {
    pub fn message_type_id(&self) -> &str {
        &self.message_type_id
    }
}

/// Unit of work passed between stages
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub headers: EnvelopeHeaders,
    /// Message content with line breaks removed
    pub payload: String,
}

impl Envelope {
    /// Envelope for a freshly created ledger record
    pub fn new(record: &ProcessRecord, updated_file_name: impl Into<String>) -> Self {
        Self {
            headers: EnvelopeHeaders {
                process_id: record.id,
                original_file_name: record.name.clone(),
                updated_file_name: updated_file_name.into(),
                message_type_id: unknown_message_type(),
                status: record.status,
            },
            payload: record.payload.clone(),
        }
    }

    pub fn process_id(&self) -> ProcessId {
        self.headers.process_id
    }

    pub fn message_type_id(&self) -> &str {
        self.headers.message_type_id()
    }

    /// Blank or missing ids are stored as `"unknown"`
    pub fn set_message_type_id(&mut self, message_type_id: Option<&str>) {
        self.headers.message_type_id = unknown_if_blank(message_type_id);
    }

    pub fn set_status(&mut self, status: ProcessStatus) {
        self.headers.status = status;
    }
}

/// Payload written to the dead-letter queue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeadLetterMessage {
    pub process_id: Option<ProcessId>,
    pub route_id: String,
    pub file_name: String,
    pub error_code: String,
    pub error_message: String,
    pub payload: String,
    pub failed_at: DateTime<Utc>,
}
