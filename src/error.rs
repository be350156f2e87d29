//! # Pipeline Error Taxonomy
//!
//! Typed errors raised by every stage. Stage code never swallows an error; it
//! returns one of these and lets the redelivery policy in
//! [`crate::orchestration::error_classifier`] decide what happens next.

use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::config::ConfigurationError;
use crate::messaging::MessagingError;
use crate::models::ProcessId;
use crate::orchestration::ErrorClass;
use crate::state_machine::ProcessStatus;

/// Whether a sqlx failure means the database could not be reached. Shared by
/// the ledger, the claim store and the pgmq transport, which all live in the
/// same database.
pub(crate) fn is_connection_failure(error: &sqlx::Error) -> bool {
    match error {
        sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::Protocol(_)
        | sqlx::Error::WorkerCrashed => true,
        // SQLSTATE class 08: connection exception; 57P01..57P03: server shutting down
        sqlx::Error::Database(db) => db
            .code()
            .map(|code| code.starts_with("08") || code.starts_with("57P"))
            .unwrap_or(false),
        _ => false,
    }
}

#[derive(Debug, Error)]
pub enum PipelineError {
    /// Payload is not well-formed XML
    #[error("Malformed XML: {reason}")]
    MalformedXml { reason: String },

    /// No handler exists for the file extension or message type
    #[error("Unsupported message: {reason}")]
    Unsupported { reason: String },

    /// Ledger rejected a status change
    #[error("Invalid workflow transition for process {process_id}: attempted={attempted} actual={actual}")]
    WorkflowStatus {
        process_id: ProcessId,
        attempted: ProcessStatus,
        actual: ProcessStatus,
    },

    /// Claim store, ledger store or queue transport cannot be reached
    #[error("{component} unavailable: {message}")]
    InfrastructureUnavailable { component: String, message: String },

    #[error("Missing required field '{field}' in {context}")]
    MissingField { field: String, context: String },

    #[error("Invalid tagged file name '{name}': {reason}")]
    FilenameFormat { name: String, reason: String },

    #[error("Process not found: {process_id}")]
    ProcessNotFound { process_id: ProcessId },

    #[error("I/O error during {operation} on '{}': {source}", path.display())]
    Io {
        operation: String,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Messaging(#[from] MessagingError),

    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error("Unexpected error: {message}")]
    Unexpected { message: String },
}

impl PipelineError {
    pub fn malformed_xml(reason: impl Into<String>) -> Self {
        Self::MalformedXml {
            reason: reason.into(),
        }
    }

    pub fn unsupported(reason: impl Into<String>) -> Self {
        Self::Unsupported {
            reason: reason.into(),
        }
    }

    pub fn workflow_status(
        process_id: ProcessId,
        attempted: ProcessStatus,
        actual: ProcessStatus,
    ) -> Self {
        Self::WorkflowStatus {
            process_id,
            attempted,
            actual,
        }
    }

    pub fn infrastructure_unavailable(
        component: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::InfrastructureUnavailable {
            component: component.into(),
            message: message.into(),
        }
    }

    pub fn missing_field(field: impl Into<String>, context: impl Into<String>) -> Self {
        Self::MissingField {
            field: field.into(),
            context: context.into(),
        }
    }

    pub fn filename_format(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::FilenameFormat {
            name: name.into(),
            reason: reason.into(),
        }
    }

    pub fn io(
        operation: impl Into<String>,
        path: impl AsRef<Path>,
        source: std::io::Error,
    ) -> Self {
        Self::Io {
            operation: operation.into(),
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    pub fn unexpected(message: impl Into<String>) -> Self {
        Self::Unexpected {
            message: message.into(),
        }
    }

    /// Map a storage-layer failure. Connection-level failures become
    /// `InfrastructureUnavailable`; anything else is unexpected.
    pub fn from_sqlx(component: &str, error: sqlx::Error) -> Self {
        if is_connection_failure(&error) {
            Self::infrastructure_unavailable(component, error.to_string())
        } else {
            Self::unexpected(format!("{component}: {error}"))
        }
    }

    /// Redelivery class, in priority order: unsupported, terminal failure,
    /// unlimited retry, bounded retry
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Unsupported { .. } => ErrorClass::Unsupported,
            Self::MalformedXml { .. }
            | Self::WorkflowStatus { .. }
            | Self::MissingField { .. }
            | Self::FilenameFormat { .. }
            | Self::ProcessNotFound { .. }
            | Self::Configuration(_) => ErrorClass::TerminalFailure,
            Self::InfrastructureUnavailable { .. } => ErrorClass::UnlimitedRetry,
            Self::Messaging(e) if e.is_connection_failure() => ErrorClass::UnlimitedRetry,
            Self::Messaging(_) | Self::Io { .. } | Self::Unexpected { .. } => {
                ErrorClass::BoundedRetry
            }
        }
    }

    /// Short, stable code used in dead-letter payloads and logs
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::MalformedXml { .. } => "MALFORMED_XML",
            Self::Unsupported { .. } => "UNSUPPORTED",
            Self::WorkflowStatus { .. } => "WORKFLOW_STATUS",
            Self::InfrastructureUnavailable { .. } => "INFRASTRUCTURE_UNAVAILABLE",
            Self::MissingField { .. } => "MISSING_FIELD",
            Self::FilenameFormat { .. } => "FILENAME_FORMAT",
            Self::ProcessNotFound { .. } => "PROCESS_NOT_FOUND",
            Self::Io { .. } => "IO_ERROR",
            Self::Messaging(_) => "MESSAGING_ERROR",
            Self::Configuration(_) => "CONFIGURATION_ERROR",
            Self::Unexpected { .. } => "UNEXPECTED",
        }
    }
}

pub type PipelineResult<T> = std::result::Result<T, PipelineError>;
