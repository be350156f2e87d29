//! # Pipeline Error Classification
//!
//! Decides, for one failed stage invocation, whether the message is routed
//! terminally or redelivered, and after how long.
//!
//! ## Classes
//!
//! | Class | Errors | Policy |
//! |---|---|---|
//! | `Unsupported` | `PipelineError::Unsupported` | ledger UNSUPPORTED, unsupported sink |
//! | `TerminalFailure` | malformed XML, workflow status, missing field, filename format | ledger FAILED, dead-letter queue and error sink |
//! | `UnlimitedRetry` | claim store, ledger store or transport unreachable | redeliver with no cap |
//! | `BoundedRetry` | everything else | redeliver up to `max_attempts`, then as `TerminalFailure` |
//!
//! ## Usage
//!
//! ```rust
//! use mx_pipeline::error::PipelineError;
//! use mx_pipeline::orchestration::{
//!     BackoffCalculator, ErrorClassifier, ErrorContext, StandardErrorClassifier,
//! };
//!
//! let classifier = StandardErrorClassifier::new(BackoffCalculator::default());
//! let context = ErrorContext {
//!     process_id: None,
//!     route_id: "mx-validation".to_string(),
//!     attempt_number: 1,
//!     max_attempts: 5,
//! };
//! let classification =
//!     classifier.classify_error(&PipelineError::unexpected("disk hiccup"), &context);
//! assert!(classification.is_retryable);
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::backoff_calculator::BackoffCalculator;
use crate::error::PipelineError;
use crate::models::ProcessId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    Unsupported,
    TerminalFailure,
    UnlimitedRetry,
    BoundedRetry,
}

impl std::fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorClass::Unsupported => write!(f, "Unsupported"),
            ErrorClass::TerminalFailure => write!(f, "Terminal Failure"),
            ErrorClass::UnlimitedRetry => write!(f, "Unlimited Retry"),
            ErrorClass::BoundedRetry => write!(f, "Bounded Retry"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ErrorContext {
    pub process_id: Option<ProcessId>,
    pub route_id: String,
    /// Redelivery being considered (1-based)
    pub attempt_number: u32,
    pub max_attempts: u32,
}

#[derive(Debug, Clone)]
pub struct ErrorClassification {
    pub error_class: ErrorClass,
    pub is_retryable: bool,
    pub retry_delay: Option<Duration>,
    pub error_code: String,
    pub error_message: String,
    /// Set when no further redelivery will happen
    pub is_final_attempt: bool,
}

pub trait ErrorClassifier: Send + Sync {
    fn classify_error(&self, error: &PipelineError, context: &ErrorContext)
        -> ErrorClassification;

    fn classifier_name(&self) -> &'static str;
}

#[derive(Debug, Clone, Default)]
pub struct StandardErrorClassifier {
    backoff: BackoffCalculator,
}

impl StandardErrorClassifier {
    pub fn new(backoff: BackoffCalculator) -> Self {
        Self { backoff }
    }

    fn retry(&self, class: ErrorClass, error: &PipelineError, attempt: u32) -> ErrorClassification {
        ErrorClassification {
            error_class: class,
            is_retryable: true,
            retry_delay: Some(self.backoff.delay_for_attempt(attempt)),
            error_code: error.error_code().to_string(),
            error_message: error.to_string(),
            is_final_attempt: false,
        }
    }

    fn terminal(class: ErrorClass, error: &PipelineError) -> ErrorClassification {
        ErrorClassification {
            error_class: class,
            is_retryable: false,
            retry_delay: None,
            error_code: error.error_code().to_string(),
            error_message: error.to_string(),
            is_final_attempt: true,
        }
    }
}

impl ErrorClassifier for StandardErrorClassifier {
    fn classify_error(
        &self,
        error: &PipelineError,
        context: &ErrorContext,
    ) -> ErrorClassification {
        match error.class() {
            class @ (ErrorClass::Unsupported | ErrorClass::TerminalFailure) => {
                Self::terminal(class, error)
            }
            ErrorClass::UnlimitedRetry => {
                self.retry(ErrorClass::UnlimitedRetry, error, context.attempt_number)
            }
            ErrorClass::BoundedRetry if context.attempt_number <= context.max_attempts => {
                self.retry(ErrorClass::BoundedRetry, error, context.attempt_number)
            }
            ErrorClass::BoundedRetry => Self::terminal(ErrorClass::BoundedRetry, error),
        }
    }

    fn classifier_name(&self) -> &'static str {
        "standard"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context(attempt_number: u32) -> ErrorContext {
        ErrorContext {
            process_id: Some(ProcessId::from(9)),
            route_id: "mx-validation".to_string(),
            attempt_number,
            max_attempts: 3,
        }
    }

    #[test]
    fn unsupported_is_terminal_and_keeps_its_class() {
        let classifier = StandardErrorClassifier::default();
        let result = classifier.classify_error(
            &PipelineError::unsupported("Message is not a supported type='camt.053.001.08'"),
            &context(1),
        );
        assert_eq!(result.error_class, ErrorClass::Unsupported);
        assert!(!result.is_retryable);
        assert!(result.is_final_attempt);
        assert_eq!(result.error_code, "UNSUPPORTED");
    }

    #[test]
    fn bounded_retry_exhausts_after_max_attempts() {
        let classifier = StandardErrorClassifier::default();
        let error = PipelineError::unexpected("boom");
        for attempt in 1..=3 {
            let result = classifier.classify_error(&error, &context(attempt));
            assert!(result.is_retryable, "attempt {attempt} should retry");
            assert!(result.retry_delay.is_some());
        }
        let exhausted = classifier.classify_error(&error, &context(4));
        assert!(!exhausted.is_retryable);
        assert!(exhausted.is_final_attempt);
        assert_eq!(exhausted.error_class, ErrorClass::BoundedRetry);
    }

    #[test]
    fn infrastructure_outages_never_exhaust() {
        let classifier = StandardErrorClassifier::default();
        let error =
            PipelineError::infrastructure_unavailable("process ledger", "connection refused");
        let result = classifier.classify_error(&error, &context(10_000));
        assert!(result.is_retryable);
        assert!(!result.is_final_attempt);
        assert!(result.retry_delay.unwrap() <= Duration::from_secs(60));
    }
}
