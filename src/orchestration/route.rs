//! # Routes and the Shared Error Policy
//!
//! Every stage is installed through [`configure_route`], which attaches the
//! one [`ErrorPolicy`] the whole pipeline shares. The route runs its stage
//! inside the message's correlation span and turns any error into either a
//! redelivery delay or a terminal routing decision.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, warn};

use super::error_classifier::{ErrorClass, ErrorClassifier, ErrorContext};
use super::error_handler::{ErrorHandler, FailedMessage};
use crate::context::{with_correlation, CorrelationContext};
use crate::error::PipelineError;
use crate::messaging::Envelope;
use crate::orchestration::BackoffCalculator;
use crate::stages::Stage;

/// Sink name stem for deliveries that carry no readable file name
const UNREADABLE_FILE_NAME: &str = "unreadable-envelope";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyOutcome {
    /// Try again after `delay`; `attempt` is the redelivery number
    Redeliver { delay: Duration, attempt: u32 },
    /// Routed terminally; the message must not be seen again
    Handled { class: ErrorClass },
}

/// Classification plus terminal routing, shared by every route
pub struct ErrorPolicy {
    classifier: Arc<dyn ErrorClassifier>,
    handler: ErrorHandler,
    backoff: BackoffCalculator,
    max_attempts: u32,
}

impl std::fmt::Debug for ErrorPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ErrorPolicy")
            .field("classifier", &self.classifier.classifier_name())
            .field("max_attempts", &self.max_attempts)
            .finish()
    }
}

impl ErrorPolicy {
    pub fn new(
        classifier: Arc<dyn ErrorClassifier>,
        handler: ErrorHandler,
        backoff: BackoffCalculator,
        max_attempts: u32,
    ) -> Self {
        Self {
            classifier,
            handler,
            backoff,
            max_attempts,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Decide what happens after `error` on redelivery number `attempt`
    pub async fn on_error(
        &self,
        error: &PipelineError,
        failed: &FailedMessage,
        attempt: u32,
    ) -> PolicyOutcome {
        let context = ErrorContext {
            process_id: failed.process_id,
            route_id: failed.route_id.clone(),
            attempt_number: attempt,
            max_attempts: self.max_attempts,
        };
        let classification = self.classifier.classify_error(error, &context);

        if classification.is_retryable {
            let delay = classification
                .retry_delay
                .unwrap_or_else(|| self.backoff.delay_for_attempt(attempt));
            let limit = match classification.error_class {
                ErrorClass::UnlimitedRetry => "∞".to_string(),
                _ => self.max_attempts.to_string(),
            };
            warn!(
                process_id = failed.process_id.map(|id| id.get()),
                route_id = %failed.route_id,
                attempt = attempt,
                max_attempts = %limit,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "🔄 ({}/{}) Retrying operation for processId={} on route {}: {}",
                attempt,
                limit,
                failed
                    .process_id
                    .map(|id| id.to_string())
                    .unwrap_or_else(|| "none".to_string()),
                failed.route_id,
                error
            );
            return PolicyOutcome::Redeliver { delay, attempt };
        }

        let routed = match classification.error_class {
            ErrorClass::Unsupported => self.handler.route_unsupported(failed, error).await,
            _ => {
                error!(
                    process_id = failed.process_id.map(|id| id.get()),
                    route_id = %failed.route_id,
                    error_class = %classification.error_class,
                    error_code = %classification.error_code,
                    attempt = attempt,
                    "❌ {}",
                    classification.error_message
                );
                self.handler.route_failure(failed, error).await
            }
        };

        match routed {
            Ok(()) => PolicyOutcome::Handled {
                class: classification.error_class,
            },
            Err(ledger_error) => {
                let delay = self.backoff.delay_for_attempt(attempt);
                warn!(
                    process_id = failed.process_id.map(|id| id.get()),
                    route_id = %failed.route_id,
                    attempt = attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %ledger_error,
                    "🔄 ({}/∞) Terminal routing deferred until the ledger is reachable",
                    attempt
                );
                PolicyOutcome::Redeliver { delay, attempt }
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteOutcome {
    Completed,
    Redeliver { delay: Duration },
    Handled,
}

impl From<PolicyOutcome> for RouteOutcome {
    fn from(outcome: PolicyOutcome) -> Self {
        match outcome {
            PolicyOutcome::Redeliver { delay, .. } => RouteOutcome::Redeliver { delay },
            PolicyOutcome::Handled { .. } => RouteOutcome::Handled,
        }
    }
}

/// A stage bound to the shared error policy
#[derive(Clone)]
pub struct Route {
    route_id: String,
    stage: Arc<dyn Stage>,
    policy: Arc<ErrorPolicy>,
}

impl std::fmt::Debug for Route {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Route")
            .field("route_id", &self.route_id)
            .finish()
    }
}

/// Install the shared error policy on a stage
pub fn configure_route(stage: Arc<dyn Stage>, policy: Arc<ErrorPolicy>) -> Route {
    Route {
        route_id: stage.route_id().to_string(),
        stage,
        policy,
    }
}

impl Route {
    pub fn route_id(&self) -> &str {
        &self.route_id
    }

    pub fn policy(&self) -> &Arc<ErrorPolicy> {
        &self.policy
    }

    /// Run the stage for one delivery of `envelope`. `attempt` is the
    /// 1-based delivery count, which is also the number of the redelivery
    /// that would follow a failure.
    pub async fn run(&self, envelope: Envelope, attempt: u32) -> RouteOutcome {
        let context = CorrelationContext::from_envelope(&self.route_id, &envelope);
        with_correlation(&context, async {
            debug!(attempt = attempt, "📥 Envelope received");
            let failed = FailedMessage::from_envelope(&self.route_id, &envelope);
            match self.stage.process(envelope).await {
                Ok(()) => {
                    debug!("✅ Stage completed");
                    RouteOutcome::Completed
                }
                Err(error) => self.policy.on_error(&error, &failed, attempt).await.into(),
            }
        })
        .await
    }

    /// Route a delivery whose envelope could not be decoded. It carries no
    /// usable process id, so it goes straight to terminal failure routing.
    pub async fn reject_unreadable(
        &self,
        raw: &serde_json::Value,
        reason: &str,
        attempt: u32,
    ) -> RouteOutcome {
        let original_file_name = raw
            .pointer("/headers/original_file_name")
            .and_then(|v| v.as_str())
            .filter(|name| !name.trim().is_empty())
            .unwrap_or(UNREADABLE_FILE_NAME)
            .to_string();
        let payload = raw
            .get("payload")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .unwrap_or_else(|| raw.to_string());

        let failed = FailedMessage {
            process_id: None,
            route_id: self.route_id.clone(),
            original_file_name,
            tagged_file_name: None,
            payload,
        };
        let error = PipelineError::missing_field("envelope", reason);
        let context = CorrelationContext::new(&self.route_id);
        with_correlation(&context, self.policy.on_error(&error, &failed, attempt))
            .await
            .into()
    }
}
