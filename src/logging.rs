//! # Structured Logging Module
//!
//! Environment-aware structured logging with console output and an optional
//! JSON file sink, plus the structured helpers every stage logs through.

use std::fs;
use std::process;
use std::sync::OnceLock;

use chrono::Utc;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use crate::config::LoggingConfig;
use crate::models::ProcessId;
use crate::state_machine::ProcessStatus;

static LOGGER_INITIALIZED: OnceLock<()> = OnceLock::new();
static FILE_WRITER_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

/// Initialize structured logging. Safe to call more than once; only the
/// first call installs anything.
pub fn init_structured_logging(config: &LoggingConfig) {
    LOGGER_INITIALIZED.get_or_init(|| {
        let environment = get_environment();
        let log_level = get_log_level(&environment);

        let mut file_setup_error = None;
        let mut log_file = None;
        let file_writer = if config.file_output {
            match fs::create_dir_all(&config.directory) {
                Ok(()) => {
                    // environment, pid and start time keep concurrent instances apart
                    let file_name = format!(
                        "{}.{}.{}.log",
                        environment,
                        process::id(),
                        Utc::now().format("%Y%m%d_%H%M%S")
                    );
                    log_file = Some(config.directory.join(&file_name));
                    let appender = tracing_appender::rolling::never(&config.directory, file_name);
                    let (writer, guard) = tracing_appender::non_blocking(appender);
                    let _ = FILE_WRITER_GUARD.set(guard);
                    Some(writer)
                }
                Err(e) => {
                    file_setup_error = Some(e.to_string());
                    None
                }
            }
        } else {
            None
        };

        let file_layer = file_writer.map(|writer| {
            fmt::layer()
                .with_writer(writer)
                .with_target(true)
                .with_thread_ids(true)
                .with_ansi(false)
                .json()
                .with_filter(env_filter(&log_level))
        });

        let subscriber = tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_thread_ids(true)
                    .with_level(true)
                    .with_ansi(true)
                    .with_filter(env_filter(&log_level)),
            )
            .with(file_layer);

        if subscriber.try_init().is_err() {
            // Embedding applications and test harnesses may own the subscriber
            tracing::debug!("Global tracing subscriber already initialized - continuing with existing subscriber");
        }

        if let Some(error) = file_setup_error {
            tracing::warn!(
                directory = %config.directory.display(),
                error = %error,
                "⚠️ STRUCTURED LOGGING: file output disabled, log directory unavailable"
            );
        }

        tracing::info!(
            pid = process::id(),
            environment = %environment,
            log_file = ?log_file,
            "🔧 STRUCTURED LOGGING: Initialized"
        );
    });
}

fn env_filter(default_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level))
}

/// Current environment name from `MX_PIPELINE_ENV`, then `APP_ENV`
pub fn get_environment() -> String {
    std::env::var("MX_PIPELINE_ENV")
        .or_else(|_| std::env::var("APP_ENV"))
        .unwrap_or_else(|_| "development".to_string())
}

fn get_log_level(environment: &str) -> String {
    match environment {
        "production" => "info".to_string(),
        _ => "debug".to_string(),
    }
}

/// Log a stage-level outcome for one message
pub fn log_stage_operation(
    stage: &str,
    process_id: Option<ProcessId>,
    status: ProcessStatus,
    details: Option<&str>,
) {
    tracing::info!(
        stage = %stage,
        process_id = process_id.map(|id| id.get()),
        status = %status,
        details = details,
        timestamp = %Utc::now().to_rfc3339(),
        "📋 STAGE_OPERATION"
    );
}

/// Log an accepted ledger write
pub fn log_ledger_operation(
    operation: &str,
    process_id: ProcessId,
    status: ProcessStatus,
    details: Option<&str>,
) {
    tracing::debug!(
        operation = %operation,
        process_id = process_id.get(),
        status = %status,
        details = details,
        timestamp = %Utc::now().to_rfc3339(),
        "💾 LEDGER_OPERATION"
    );
}

/// Log error with full context
pub fn log_error(component: &str, operation: &str, error: &str, context: Option<&str>) {
    tracing::error!(
        component = %component,
        operation = %operation,
        error = %error,
        context = context,
        timestamp = %Utc::now().to_rfc3339(),
        "❌ ERROR"
    );
}
