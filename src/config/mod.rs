//! # Pipeline Configuration
//!
//! Typed configuration for directories, queues, consumer concurrency,
//! redelivery, claiming, storage backends and logging. Every section has
//! defaults so a partial file (or none at all) is enough.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use mx_pipeline::config::ConfigManager;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let manager = ConfigManager::load()?;
//! let redelivery = &manager.config().redelivery;
//! println!("max attempts: {}", redelivery.max_attempts);
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod loader;

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::claim::ClaimKeyStrategy;
use crate::constants::PACS_008_001_08;

pub use error::{ConfigResult, ConfigurationError};
pub use loader::ConfigManager;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub files: FilesConfig,
    pub queues: QueuesConfig,
    pub consumers: ConsumersConfig,
    pub redelivery: RedeliveryConfig,
    pub claim: ClaimConfig,
    pub backend: BackendConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FilesConfig {
    pub input: PathBuf,
    pub in_progress: PathBuf,
    pub success: PathBuf,
    pub unsupported: PathBuf,
    pub error: PathBuf,
    /// Extension (without the dot) accepted by validation
    pub accepted_extension: String,
}

impl Default for FilesConfig {
    fn default() -> Self {
        Self::rooted_at(Path::new("/tmp"))
    }
}

impl FilesConfig {
    /// Standard layout below a single root directory
    pub fn rooted_at(root: &Path) -> Self {
        Self {
            input: root.join("input"),
            in_progress: root.join("in-progress"),
            success: root.join("success"),
            unsupported: root.join("unsupported"),
            error: root.join("error"),
            accepted_extension: "xml".to_string(),
        }
    }

    pub fn all_directories(&self) -> [&Path; 5] {
        [
            &self.input,
            &self.in_progress,
            &self.success,
            &self.unsupported,
            &self.error,
        ]
    }
}

/// Binds a supported message type to its processing queue
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageTypeRoute {
    pub id: String,
    pub queue: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueuesConfig {
    pub validator: String,
    pub dead_letter: String,
    pub message_types: Vec<MessageTypeRoute>,
    pub visibility_timeout_ms: u64,
    pub poll_interval_ms: u64,
    pub batch_size: usize,
}

impl Default for QueuesConfig {
    fn default() -> Self {
        Self {
            validator: "swift-validator".to_string(),
            dead_letter: "swift-dead-letter".to_string(),
            message_types: vec![MessageTypeRoute {
                id: PACS_008_001_08.to_string(),
                queue: format!("swift-{PACS_008_001_08}"),
            }],
            visibility_timeout_ms: 30_000,
            poll_interval_ms: 250,
            batch_size: 10,
        }
    }
}

impl QueuesConfig {
    pub fn visibility_timeout(&self) -> Duration {
        Duration::from_millis(self.visibility_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Processing queue for a message type id, if the type is supported
    pub fn queue_for(&self, message_type_id: &str) -> Option<&str> {
        self.message_types
            .iter()
            .find(|route| route.id == message_type_id)
            .map(|route| route.queue.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsumersConfig {
    pub validator: usize,
    /// Workers per message-type queue
    pub message_types: usize,
    pub ingest_max_in_flight: usize,
}

impl Default for ConsumersConfig {
    fn default() -> Self {
        Self {
            validator: 2,
            message_types: 2,
            ingest_max_in_flight: 16,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RedeliveryConfig {
    /// Redeliveries allowed for bounded-retry failures
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub backoff_multiplier: f64,
    pub max_delay_ms: u64,
    /// Jitter spread as a fraction of the computed delay
    pub collision_avoidance_factor: f64,
}

impl Default for RedeliveryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay_ms: 500,
            backoff_multiplier: 2.0,
            max_delay_ms: 60_000,
            collision_avoidance_factor: 0.15,
        }
    }
}

impl RedeliveryConfig {
    pub fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClaimConfig {
    pub read_lock_check_interval_ms: u64,
    /// Claim marker TTL
    pub read_lock_timeout_ms: u64,
    pub key_strategy: ClaimKeyStrategy,
    /// Owner recorded on every marker this instance writes
    pub instance_id: String,
}

impl Default for ClaimConfig {
    fn default() -> Self {
        Self {
            read_lock_check_interval_ms: 1_000,
            read_lock_timeout_ms: 10_000,
            key_strategy: ClaimKeyStrategy::default(),
            instance_id: default_instance_id(),
        }
    }
}

impl ClaimConfig {
    pub fn check_interval(&self) -> Duration {
        Duration::from_millis(self.read_lock_check_interval_ms)
    }

    pub fn read_lock_timeout(&self) -> Duration {
        Duration::from_millis(self.read_lock_timeout_ms)
    }
}

fn default_instance_id() -> String {
    let host = std::env::var("HOSTNAME").unwrap_or_else(|_| "mx".to_string());
    format!("{host}-{}", uuid::Uuid::new_v4())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    #[default]
    InMemory,
    Postgres,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    pub kind: BackendKind,
    pub database_url: Option<String>,
    pub max_connections: u32,
    pub acquire_timeout_ms: u64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            kind: BackendKind::InMemory,
            database_url: None,
            max_connections: 10,
            acquire_timeout_ms: 5_000,
        }
    }
}

impl BackendConfig {
    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.acquire_timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub file_output: bool,
    pub directory: PathBuf,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            file_output: false,
            directory: PathBuf::from("log"),
        }
    }
}

impl PipelineConfig {
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        let claim = &self.claim;
        if claim.read_lock_check_interval_ms == 0 {
            return Err(ConfigurationError::invalid_value(
                "claim.read_lock_check_interval_ms",
                "0",
                "check interval must be greater than 0",
            ));
        }
        if claim.read_lock_timeout_ms < claim.read_lock_check_interval_ms.saturating_mul(2) {
            return Err(ConfigurationError::invalid_value(
                "claim.read_lock_timeout_ms",
                claim.read_lock_timeout_ms.to_string(),
                format!(
                    "read lock timeout must be at least twice the check interval ({}ms)",
                    claim.read_lock_check_interval_ms
                ),
            ));
        }
        if claim.instance_id.trim().is_empty() {
            return Err(ConfigurationError::missing_required_field(
                "claim.instance_id",
                "claim configuration",
            ));
        }

        let redelivery = &self.redelivery;
        if redelivery.backoff_multiplier.is_nan() || redelivery.backoff_multiplier < 1.0 {
            return Err(ConfigurationError::invalid_value(
                "redelivery.backoff_multiplier",
                redelivery.backoff_multiplier.to_string(),
                "multiplier must be at least 1.0",
            ));
        }
        if !(0.0..1.0).contains(&redelivery.collision_avoidance_factor) {
            return Err(ConfigurationError::invalid_value(
                "redelivery.collision_avoidance_factor",
                redelivery.collision_avoidance_factor.to_string(),
                "factor must be in [0, 1)",
            ));
        }
        if redelivery.initial_delay_ms > redelivery.max_delay_ms {
            return Err(ConfigurationError::invalid_value(
                "redelivery.initial_delay_ms",
                redelivery.initial_delay_ms.to_string(),
                format!("initial delay exceeds max delay ({}ms)", redelivery.max_delay_ms),
            ));
        }

        let consumers = &self.consumers;
        for (field, value) in [
            ("consumers.validator", consumers.validator),
            ("consumers.message_types", consumers.message_types),
            ("consumers.ingest_max_in_flight", consumers.ingest_max_in_flight),
        ] {
            if value == 0 {
                return Err(ConfigurationError::invalid_value(
                    field,
                    "0",
                    "consumer count must be at least 1",
                ));
            }
        }

        self.validate_queues()?;
        self.validate_directories()?;

        if self.backend.kind == BackendKind::Postgres
            && self
                .backend
                .database_url
                .as_deref()
                .map_or(true, |url| url.trim().is_empty())
        {
            return Err(ConfigurationError::missing_required_field(
                "backend.database_url",
                "postgres backend configuration",
            ));
        }

        Ok(())
    }

    fn validate_queues(&self) -> Result<(), ConfigurationError> {
        let queues = &self.queues;
        if queues.batch_size == 0 {
            return Err(ConfigurationError::invalid_value(
                "queues.batch_size",
                "0",
                "batch size must be greater than 0",
            ));
        }

        let mut names = vec![
            ("queues.validator", queues.validator.as_str()),
            ("queues.dead_letter", queues.dead_letter.as_str()),
        ];
        for route in &queues.message_types {
            if route.id.trim().is_empty() {
                return Err(ConfigurationError::missing_required_field(
                    "queues.message_types.id",
                    "message type route",
                ));
            }
            names.push(("queues.message_types.queue", route.queue.as_str()));
        }

        let mut seen = HashSet::new();
        for (field, name) in names {
            if name.trim().is_empty() {
                return Err(ConfigurationError::missing_required_field(
                    field,
                    "queue configuration",
                ));
            }
            if !seen.insert(name) {
                return Err(ConfigurationError::invalid_value(
                    field,
                    name,
                    "queue names must be distinct",
                ));
            }
        }

        let mut type_ids = HashSet::new();
        for route in &queues.message_types {
            if !type_ids.insert(route.id.as_str()) {
                return Err(ConfigurationError::invalid_value(
                    "queues.message_types.id",
                    route.id.as_str(),
                    "message type ids must be distinct",
                ));
            }
        }
        Ok(())
    }

    fn validate_directories(&self) -> Result<(), ConfigurationError> {
        let mut seen = HashSet::new();
        for dir in self.files.all_directories() {
            if dir.as_os_str().is_empty() {
                return Err(ConfigurationError::missing_required_field(
                    "files",
                    "directory configuration",
                ));
            }
            if !seen.insert(dir) {
                return Err(ConfigurationError::invalid_value(
                    "files",
                    dir.display().to_string(),
                    "input and output directories must be distinct",
                ));
            }
        }
        if self.files.accepted_extension.trim().is_empty() {
            return Err(ConfigurationError::missing_required_field(
                "files.accepted_extension",
                "directory configuration",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = PipelineConfig::default();
        config.validate().unwrap();
        assert_eq!(config.queues.queue_for("pacs.008.001.08"), Some("swift-pacs.008.001.08"));
        assert_eq!(config.queues.queue_for("camt.053.001.08"), None);
        assert_eq!(config.redelivery.max_attempts, 5);
        assert_eq!(config.files.input, PathBuf::from("/tmp/input"));
    }

    #[test]
    fn read_lock_timeout_must_cover_two_intervals() {
        let mut config = PipelineConfig::default();
        config.claim.read_lock_check_interval_ms = 1_000;
        config.claim.read_lock_timeout_ms = 1_999;
        assert!(matches!(
            config.validate(),
            Err(ConfigurationError::InvalidValue { ref field, .. })
                if field == "claim.read_lock_timeout_ms"
        ));
        config.claim.read_lock_timeout_ms = 2_000;
        config.validate().unwrap();
    }

    #[test]
    fn huge_check_interval_is_rejected_not_overflowed() {
        let mut config = PipelineConfig::default();
        config.claim.read_lock_check_interval_ms = u64::MAX;
        config.claim.read_lock_timeout_ms = u64::MAX - 1;
        assert!(matches!(
            config.validate(),
            Err(ConfigurationError::InvalidValue { ref field, .. })
                if field == "claim.read_lock_timeout_ms"
        ));
    }

    #[test]
    fn duplicate_queue_names_rejected() {
        let mut config = PipelineConfig::default();
        config.queues.dead_letter = config.queues.validator.clone();
        assert!(config.validate().is_err());
    }

    #[test]
    fn postgres_requires_database_url() {
        let mut config = PipelineConfig::default();
        config.backend.kind = BackendKind::Postgres;
        assert!(matches!(
            config.validate(),
            Err(ConfigurationError::MissingRequiredField { .. })
        ));
        config.backend.database_url = Some("postgresql://localhost/mx".to_string());
        config.validate().unwrap();
    }

    #[test]
    fn jitter_factor_must_stay_below_one() {
        let mut config = PipelineConfig::default();
        config.redelivery.collision_avoidance_factor = 1.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn shared_output_directory_rejected() {
        let mut config = PipelineConfig::default();
        config.files.error = config.files.unsupported.clone();
        assert!(config.validate().is_err());
    }
}
