//! Configuration Loader
//!
//! Layers, lowest precedence first: built-in defaults, `mx-pipeline.toml`,
//! `mx-pipeline.<environment>.toml`, then `MX_PIPELINE__SECTION__KEY`
//! environment variables. Both files are optional.

use std::env;
use std::path::{Path, PathBuf};

use config::{Config, Environment, File};
use tracing::{debug, info};

use super::error::{ConfigResult, ConfigurationError};
use super::PipelineConfig;
use crate::logging::get_environment;

const CONFIG_FILE_STEM: &str = "mx-pipeline";
const ENV_PREFIX: &str = "MX_PIPELINE";

#[derive(Debug, Clone)]
pub struct ConfigManager {
    config: PipelineConfig,
    environment: String,
    config_directory: PathBuf,
}

impl ConfigManager {
    /// Load from `MX_PIPELINE_CONFIG_DIR` (default `config`) for the detected environment
    pub fn load() -> ConfigResult<ConfigManager> {
        let directory = env::var("MX_PIPELINE_CONFIG_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config"));
        Self::load_from(&directory, &get_environment().to_lowercase())
    }

    /// Load from an explicit directory and environment without consulting
    /// the environment-detection variables
    pub fn load_from(config_directory: &Path, environment: &str) -> ConfigResult<ConfigManager> {
        debug!(
            "Loading configuration for environment '{}' from directory: {}",
            environment,
            config_directory.display()
        );

        let defaults = Config::try_from(&PipelineConfig::default())
            .map_err(|e| ConfigurationError::load_error("defaults", e))?;

        let settings = Config::builder()
            .add_source(defaults)
            .add_source(
                File::from(config_directory.join(format!("{CONFIG_FILE_STEM}.toml")))
                    .required(false),
            )
            .add_source(
                File::from(config_directory.join(format!("{CONFIG_FILE_STEM}.{environment}.toml")))
                    .required(false),
            )
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| {
                ConfigurationError::load_error(config_directory.display().to_string(), e)
            })?;

        let config: PipelineConfig = settings
            .try_deserialize()
            .map_err(|e| ConfigurationError::load_error("merged configuration", e))?;

        config.validate()?;

        debug!(
            "Configuration loaded successfully: {}",
            serde_json::to_string_pretty(&Self::sanitize_config_for_logging(&config))
                .unwrap_or_else(|_| "[serialization error]".to_string())
        );
        info!(
            environment = %environment,
            backend = ?config.backend.kind,
            instance_id = %config.claim.instance_id,
            "⚙️ Configuration loaded"
        );

        Ok(ConfigManager {
            config,
            environment: environment.to_string(),
            config_directory: config_directory.to_path_buf(),
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn into_config(self) -> PipelineConfig {
        self.config
    }

    pub fn environment(&self) -> &str {
        &self.environment
    }

    pub fn config_directory(&self) -> &Path {
        &self.config_directory
    }

    /// Configuration as JSON with credentials masked
    pub fn debug_config(&self) -> serde_json::Value {
        Self::sanitize_config_for_logging(&self.config)
    }

    fn sanitize_config_for_logging(config: &PipelineConfig) -> serde_json::Value {
        let mut value = serde_json::to_value(config).unwrap_or(serde_json::Value::Null);
        if let Some(url) = value.pointer_mut("/backend/database_url") {
            if let Some(raw) = url.as_str() {
                *url = serde_json::Value::String(redact_database_url(raw));
            }
        }
        value
    }
}

/// Keep scheme and host, drop credentials
fn redact_database_url(raw: &str) -> String {
    match (raw.find("://"), raw.rfind('@')) {
        (Some(scheme_end), Some(at)) if at > scheme_end => {
            format!("{}://[MASKED]{}", &raw[..scheme_end], &raw[at..])
        }
        _ => "[MASKED]".to_string(),
    }
}
