//! # MX Pipeline
//!
//! Runs the ingestion pipeline until interrupted, or validates the layered
//! configuration for an environment without starting anything.

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::info;

use mx_pipeline::config::ConfigManager;
use mx_pipeline::logging::init_structured_logging;
use mx_pipeline::orchestration::Pipeline;

#[derive(Parser)]
#[command(name = "mx-pipeline")]
#[command(about = "ISO 20022 MX file ingestion pipeline")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    /// Environment overlay to load (development, test, production, ...)
    #[arg(short, long, env = "MX_PIPELINE_ENV", default_value = "development")]
    environment: String,

    /// Directory holding mx-pipeline.toml and its environment overlays
    #[arg(short, long, env = "MX_PIPELINE_CONFIG_DIR", default_value = "config")]
    config_dir: PathBuf,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the pipeline and run until Ctrl-C
    Run,

    /// Load and validate configuration, then print it with secrets masked
    Validate,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let manager = ConfigManager::load_from(&cli.config_dir, &cli.environment.to_lowercase())
        .with_context(|| {
            format!(
                "failed to load configuration from {} for environment '{}'",
                cli.config_dir.display(),
                cli.environment
            )
        })?;

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Validate => {
            println!("🔧 Validating MX pipeline configuration");
            println!("Environment: {}", manager.environment());
            println!("Config Directory: {}", manager.config_directory().display());
            println!("{}", serde_json::to_string_pretty(&manager.debug_config())?);
            println!("\n✅ Configuration is valid");
            Ok(())
        }
        Commands::Run => {
            let config = manager.into_config();
            init_structured_logging(&config.logging);

            let pipeline = Pipeline::bootstrap(config)
                .await
                .context("failed to start pipeline")?;

            tokio::signal::ctrl_c()
                .await
                .context("failed to listen for shutdown signal")?;
            info!("Shutdown signal received");
            pipeline.shutdown().await;
            Ok(())
        }
    }
}
