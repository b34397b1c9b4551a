//! Binary entry point: parse CLI arguments, load layered configuration,
//! initialize tracing, and hand off to the Lifecycle Manager.

use std::path::PathBuf;

use clap::Parser;
use riskflow_worker::{init_tracing, LifecycleManager, Settings};

/// Streaming risk-assessment worker.
#[derive(Debug, Parser)]
#[command(name = "riskflow-worker", version, about)]
struct Cli {
    /// Path to a TOML configuration file. Falls back to built-in defaults
    /// and environment overrides if omitted or missing.
    #[arg(long, env = "RISKFLOW_CONFIG")]
    config: Option<PathBuf>,

    /// Continue startup with identity-fixture artefacts if the configured
    /// encoder/standardiser files cannot be loaded, instead of aborting.
    #[arg(long, env = "RISKFLOW_DEGRADED_MODE")]
    degraded_mode: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing();

    let mut settings = Settings::load(cli.config.as_ref())?;
    if cli.degraded_mode {
        settings.degraded_mode = true;
    }

    tracing::info!(
        version = riskflow_worker::VERSION,
        degraded_mode = settings.degraded_mode,
        "starting riskflow-worker"
    );

    LifecycleManager::new(settings).run().await?;
    Ok(())
}
