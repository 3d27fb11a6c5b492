//! Run one harvest with configuration from `CATALOG_HARVESTER_CONFIG`.

use catalog_harvester::{Config, HarvestSummary, Harvester, Result, run_until_signal};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Environment variable holding the path of a JSON configuration file
const CONFIG_ENV: &str = "CATALOG_HARVESTER_CONFIG";

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();

    match main_impl().await {
        Ok(summary) => {
            if summary.cancelled {
                tracing::warn!(persisted = summary.persisted, "harvest stopped before completion");
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!(error = %e, "harvest failed");
            ExitCode::FAILURE
        }
    }
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn load_config() -> Result<Config> {
    match std::env::var_os(CONFIG_ENV) {
        Some(path) => {
            let path = PathBuf::from(path);
            tracing::info!(path = %path.display(), "loading configuration");
            Config::from_file(&path)
        }
        None => {
            tracing::info!("{CONFIG_ENV} not set, using default configuration");
            Ok(Config::default())
        }
    }
}

async fn main_impl() -> Result<HarvestSummary> {
    let config = load_config()?;
    let harvester = Harvester::new(config)?;
    tracing::info!(
        output = %harvester.config().output.directory.display(),
        concurrency = harvester.config().dispatch.concurrency,
        "harvester ready"
    );
    run_until_signal(&harvester).await
}
