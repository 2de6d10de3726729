//! Media registry - entry point
//!
//! Runs the registry scanner on a schedule until Ctrl-C, or once with `--once`.

use std::sync::Arc;

use anyhow::Context;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use media_registry::cli::CliOptions;
use media_registry::config::{Config, LogFormat};
use media_registry::db::RegistryStorage;
use media_registry::jobs::{self, ScanJob};
use media_registry::services::{
    RegistryScanner, ScannerConfig, TmdbCatalogMapper, TmdbClient, create_metadata_extractor,
};

fn init_tracing(format: LogFormat) {
    let registry = tracing_subscriber::registry().with(
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| "media_registry=info".into()),
    );

    match format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
        LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer().pretty()).init(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = CliOptions::from_args();

    // Configuration first so the log format is known before tracing starts
    match &cli.env_file {
        Some(path) => {
            dotenvy::from_path(path)
                .with_context(|| format!("Failed to load env file {}", path.display()))?;
        }
        None => {
            dotenvy::dotenv().ok();
        }
    }
    let config = Arc::new(Config::from_env()?);

    init_tracing(config.log_format);

    tracing::info!(
        storage = %config.storage_path.display(),
        database = %config.database_path.display(),
        "Starting media registry"
    );

    let extractor = create_metadata_extractor(&config)?;

    let tmdb = TmdbClient::new(
        config.tmdb_api_key.clone(),
        config.tmdb_language.clone(),
        config.tmdb_base_url.clone(),
    )?;
    let mapper = Arc::new(TmdbCatalogMapper::new(
        Arc::new(tmdb),
        config.tmdb_language.clone(),
    ));

    let storage = Arc::new(RegistryStorage::new());
    let scanner = Arc::new(RegistryScanner::new(
        storage,
        extractor,
        mapper,
        ScannerConfig::from_config(&config),
    ));
    let scan_job = Arc::new(ScanJob::new(scanner));

    if cli.once {
        if let Some(summary) = scan_job.run().await? {
            tracing::info!(
                candidates = summary.candidates,
                recognized = summary.recognized,
                unrecognized = summary.unrecognized,
                aborted = summary.aborted,
                "Single scan finished"
            );
        }
        return Ok(());
    }

    let mut scheduler = jobs::start_scheduler(scan_job, config.scan_interval()).await?;

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;

    tracing::info!("Shutdown requested, stopping scheduler");
    scheduler.shutdown().await?;

    Ok(())
}
