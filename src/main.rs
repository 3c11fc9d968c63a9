//! Flow Sentinel - Main Entry Point
//!
//! Loads configuration, opens the database, loads the model and runs the
//! calibration batch over every device.

use std::sync::Arc;

use thiserror::Error;

use flow_sentinel::constants::{APP_NAME, APP_VERSION};
use flow_sentinel::logic::config::ConfigError;
use flow_sentinel::logic::store::StoreError;
use flow_sentinel::{load_model, DetectionService, EngineConfig, EngineContext, ServiceError, SqliteStore, Stores};

#[derive(Debug, Error)]
enum StartupError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("database: {0}")]
    Store(#[from] StoreError),
    #[error(transparent)]
    Service(#[from] ServiceError),
    #[error("status serialization: {0}")]
    Json(#[from] serde_json::Error),
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    log::info!("Starting {} v{}...", APP_NAME, APP_VERSION);

    if let Err(e) = run().await {
        log::error!("{}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<(), StartupError> {
    let config = EngineConfig::from_env();
    config.validate()?;

    log::info!("Database: {:?}", config.database_path);
    let store = Arc::new(SqliteStore::open(&config.database_path)?);

    let loaded = load_model(&config.model_path, &config.model)?;
    if !loaded.metadata.is_trained() {
        log::warn!("Running with untrained weights - predictions are not meaningful");
    }

    let ctx = EngineContext::new(loaded.model.clone(), config)?;
    let service = DetectionService::new(ctx, Stores::shared(store)).with_metadata(loaded.metadata);

    let report = tokio::task::block_in_place(|| service.run_batch())?;
    log::info!(
        "Batch finished: {} devices, {} thresholds, {} predictions",
        report.devices, report.calibrated, report.predictions
    );

    log::info!("Engine status: {}", serde_json::to_string(&service.engine_status())?);

    service.shutdown().await;
    Ok(())
}
