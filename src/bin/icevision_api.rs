//! icevision_api - HTTP detection service
//!
//! This daemon:
//! 1. Loads configuration (ICEVISION_CONFIG file + ICEVISION_* env overrides)
//! 2. Loads the ONNX model once
//! 3. Serves /predict, /predict_video and the liveness probe until Ctrl-C

use anyhow::{Context, Result};
use std::sync::mpsc;

use icevision::api::{ApiConfig, ApiServer};
use icevision::config::ServiceConfig;
use icevision::detect::load_backend;
use icevision::Detector;

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = ServiceConfig::load()?;
    let backend = load_backend(&config.model_path, config.input_size)?;
    let detector = Detector::new(backend, config.label_table());
    log::info!(
        "model {} ready ({} backend, {}px input, labels {:?})",
        config.model_id,
        detector.backend_name(),
        detector.input_size(),
        config.labels
    );

    let api_handle = ApiServer::new(ApiConfig::from(&config), detector).spawn()?;
    log::info!("detection api listening on {}", api_handle.addr);

    let (tx, rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })
    .context("error setting Ctrl-C handler")?;

    log::info!("icevision_api waiting for shutdown signal (Ctrl-C)...");
    let _ = rx.recv();
    log::info!("shutdown signal received, stopping API server...");
    api_handle.stop()?;

    Ok(())
}
