// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
use anyhow::Result;
use clap::Parser;
use florence_docvqa_api::{
    api::{start_server, AppState},
    config::ServerConfig,
    logging::setup_logging,
    version,
    vision::{load_model, DocumentQa},
};
use std::sync::Arc;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();

    let config = ServerConfig::parse();
    config
        .validate()
        .map_err(|e| anyhow::anyhow!("Invalid configuration: {}", e))?;

    let logging = setup_logging(&config.logging_config())?;

    info!("Starting server...");
    info!("{}", version::get_version_string());
    info!("Features: {}", version::FEATURES.join(", "));
    info!("Writing JSON logs to {}", logging.log_file().display());
    info!("Loading environment variables and model...");

    let vision_config = config.vision_model_config();
    let model = match load_model(&vision_config).await {
        Ok(model) => model,
        Err(e) => {
            // Nothing can be served without the model
            error!("Failed to load model: {:#}", e);
            // Flush the file worker before exiting
            drop(logging);
            std::process::exit(1);
        }
    };
    info!("Using model '{}' on device: {}", model.model_name(), model.device());
    let generation = model.generation_config();
    info!(
        "Beam search: {} beams, up to {} new tokens",
        generation.num_beams, generation.max_new_tokens
    );

    let engine: Arc<dyn DocumentQa> = model;
    let state = AppState::new(engine)
        .with_max_upload_bytes(config.max_upload_bytes)
        .with_cors_origins(config.cors_origins());

    let result = start_server(config.socket_addr(), state).await;
    drop(logging);
    result
}
