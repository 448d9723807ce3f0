// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
pub mod api;
pub mod config;
pub mod logging;
pub mod version;
pub mod vision;

pub use api::{create_app, start_server, AppState};
pub use config::ServerConfig;
pub use logging::{setup_logging, LoggingConfig, LoggingGuard};
pub use vision::{load_model, DocumentQa, VisionModelConfig};
