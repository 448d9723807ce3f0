// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::info;

pub const HEALTH_STATUS: &str = "Florence-2 API is running";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HealthResponse {
    pub status: String,
}

/// GET / - Liveness check
pub async fn health_handler() -> Json<HealthResponse> {
    info!("Health check endpoint was hit.");
    Json(HealthResponse {
        status: HEALTH_STATUS.to_string(),
    })
}
