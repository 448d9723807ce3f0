// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
use anyhow::{Context, Result};
use axum::{
    extract::DefaultBodyLimit,
    http::{HeaderName, HeaderValue},
    middleware,
    routing::{get, post},
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::{AllowHeaders, AllowMethods, AllowOrigin, CorsLayer};
use tracing::{info, warn};

use super::handlers::health_handler;
use super::middleware::{request_context, PROCESS_TIME_HEADER, REQUEST_ID_HEADER};
use super::process::process_handler;
use crate::config::DEFAULT_MAX_UPLOAD_BYTES;
use crate::vision::DocumentQa;

/// Shared state for all routes
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<dyn DocumentQa>,
    /// Request body limit for uploads
    pub max_upload_bytes: usize,
    /// Allowed CORS origins; empty mirrors any origin
    pub cors_origins: Vec<String>,
}

impl AppState {
    pub fn new(engine: Arc<dyn DocumentQa>) -> Self {
        Self {
            engine,
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            cors_origins: Vec::new(),
        }
    }

    pub fn with_max_upload_bytes(mut self, max_upload_bytes: usize) -> Self {
        self.max_upload_bytes = max_upload_bytes;
        self
    }

    pub fn with_cors_origins(mut self, cors_origins: Vec<String>) -> Self {
        self.cors_origins = cors_origins;
        self
    }
}

/// Build the router with CORS, body limit and the request-context middleware
///
/// The request-context layer is outermost so CORS preflights and
/// rejections also carry `X-Request-ID`.
pub fn create_app(state: AppState) -> Router {
    let cors = cors_layer(&state.cors_origins);
    // Multipart framing on top of the file itself
    let body_limit = state.max_upload_bytes.saturating_add(64 * 1024);

    Router::new()
        .route("/", get(health_handler))
        .route("/api/process", post(process_handler))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(cors)
        .layer(middleware::from_fn(request_context))
        .with_state(state)
}

/// CORS policy: mirror any origin with credentials, or allow a fixed list
pub fn cors_layer(origins: &[String]) -> CorsLayer {
    let exposed = [
        HeaderName::from_static(REQUEST_ID_HEADER),
        HeaderName::from_static(PROCESS_TIME_HEADER),
    ];

    if origins.is_empty() {
        return CorsLayer::very_permissive().expose_headers(exposed);
    }

    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                warn!("Ignoring invalid CORS origin: {}", origin);
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(allowed))
        .allow_methods(AllowMethods::mirror_request())
        .allow_headers(AllowHeaders::mirror_request())
        .allow_credentials(true)
        .expose_headers(exposed)
}

/// Serve until Ctrl-C or SIGTERM
pub async fn start_server(addr: SocketAddr, state: AppState) -> Result<()> {
    let app = create_app(state);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    info!("Florence-2 API listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server error")?;

    info!("Server shut down");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
