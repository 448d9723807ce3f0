// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Per-request correlation ID and timing

use axum::extract::Request;
use axum::http::HeaderValue;
use axum::middleware::Next;
use axum::response::Response;
use std::time::Instant;
use tracing::{error, info, info_span, Instrument};
use uuid::Uuid;

pub const REQUEST_ID_HEADER: &str = "x-request-id";
pub const PROCESS_TIME_HEADER: &str = "x-process-time";

/// Tag the request with a fresh UUID and time it
///
/// Everything logged while the request is handled runs inside a `request`
/// span carrying `request_id`. The response gets `X-Request-ID` and
/// `X-Process-Time` (seconds) headers.
pub async fn request_context(request: Request, next: Next) -> Response {
    let request_id = Uuid::new_v4().to_string();
    let span = info_span!("request", request_id = %request_id);

    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let start = Instant::now();

    async move {
        info!("Request started: {} {}", method, path);

        let mut response = next.run(request).await;
        let process_time = start.elapsed().as_secs_f64();

        let headers = response.headers_mut();
        if let Ok(value) = HeaderValue::from_str(&process_time.to_string()) {
            headers.insert(PROCESS_TIME_HEADER, value);
        }
        if let Ok(value) = HeaderValue::from_str(&request_id) {
            headers.insert(REQUEST_ID_HEADER, value);
        }

        let status = response.status();
        if status.is_server_error() {
            error!(
                "Request failed: {} | Processed in {:.4}s",
                status.as_u16(),
                process_time
            );
        } else {
            info!(
                "Request finished: {} | Processed in {:.4}s",
                status.as_u16(),
                process_time
            );
        }

        response
    }
    .instrument(span)
    .await
}
