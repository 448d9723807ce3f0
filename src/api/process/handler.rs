// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Process endpoint handler

use axum::{extract::State, Json};
use axum_extra::extract::multipart::{Multipart, MultipartRejection};
use tracing::{debug, dispatcher, error, info, warn, Span};

use super::request::ProcessForm;
use super::response::ProcessResponse;
use crate::api::errors::ApiError;
use crate::api::http_server::AppState;
use crate::vision::image_utils::{decode_image_bytes_with_limit, ImageError};
use crate::vision::DocumentQa;

/// POST /api/process - Answer a question about an uploaded document image
///
/// Accepts a multipart form with `file` (image) and `question` (text).
/// Decoding and inference run on the blocking pool, inside the request span.
pub async fn process_handler(
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<ProcessResponse>, ApiError> {
    let mut multipart = multipart.map_err(|e| ApiError::MalformedForm(e.body_text()))?;
    let form = ProcessForm::from_multipart(&mut multipart, state.max_upload_bytes).await?;

    info!(
        "Received new request: filename='{}', question='{}'",
        form.display_name(),
        form.question
    );

    let engine = state.engine.clone();
    let max_bytes = state.max_upload_bytes;
    let span = Span::current();
    // Blocking threads have no default subscriber of their own
    let dispatch = dispatcher::get_default(|d| d.clone());

    let answer = tokio::task::spawn_blocking(move || {
        dispatcher::with_default(&dispatch, || {
            let _entered = span.enter();
            answer_form(engine.as_ref(), &form, max_bytes)
        })
    })
    .await
    .map_err(|e| ApiError::Internal(format!("Inference task failed: {}", e)))??;

    Ok(Json(ProcessResponse { answer }))
}

/// Decode the upload and run the model on it
fn answer_form(
    engine: &dyn DocumentQa,
    form: &ProcessForm,
    max_bytes: usize,
) -> Result<String, ApiError> {
    let (image, info) = decode_image_bytes_with_limit(&form.file, max_bytes).map_err(|e| {
        warn!("Invalid image file uploaded: {} ({})", form.display_name(), e);
        match e {
            ImageError::TooLarge(_, max) => ApiError::PayloadTooLarge(max),
            _ => ApiError::InvalidImage,
        }
    })?;
    debug!(
        "Image '{}' opened successfully: {}x{} {:?}",
        form.display_name(),
        info.width,
        info.height,
        info.format
    );

    engine.answer(&image, &form.question).map_err(|e| {
        error!("An error occurred during inference: {:#}", e);
        ApiError::InferenceFailed(format!("{:#}", e))
    })
}
