// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Multipart form for the process endpoint

use axum::body::Bytes;
use axum::http::StatusCode;
use axum_extra::extract::multipart::{Multipart, MultipartError};
use tracing::debug;

use crate::api::errors::ApiError;

pub const FILE_FIELD: &str = "file";
pub const QUESTION_FIELD: &str = "question";

/// Uploaded document and question
#[derive(Debug, Clone)]
pub struct ProcessForm {
    pub file: Bytes,
    /// Client-supplied file name, if any
    pub filename: Option<String>,
    pub question: String,
}

impl ProcessForm {
    /// Read `file` and `question` from the form, ignoring other fields
    ///
    /// An empty question counts as missing; whitespace is passed through.
    pub async fn from_multipart(
        multipart: &mut Multipart,
        max_upload_bytes: usize,
    ) -> Result<Self, ApiError> {
        let mut file = None;
        let mut filename = None;
        let mut question = None;

        while let Some(field) = multipart
            .next_field()
            .await
            .map_err(|e| multipart_error(e, max_upload_bytes))?
        {
            match field.name() {
                Some(FILE_FIELD) => {
                    filename = field.file_name().map(str::to_string);
                    let bytes = field
                        .bytes()
                        .await
                        .map_err(|e| multipart_error(e, max_upload_bytes))?;
                    file = Some(bytes);
                }
                Some(QUESTION_FIELD) => {
                    let text = field
                        .text()
                        .await
                        .map_err(|e| multipart_error(e, max_upload_bytes))?;
                    question = Some(text);
                }
                other => debug!("Ignoring form field {:?}", other),
            }
        }

        let file = file.ok_or(ApiError::MissingField(FILE_FIELD))?;
        let question = question
            .filter(|q| !q.is_empty())
            .ok_or(ApiError::MissingField(QUESTION_FIELD))?;

        Ok(Self {
            file,
            filename,
            question,
        })
    }

    pub fn display_name(&self) -> &str {
        self.filename.as_deref().unwrap_or("<unnamed>")
    }
}

fn multipart_error(err: MultipartError, max_upload_bytes: usize) -> ApiError {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        ApiError::PayloadTooLarge(max_upload_bytes)
    } else {
        ApiError::MalformedForm(err.body_text())
    }
}
