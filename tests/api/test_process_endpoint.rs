// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1

//! POST /api/process tests
//!
//! Verify that the process endpoint:
//! - Answers valid image + question uploads with `{"answer": ...}`
//! - Rejects non-image payloads with 400
//! - Reports missing form fields with 422
//! - Maps engine failures to 500 with the failure message

use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use florence_docvqa_api::api::{create_app, AppState};
use image::ImageFormat;
use std::sync::Arc;
use tower::util::ServiceExt;

use super::support::{
    document_image, json_body, multipart_body, process_request, Part, StubEngine,
};

fn app_with(engine: Arc<StubEngine>) -> axum::Router {
    create_app(AppState::new(engine))
}

#[tokio::test]
async fn test_valid_png_returns_answer() {
    let engine = Arc::new(StubEngine::answering("$1,250.00"));
    let image = document_image(ImageFormat::Png);
    let body = multipart_body(&[
        Part::File { name: "file", filename: "invoice.png", data: &image },
        Part::Text { name: "question", value: "What is the total amount?" },
    ]);

    let response = app_with(engine.clone())
        .oneshot(process_request(body))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = json_body(response).await;
    assert_eq!(json["answer"], "$1,250.00");
    assert_eq!(engine.call_count(), 1);
    assert_eq!(
        engine.last_question.lock().unwrap().as_deref(),
        Some("What is the total amount?")
    );
}

#[tokio::test]
async fn test_jpeg_upload_accepted() {
    let engine = Arc::new(StubEngine::answering("ACME Corp"));
    let image = document_image(ImageFormat::Jpeg);
    let body = multipart_body(&[
        Part::Text { name: "question", value: "Who is the vendor?" },
        Part::File { name: "file", filename: "scan.jpg", data: &image },
    ]);

    let response = app_with(engine).oneshot(process_request(body)).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert!(!json_body(response).await["answer"].as_str().unwrap().is_empty());
}

#[tokio::test]
async fn test_non_image_returns_400() {
    let engine = Arc::new(StubEngine::answering("unused"));
    let body = multipart_body(&[
        Part::File { name: "file", filename: "notes.txt", data: b"just some text, not pixels" },
        Part::Text { name: "question", value: "What is this?" },
    ]);

    let response = app_with(engine.clone())
        .oneshot(process_request(body))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = json_body(response).await;
    assert_eq!(json["detail"], "Invalid image file provided.");
    assert_eq!(engine.call_count(), 0);
}

#[tokio::test]
async fn test_truncated_png_returns_400() {
    let engine = Arc::new(StubEngine::answering("unused"));
    let image = document_image(ImageFormat::Png);
    let body = multipart_body(&[
        Part::File { name: "file", filename: "broken.png", data: &image[..32] },
        Part::Text { name: "question", value: "What is the date?" },
    ]);

    let response = app_with(engine).oneshot(process_request(body)).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_missing_question_returns_422() {
    let engine = Arc::new(StubEngine::answering("unused"));
    let image = document_image(ImageFormat::Png);
    let body = multipart_body(&[Part::File { name: "file", filename: "doc.png", data: &image }]);

    let response = app_with(engine).oneshot(process_request(body)).await.unwrap();

    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(json_body(response).await["detail"], "Missing form field: question");
}

#[tokio::test]
async fn test_missing_file_returns_422() {
    let engine = Arc::new(StubEngine::answering("unused"));
    let body = multipart_body(&[Part::Text { name: "question", value: "What is the total?" }]);

    let response = app_with(engine).oneshot(process_request(body)).await.unwrap();

    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(json_body(response).await["detail"], "Missing form field: file");
}

#[tokio::test]
async fn test_empty_question_returns_422() {
    let engine = Arc::new(StubEngine::answering("unused"));
    let image = document_image(ImageFormat::Png);
    let body = multipart_body(&[
        Part::File { name: "file", filename: "doc.png", data: &image },
        Part::Text { name: "question", value: "" },
    ]);

    let response = app_with(engine.clone()).oneshot(process_request(body)).await.unwrap();

    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(engine.call_count(), 0);
}

#[tokio::test]
async fn test_whitespace_question_reaches_engine() {
    let engine = Arc::new(StubEngine::answering("nothing to answer"));
    let image = document_image(ImageFormat::Png);
    let body = multipart_body(&[
        Part::File { name: "file", filename: "doc.png", data: &image },
        Part::Text { name: "question", value: "   " },
    ]);

    let response = app_with(engine.clone()).oneshot(process_request(body)).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(engine.last_question.lock().unwrap().as_deref(), Some("   "));
}

#[tokio::test]
async fn test_inference_failure_returns_500() {
    let engine = Arc::new(StubEngine::failing("decoder session unavailable"));
    let image = document_image(ImageFormat::Png);
    let body = multipart_body(&[
        Part::File { name: "file", filename: "doc.png", data: &image },
        Part::Text { name: "question", value: "What is the total?" },
    ]);

    let response = app_with(engine).oneshot(process_request(body)).await.unwrap();

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(
        json_body(response).await["detail"],
        "Inference failed: decoder session unavailable"
    );
}

#[tokio::test]
async fn test_non_multipart_body_returns_400() {
    let engine = Arc::new(StubEngine::answering("unused"));
    let request = Request::builder()
        .method(Method::POST)
        .uri("/api/process")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(r#"{"question": "What is the total?"}"#))
        .unwrap();

    let response = app_with(engine).oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(json_body(response).await["detail"].is_string());
}

#[tokio::test]
async fn test_upload_over_limit_returns_413() {
    let engine = Arc::new(StubEngine::answering("unused"));
    let state = AppState::new(engine).with_max_upload_bytes(1024);
    let big = vec![0u8; 256 * 1024];
    let body = multipart_body(&[
        Part::File { name: "file", filename: "huge.png", data: &big },
        Part::Text { name: "question", value: "What is the total?" },
    ]);

    let response = create_app(state).oneshot(process_request(body)).await.unwrap();
    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
}

#[tokio::test]
async fn test_get_not_allowed() {
    let engine = Arc::new(StubEngine::answering("unused"));
    let request = Request::builder()
        .uri("/api/process")
        .body(Body::empty())
        .unwrap();

    let response = app_with(engine).oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
}
