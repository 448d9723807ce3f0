// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1

//! Correlation ID, timing header and log correlation tests

use axum::body::Body;
use axum::http::{Request, StatusCode};
use florence_docvqa_api::api::{create_app, AppState, PROCESS_TIME_HEADER, REQUEST_ID_HEADER};
use florence_docvqa_api::vision::florence::Device;
use florence_docvqa_api::vision::DocumentQa;
use image::{DynamicImage, ImageFormat};
use std::collections::HashSet;
use std::io::{self, Write};
use std::sync::{Arc, Mutex};
use tower::util::ServiceExt;

use super::support::{document_image, multipart_body, process_request, Part, StubEngine};

fn app() -> axum::Router {
    create_app(AppState::new(Arc::new(StubEngine::answering("42"))))
}

#[tokio::test]
async fn test_request_ids_are_unique() {
    let app = app();
    let mut seen = HashSet::new();

    for _ in 0..10 {
        let response = app
            .clone()
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let id = response.headers()[REQUEST_ID_HEADER]
            .to_str()
            .unwrap()
            .to_string();
        assert!(uuid::Uuid::parse_str(&id).is_ok(), "not a UUID: {}", id);
        assert!(seen.insert(id), "duplicate request id");
    }
}

#[tokio::test]
async fn test_process_time_is_seconds() {
    let response = app()
        .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
        .await
        .unwrap();

    let seconds: f64 = response.headers()[PROCESS_TIME_HEADER]
        .to_str()
        .unwrap()
        .parse()
        .unwrap();
    assert!(seconds >= 0.0);
    assert!(seconds < 60.0);
}

#[tokio::test]
async fn test_headers_on_success_and_error_responses() {
    let image = document_image(ImageFormat::Png);
    let ok = multipart_body(&[
        Part::File { name: "file", filename: "doc.png", data: &image },
        Part::Text { name: "question", value: "What is the answer?" },
    ]);
    let bad = multipart_body(&[
        Part::File { name: "file", filename: "doc.txt", data: b"plain text" },
        Part::Text { name: "question", value: "What is the answer?" },
    ]);

    let app = app();
    let ok_response = app.clone().oneshot(process_request(ok)).await.unwrap();
    let bad_response = app.clone().oneshot(process_request(bad)).await.unwrap();
    let missing = app
        .oneshot(Request::builder().uri("/nope").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(ok_response.status(), StatusCode::OK);
    assert_eq!(bad_response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(missing.status(), StatusCode::NOT_FOUND);

    for response in [&ok_response, &bad_response, &missing] {
        assert!(response.headers().contains_key(REQUEST_ID_HEADER));
        assert!(response.headers().contains_key(PROCESS_TIME_HEADER));
    }
}

/// In-memory sink for the JSON formatter
#[derive(Clone, Default)]
struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

impl Write for CapturedLogs {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl CapturedLogs {
    fn records(&self) -> Vec<serde_json::Value> {
        let bytes = self.0.lock().unwrap().clone();
        String::from_utf8(bytes)
            .unwrap()
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect()
    }
}

/// Engine that logs from inside inference, i.e. on the blocking pool
struct LoggingEngine;

impl DocumentQa for LoggingEngine {
    fn answer(&self, _image: &DynamicImage, _question: &str) -> anyhow::Result<String> {
        tracing::info!("Engine answering question");
        Ok("Acme Corp".to_string())
    }

    fn device(&self) -> Device {
        Device::Cpu
    }

    fn model_name(&self) -> String {
        "logging-stub".to_string()
    }
}

fn message(record: &serde_json::Value) -> &str {
    record["fields"]["message"].as_str().unwrap_or_default()
}

/// Route this thread's events into a JSON formatter writing to memory
fn capture_json_logs() -> (CapturedLogs, tracing::subscriber::DefaultGuard) {
    let logs = CapturedLogs::default();
    let writer = logs.clone();
    let subscriber = tracing_subscriber::fmt()
        .json()
        .with_current_span(true)
        .with_span_list(false)
        .with_writer(move || writer.clone())
        .finish();
    (logs, tracing::subscriber::set_default(subscriber))
}

#[tokio::test]
async fn test_json_logs_carry_response_request_id() {
    let (logs, _guard) = capture_json_logs();

    let image = document_image(ImageFormat::Png);
    let body = multipart_body(&[
        Part::File { name: "file", filename: "invoice.png", data: &image },
        Part::Text { name: "question", value: "Who issued the invoice?" },
    ]);
    let response = create_app(AppState::new(Arc::new(LoggingEngine)))
        .oneshot(process_request(body))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let request_id = response.headers()[REQUEST_ID_HEADER].to_str().unwrap().to_string();

    let records = logs.records();
    for expected in [
        "Request started: POST /api/process",
        "Received new request: filename='invoice.png', question='Who issued the invoice?'",
        "Engine answering question",
    ] {
        let record = records
            .iter()
            .find(|r| message(r) == expected)
            .unwrap_or_else(|| panic!("no record for {:?}", expected));
        assert_eq!(record["span"]["request_id"], request_id.as_str(), "{}", expected);
    }

    let finished = records
        .iter()
        .find(|r| message(r).starts_with("Request finished: 200"))
        .expect("no finish record");
    assert_eq!(finished["span"]["request_id"], request_id.as_str());
}

#[tokio::test]
async fn test_invalid_image_warning_carries_request_id() {
    let (logs, _guard) = capture_json_logs();

    let body = multipart_body(&[
        Part::File { name: "file", filename: "notes.txt", data: b"plain text" },
        Part::Text { name: "question", value: "What is this?" },
    ]);
    let response = create_app(AppState::new(Arc::new(LoggingEngine)))
        .oneshot(process_request(body))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let request_id = response.headers()[REQUEST_ID_HEADER].to_str().unwrap().to_string();

    let records = logs.records();
    let warning = records
        .iter()
        .find(|r| message(r).starts_with("Invalid image file uploaded: notes.txt"))
        .expect("no invalid image warning");
    assert_eq!(warning["level"], "WARN");
    assert_eq!(warning["span"]["request_id"], request_id.as_str());
    assert!(!records.iter().any(|r| message(r) == "Engine answering question"));
}
