// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1

//! Vision model manager tests
//!
//! Verify that model resolution:
//! - Prefers a complete local directory (flat or `onnx/` layout)
//! - Fails clearly when offline and nothing is available
//! - Loads a real model when one has been downloaded (ignored by default)

use florence_docvqa_api::vision::florence::{DevicePreference, GenerationConfig};
use florence_docvqa_api::vision::{load_model, resolve_files, DocumentQa, VisionModelConfig};
use image::DynamicImage;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

const FLORENCE_MODEL_DIR: &str = "./models/florence-2-docvqa-onnx";

const ONNX_FILES: [&str; 4] = [
    "vision_encoder.onnx",
    "embed_tokens.onnx",
    "encoder_model.onnx",
    "decoder_model.onnx",
];

fn write_model_dir(root: &Path, onnx_subdir: bool) {
    let onnx_dir = if onnx_subdir { root.join("onnx") } else { root.to_path_buf() };
    fs::create_dir_all(&onnx_dir).unwrap();
    for name in ONNX_FILES {
        fs::write(onnx_dir.join(name), b"").unwrap();
    }
    fs::write(root.join("tokenizer.json"), b"{}").unwrap();
}

fn offline_config(dir: &Path) -> VisionModelConfig {
    VisionModelConfig {
        model_dir: dir.to_path_buf(),
        model_repo: "nonexistent-org/florence-test-fixture".to_string(),
        offline: true,
        ..Default::default()
    }
}

#[test]
fn test_default_config_points_at_docvqa_model() {
    let config = VisionModelConfig::default();
    assert_eq!(config.model_dir, PathBuf::from(FLORENCE_MODEL_DIR));
    assert_eq!(config.device, DevicePreference::Auto);
    assert_eq!(config.generation, GenerationConfig::default());
}

#[tokio::test]
async fn test_resolve_flat_directory() {
    let dir = TempDir::new().unwrap();
    write_model_dir(dir.path(), false);

    let files = resolve_files(&offline_config(dir.path())).await.unwrap();
    assert_eq!(files.decoder, dir.path().join("decoder_model.onnx"));
}

#[tokio::test]
async fn test_resolve_hub_layout_directory() {
    let dir = TempDir::new().unwrap();
    write_model_dir(dir.path(), true);

    let files = resolve_files(&offline_config(dir.path())).await.unwrap();
    assert_eq!(files.decoder, dir.path().join("onnx").join("decoder_model.onnx"));
    assert_eq!(files.tokenizer, dir.path().join("tokenizer.json"));
}

#[tokio::test]
async fn test_offline_without_model_fails() {
    let dir = TempDir::new().unwrap();
    let result = resolve_files(&offline_config(dir.path())).await;
    assert!(result.is_err());
}

#[tokio::test]
async fn test_load_rejects_invalid_model_files() {
    let dir = TempDir::new().unwrap();
    write_model_dir(dir.path(), false);

    // Empty files resolve but cannot be loaded
    assert!(load_model(&offline_config(dir.path())).await.is_err());
}

#[tokio::test]
#[ignore] // Only run if model files are downloaded
async fn test_load_real_model_and_answer() {
    let config = VisionModelConfig {
        offline: true,
        generation: GenerationConfig {
            max_new_tokens: 32,
            ..Default::default()
        },
        ..Default::default()
    };
    let model = match load_model(&config).await {
        Ok(m) => m,
        Err(_) => return,
    };

    let img = DynamicImage::new_rgb8(800, 1000);
    let answer = model.answer(&img, "What is the title?").unwrap();
    assert!(!answer.is_empty());
    assert!(!model.model_name().is_empty());
}
