// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Vision processing module for document question answering
//!
//! This module provides:
//! - Image decoding and validation
//! - Florence-2 DocVQA inference over ONNX Runtime
//! - The `DocumentQa` seam used by the HTTP layer

pub mod engine;
pub mod florence;
pub mod image_utils;
pub mod model_manager;

pub use engine::DocumentQa;
pub use image_utils::{decode_image_bytes, detect_format, ImageError, ImageInfo};
pub use model_manager::{load_model, resolve_files, VisionModelConfig};
