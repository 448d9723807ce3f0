// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Florence-2 document question answering
//!
//! Drives an ONNX export of Florence-2 through ONNX Runtime.
//!
//! Components:
//! - `session` - ONNX Runtime session construction and device selection
//! - `preprocessing` - Image preprocessing for encoder input
//! - `encoder` - Vision encoder, token embedder and text encoder
//! - `decoder` - Language decoder producing next-token logits
//! - `generation` - Beam search
//! - `postprocess` - DocVQA prompt and answer extraction
//! - `model` - Combined Florence-2 pipeline

pub mod decoder;
pub mod encoder;
pub mod generation;
pub mod model;
pub mod postprocess;
pub mod preprocessing;
pub mod session;

pub use decoder::FlorenceDecoder;
pub use encoder::{EncoderOutput, FlorenceEncoder, TokenEmbedder};
pub use generation::{beam_search, GenerationConfig, Hypothesis};
pub use model::{FlorenceFiles, FlorenceModel};
pub use postprocess::{build_prompt, parse_answer, DOCVQA_TASK, UNPARSEABLE_ANSWER};
pub use preprocessing::{preprocess_for_florence, ResizeMode};
pub use session::{Device, DevicePreference, SessionOptions};
