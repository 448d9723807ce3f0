// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Florence-2 encoder stack
//!
//! Three ONNX graphs feed the decoder:
//! - `vision_encoder.onnx` turns pixel values into image features
//! - `embed_tokens.onnx` turns token ids into embeddings (shared with the decoder)
//! - `encoder_model.onnx` fuses image features with the prompt embeddings

use anyhow::{Context, Result};
use ndarray::{concatenate, Array2, Array3, Array4, Axis, Ix3};
use ort::session::Session;
use ort::value::Value;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::debug;

use super::preprocessing::FLORENCE_INPUT_SIZE;
use super::session::{build_session, lock_session, Device, SessionOptions};

/// Token id -> embedding lookup, shared by the text encoder and the decoder
#[derive(Clone)]
pub struct TokenEmbedder {
    session: Arc<Mutex<Session>>,
}

impl std::fmt::Debug for TokenEmbedder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenEmbedder").finish_non_exhaustive()
    }
}

impl TokenEmbedder {
    pub fn new(model_path: &Path, options: SessionOptions) -> Result<(Self, Device)> {
        let (session, device) = build_session(model_path, options)
            .context("Failed to load Florence embed_tokens model")?;
        Ok((
            Self {
                session: Arc::new(Mutex::new(session)),
            },
            device,
        ))
    }

    /// Embed a batch of equal-length token sequences into `[batch, len, dim]`
    pub fn embed(&self, sequences: &[Vec<u32>]) -> Result<Array3<f32>> {
        let batch = sequences.len();
        let len = sequences.first().map(Vec::len).unwrap_or(0);
        if batch == 0 || len == 0 {
            anyhow::bail!("Cannot embed an empty token batch");
        }
        if sequences.iter().any(|s| s.len() != len) {
            anyhow::bail!("Token sequences in a batch must have equal length");
        }

        let flat: Vec<i64> = sequences.iter().flatten().map(|&id| id as i64).collect();
        let input_ids = Array2::from_shape_vec((batch, len), flat)
            .context("Failed to shape input_ids")?;

        let input_value =
            Value::from_array(input_ids).context("Failed to create input_ids tensor")?;

        let mut session = lock_session(&self.session)?;
        let outputs = session
            .run(ort::inputs!["input_ids" => input_value])
            .context("embed_tokens inference failed")?;

        let embeddings = outputs[0]
            .try_extract_array::<f32>()
            .context("Failed to extract embeddings tensor")?
            .to_owned()
            .into_dimensionality::<Ix3>()
            .context("embed_tokens returned a tensor that is not [batch, len, dim]")?;

        Ok(embeddings)
    }
}

/// Output of the encoder stack, ready for cross-attention in the decoder
#[derive(Debug, Clone)]
pub struct EncoderOutput {
    /// `[1, seq_len, dim]`
    pub hidden_states: Array3<f32>,
    /// `[1, seq_len]`, all ones
    pub attention_mask: Array2<i64>,
}

/// Florence-2 vision encoder and text encoder
#[derive(Clone)]
pub struct FlorenceEncoder {
    vision_session: Arc<Mutex<Session>>,
    text_session: Arc<Mutex<Session>>,
    embedder: TokenEmbedder,
    pixel_input_name: String,
    device: Device,
}

impl std::fmt::Debug for FlorenceEncoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlorenceEncoder")
            .field("pixel_input_name", &self.pixel_input_name)
            .field("device", &self.device)
            .finish_non_exhaustive()
    }
}

impl FlorenceEncoder {
    /// Load the vision and text encoders
    ///
    /// # Errors
    /// Returns error if either model file is missing or ONNX Runtime
    /// cannot initialise a session for it.
    pub fn new(
        vision_path: &Path,
        text_path: &Path,
        embedder: TokenEmbedder,
        options: SessionOptions,
    ) -> Result<Self> {
        let (vision_session, vision_device) = build_session(vision_path, options)
            .context("Failed to load Florence vision encoder")?;
        let (text_session, text_device) = build_session(text_path, options)
            .context("Failed to load Florence text encoder")?;

        let pixel_input_name = vision_session
            .inputs
            .first()
            .map(|input| input.name.clone())
            .unwrap_or_else(|| "pixel_values".to_string());

        debug!(
            "Florence encoders loaded - vision input: {}, devices: {}/{}",
            pixel_input_name, vision_device, text_device
        );

        Ok(Self {
            vision_session: Arc::new(Mutex::new(vision_session)),
            text_session: Arc::new(Mutex::new(text_session)),
            embedder,
            pixel_input_name,
            device: vision_device,
        })
    }

    pub fn device(&self) -> Device {
        self.device
    }

    /// Extract image features from a preprocessed `[1, 3, 768, 768]` tensor
    pub fn encode_image(&self, pixel_values: &Array4<f32>) -> Result<Array3<f32>> {
        let shape = pixel_values.shape();
        if shape.len() != 4 || shape[0] != 1 || shape[1] != 3 {
            anyhow::bail!("Invalid input shape: {:?}, expected [1, 3, H, W]", shape);
        }
        if shape[2] != FLORENCE_INPUT_SIZE as usize || shape[3] != FLORENCE_INPUT_SIZE as usize {
            debug!(
                "Input size {}x{} differs from expected {}x{}",
                shape[2], shape[3], FLORENCE_INPUT_SIZE, FLORENCE_INPUT_SIZE
            );
        }

        let input_value = Value::from_array(pixel_values.to_owned())
            .context("Failed to create pixel_values tensor")?;

        let mut session = lock_session(&self.vision_session)?;
        let outputs = session
            .run(ort::inputs![self.pixel_input_name.as_str() => input_value])
            .context("Vision encoder inference failed")?;

        let features = outputs[0]
            .try_extract_array::<f32>()
            .context("Failed to extract image features")?
            .to_owned()
            .into_dimensionality::<Ix3>()
            .context("Vision encoder returned a tensor that is not [1, seq, dim]")?;

        debug!("Image features shape: {:?}", features.shape());
        Ok(features)
    }

    /// Fuse image features with the tokenized prompt
    ///
    /// The text encoder sees `image_features ++ embed(prompt_ids)` with a
    /// full attention mask.
    pub fn encode(&self, image_features: &Array3<f32>, prompt_ids: &[u32]) -> Result<EncoderOutput> {
        let prompt_embeds = self.embedder.embed(&[prompt_ids.to_vec()])?;

        if prompt_embeds.shape()[2] != image_features.shape()[2] {
            anyhow::bail!(
                "Embedding width mismatch: image features {:?}, prompt {:?}",
                image_features.shape(),
                prompt_embeds.shape()
            );
        }

        let inputs_embeds = concatenate(Axis(1), &[image_features.view(), prompt_embeds.view()])
            .context("Failed to concatenate image and prompt embeddings")?;
        let seq_len = inputs_embeds.shape()[1];
        let attention_mask = Array2::<i64>::ones((1, seq_len));

        let embeds_value =
            Value::from_array(inputs_embeds).context("Failed to create inputs_embeds tensor")?;
        let mask_value = Value::from_array(attention_mask.clone())
            .context("Failed to create attention_mask tensor")?;

        let mut session = lock_session(&self.text_session)?;
        let outputs = session
            .run(ort::inputs![
                "inputs_embeds" => embeds_value,
                "attention_mask" => mask_value
            ])
            .context("Text encoder inference failed")?;

        let hidden_states = outputs[0]
            .try_extract_array::<f32>()
            .context("Failed to extract encoder hidden states")?
            .to_owned()
            .into_dimensionality::<Ix3>()
            .context("Text encoder returned a tensor that is not [1, seq, dim]")?;

        debug!(
            "Encoder output: {} positions x {} dimensions",
            hidden_states.shape()[1],
            hidden_states.shape()[2]
        );

        Ok(EncoderOutput {
            hidden_states,
            attention_mask,
        })
    }
}
