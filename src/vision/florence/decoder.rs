// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Florence-2 language decoder model
//!
//! Runs the (cache-less) decoder over every live beam at once and returns the
//! logits of the last position for each beam.

use anyhow::{Context, Result};
use ndarray::{Array2, Array3, Axis, Ix3};
use ort::session::Session;
use ort::value::Value;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::debug;

use super::encoder::{EncoderOutput, TokenEmbedder};
use super::session::{build_session, lock_session, Device, SessionOptions};

/// Florence-2 language decoder model
#[derive(Clone)]
pub struct FlorenceDecoder {
    session: Arc<Mutex<Session>>,
    embedder: TokenEmbedder,
    device: Device,
}

impl std::fmt::Debug for FlorenceDecoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlorenceDecoder")
            .field("device", &self.device)
            .finish_non_exhaustive()
    }
}

impl FlorenceDecoder {
    /// Load the decoder from `decoder_model.onnx`
    pub fn new(model_path: &Path, embedder: TokenEmbedder, options: SessionOptions) -> Result<Self> {
        let (session, device) =
            build_session(model_path, options).context("Failed to load Florence decoder")?;

        let input_names: Vec<_> = session.inputs.iter().map(|i| &i.name).collect();
        debug!("Decoder inputs: {:?}", input_names);

        Ok(Self {
            session: Arc::new(Mutex::new(session)),
            embedder,
            device,
        })
    }

    pub fn device(&self) -> Device {
        self.device
    }

    /// Next-token logits for each sequence in `beams`
    ///
    /// All sequences must have the same length. The encoder output is
    /// broadcast across the beam batch.
    pub fn next_token_logits(
        &self,
        encoder: &EncoderOutput,
        beams: &[Vec<u32>],
    ) -> Result<Vec<Vec<f32>>> {
        let batch = beams.len();
        let inputs_embeds = self.embedder.embed(beams)?;

        let (hidden_states, attention_mask) = broadcast_encoder(encoder, batch)?;

        let encoder_value = Value::from_array(hidden_states)
            .context("Failed to create encoder hidden states tensor")?;
        let attention_mask_value = Value::from_array(attention_mask)
            .context("Failed to create encoder attention mask tensor")?;
        let inputs_embeds_value =
            Value::from_array(inputs_embeds).context("Failed to create inputs_embeds tensor")?;

        let mut session = lock_session(&self.session)?;
        let outputs = session
            .run(ort::inputs![
                "encoder_hidden_states" => encoder_value,
                "encoder_attention_mask" => attention_mask_value,
                "inputs_embeds" => inputs_embeds_value
            ])
            .context("Decoder inference failed")?;

        let logits = outputs[0]
            .try_extract_array::<f32>()
            .context("Failed to extract logits tensor")?
            .into_dimensionality::<Ix3>()
            .context("Decoder returned logits that are not [batch, len, vocab]")?;

        let (out_batch, len, _) = logits.dim();
        if out_batch != batch || len == 0 {
            anyhow::bail!(
                "Decoder returned logits of shape {:?} for {} beams",
                logits.shape(),
                batch
            );
        }

        let last = logits.index_axis(Axis(1), len - 1);
        let rows = last.outer_iter().map(|row| row.to_vec()).collect();

        Ok(rows)
    }
}

/// Repeat `[1, seq, dim]` encoder states and their mask across `batch` beams
fn broadcast_encoder(encoder: &EncoderOutput, batch: usize) -> Result<(Array3<f32>, Array2<i64>)> {
    let (_, seq_len, dim) = encoder.hidden_states.dim();

    let hidden_states = encoder
        .hidden_states
        .broadcast((batch, seq_len, dim))
        .context("Cannot broadcast encoder hidden states across beams")?
        .to_owned();
    let attention_mask = encoder
        .attention_mask
        .broadcast((batch, seq_len))
        .context("Cannot broadcast encoder attention mask across beams")?
        .to_owned();

    Ok((hidden_states, attention_mask))
}
