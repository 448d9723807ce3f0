// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Florence-2 DocVQA pipeline
//!
//! Combines the encoder stack, the beam-search decoder and the tokenizer:
//! preprocess -> vision encoder -> text encoder -> beam search -> detokenize.

use anyhow::{Context, Result};
use image::{DynamicImage, GenericImageView};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tokenizers::Tokenizer;
use tracing::{debug, info, warn};

use super::decoder::FlorenceDecoder;
use super::encoder::{FlorenceEncoder, TokenEmbedder};
use super::generation::{beam_search, GenerationConfig};
use super::postprocess::{answer_or_fallback, build_prompt};
use super::preprocessing::{preprocess_for_florence, ResizeMode};
use super::session::{Device, SessionOptions};

pub const VISION_ENCODER_FILE: &str = "vision_encoder.onnx";
pub const EMBED_TOKENS_FILE: &str = "embed_tokens.onnx";
pub const TEXT_ENCODER_FILE: &str = "encoder_model.onnx";
pub const DECODER_FILE: &str = "decoder_model.onnx";
pub const TOKENIZER_FILE: &str = "tokenizer.json";

/// ONNX graphs making up an exported Florence-2 model
pub const ONNX_FILES: [&str; 4] = [
    VISION_ENCODER_FILE,
    EMBED_TOKENS_FILE,
    TEXT_ENCODER_FILE,
    DECODER_FILE,
];

/// Locations of every file the pipeline needs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlorenceFiles {
    pub vision_encoder: PathBuf,
    pub embed_tokens: PathBuf,
    pub text_encoder: PathBuf,
    pub decoder: PathBuf,
    pub tokenizer: PathBuf,
}

impl FlorenceFiles {
    /// Look for a complete model in `dir`
    ///
    /// The ONNX graphs may sit next to `tokenizer.json` or in an `onnx/`
    /// subdirectory (the hub export layout). Returns `None` if anything is
    /// missing.
    pub fn in_dir(dir: &Path) -> Option<Self> {
        let tokenizer = dir.join(TOKENIZER_FILE);
        if !tokenizer.is_file() {
            return None;
        }

        [dir.to_path_buf(), dir.join("onnx")]
            .into_iter()
            .find(|onnx_dir| ONNX_FILES.iter().all(|f| onnx_dir.join(f).is_file()))
            .map(|onnx_dir| Self {
                vision_encoder: onnx_dir.join(VISION_ENCODER_FILE),
                embed_tokens: onnx_dir.join(EMBED_TOKENS_FILE),
                text_encoder: onnx_dir.join(TEXT_ENCODER_FILE),
                decoder: onnx_dir.join(DECODER_FILE),
                tokenizer,
            })
    }
}

/// Special token ids used to seed and stop generation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct SpecialTokens {
    bos: u32,
    eos: u32,
    decoder_start: u32,
}

impl SpecialTokens {
    fn from_tokenizer(tokenizer: &Tokenizer) -> Self {
        let bos = tokenizer.token_to_id("<s>").unwrap_or(0);
        let eos = tokenizer.token_to_id("</s>").unwrap_or(2);
        Self {
            bos,
            eos,
            // BART-style decoders start from EOS
            decoder_start: eos,
        }
    }

    /// `[decoder_start, bos]`, the forced BOS prefix
    fn decoder_prefix(&self) -> [u32; 2] {
        [self.decoder_start, self.bos]
    }
}

/// Florence-2 model answering questions about document images
#[derive(Clone)]
pub struct FlorenceModel {
    name: String,
    encoder: FlorenceEncoder,
    decoder: FlorenceDecoder,
    tokenizer: Arc<Tokenizer>,
    special: SpecialTokens,
    generation: GenerationConfig,
    resize_mode: ResizeMode,
    device: Device,
}

impl std::fmt::Debug for FlorenceModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlorenceModel")
            .field("name", &self.name)
            .field("device", &self.device)
            .field("generation", &self.generation)
            .field("resize_mode", &self.resize_mode)
            .finish_non_exhaustive()
    }
}

impl FlorenceModel {
    /// Load every ONNX session and the tokenizer
    ///
    /// # Errors
    /// Returns error if:
    /// - A model file or the tokenizer is missing
    /// - The tokenizer cannot be parsed
    /// - ONNX Runtime cannot create a session
    pub fn load(
        name: impl Into<String>,
        files: &FlorenceFiles,
        options: SessionOptions,
        generation: GenerationConfig,
        resize_mode: ResizeMode,
    ) -> Result<Self> {
        let name = name.into();
        let start = Instant::now();
        info!("Loading Florence-2 model '{}'", name);

        if !files.tokenizer.exists() {
            anyhow::bail!("Florence tokenizer not found: {}", files.tokenizer.display());
        }
        let tokenizer = Tokenizer::from_file(&files.tokenizer)
            .map_err(|e| anyhow::anyhow!("Failed to load tokenizer: {}", e))?;
        debug!("Loaded tokenizer with {} tokens", tokenizer.get_vocab_size(true));

        let special = SpecialTokens::from_tokenizer(&tokenizer);
        debug!(
            "Special tokens - BOS: {}, EOS: {}, decoder start: {}",
            special.bos, special.eos, special.decoder_start
        );

        let (embedder, _) = TokenEmbedder::new(&files.embed_tokens, options)?;
        let encoder = FlorenceEncoder::new(
            &files.vision_encoder,
            &files.text_encoder,
            embedder.clone(),
            options,
        )?;
        let decoder = FlorenceDecoder::new(&files.decoder, embedder, options)?;

        // The decoder dominates inference time, so it decides the reported device
        let device = decoder.device();
        if encoder.device() != device {
            warn!(
                "Florence encoders run on {} while the decoder runs on {}",
                encoder.device(),
                device
            );
        }

        info!(
            "Model and processor loaded successfully in {:.1}s",
            start.elapsed().as_secs_f32()
        );

        Ok(Self {
            name,
            encoder,
            decoder,
            tokenizer: Arc::new(tokenizer),
            special,
            generation,
            resize_mode,
            device,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn device(&self) -> Device {
        self.device
    }

    pub fn generation_config(&self) -> &GenerationConfig {
        &self.generation
    }

    /// Answer `question` about the document in `image`
    ///
    /// Blocking; call from a blocking-capable thread.
    pub fn answer(&self, image: &DynamicImage, question: &str) -> Result<String> {
        let start = Instant::now();
        let prompt = build_prompt(question);

        debug!("Preprocessing inputs for the model...");
        let (width, height) = image.dimensions();
        let pixel_values = preprocess_for_florence(image, self.resize_mode);
        debug!("Preprocessed {}x{} image to {:?}", width, height, pixel_values.shape());

        let image_features = self
            .encoder
            .encode_image(&pixel_values)
            .context("Failed to encode image")?;

        let encoding = self
            .tokenizer
            .encode(prompt.as_str(), true)
            .map_err(|e| anyhow::anyhow!("Tokenization failed: {}", e))?;
        let prompt_ids = encoding.get_ids();
        debug!("Prompt tokenized to {} ids", prompt_ids.len());

        let encoder_output = self
            .encoder
            .encode(&image_features, prompt_ids)
            .context("Failed to encode prompt")?;

        debug!("Generating output from the model...");
        let hypothesis = beam_search(
            &self.generation,
            &self.special.decoder_prefix(),
            self.special.eos,
            |beams| self.decoder.next_token_logits(&encoder_output, beams),
        )
        .context("Generation failed")?;
        debug!(
            "Generation complete: {} tokens, score {:.4}",
            hypothesis.tokens.len(),
            hypothesis.score
        );

        debug!("Decoding generated IDs...");
        let generated_text = self
            .tokenizer
            .decode(&hypothesis.tokens, false)
            .map_err(|e| anyhow::anyhow!("Decoding failed: {}", e))?;

        debug!("Post-processing the generated text...");
        let answer = answer_or_fallback(&generated_text);

        info!(
            "Inference successful. Answer found: '{}...'",
            answer.chars().take(50).collect::<String>()
        );
        debug!("Inference took {}ms", start.elapsed().as_millis());

        Ok(answer)
    }
}
