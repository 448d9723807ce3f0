// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Vision model manager for locating, downloading and loading Florence-2

use anyhow::{Context, Result};
use hf_hub::api::tokio::ApiBuilder;
use hf_hub::{Cache, Repo, RepoType};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

use crate::vision::florence::model::{ONNX_FILES, TOKENIZER_FILE};
use crate::vision::florence::{
    Device, DevicePreference, FlorenceFiles, FlorenceModel, GenerationConfig, ResizeMode, SessionOptions,
};

/// Subdirectory holding the ONNX graphs in hub exports
const HUB_ONNX_DIR: &str = "onnx";

/// Configuration for loading the Florence-2 model
#[derive(Debug, Clone)]
pub struct VisionModelConfig {
    /// Local directory checked before the hub
    pub model_dir: PathBuf,
    /// HuggingFace repository with an ONNX export
    pub model_repo: String,
    pub revision: String,
    /// Never touch the network; only the local directory and hub cache
    pub offline: bool,
    pub device: DevicePreference,
    pub intra_threads: usize,
    pub generation: GenerationConfig,
    pub resize_mode: ResizeMode,
}

impl Default for VisionModelConfig {
    fn default() -> Self {
        Self {
            model_dir: PathBuf::from("./models/florence-2-docvqa-onnx"),
            model_repo: "onnx-community/Florence-2-base-ft".to_string(),
            revision: "main".to_string(),
            offline: false,
            device: DevicePreference::Auto,
            intra_threads: 4,
            generation: GenerationConfig::default(),
            resize_mode: ResizeMode::default(),
        }
    }
}

impl VisionModelConfig {
    pub fn session_options(&self) -> SessionOptions {
        SessionOptions {
            device: self.device,
            intra_threads: self.intra_threads,
        }
    }

    fn hub_repo(&self) -> Repo {
        Repo::with_revision(self.model_repo.clone(), RepoType::Model, self.revision.clone())
    }
}

/// Hub path of every required file, in `FlorenceFiles` field order
fn hub_file_names() -> Vec<String> {
    ONNX_FILES
        .iter()
        .map(|f| format!("{}/{}", HUB_ONNX_DIR, f))
        .chain(std::iter::once(TOKENIZER_FILE.to_string()))
        .collect()
}

/// Assemble [`FlorenceFiles`] from resolved paths in `hub_file_names` order
fn files_from_paths(paths: Vec<PathBuf>) -> Result<FlorenceFiles> {
    match <[PathBuf; 5]>::try_from(paths) {
        Ok([vision_encoder, embed_tokens, text_encoder, decoder, tokenizer]) => Ok(FlorenceFiles {
            vision_encoder,
            embed_tokens,
            text_encoder,
            decoder,
            tokenizer,
        }),
        Err(paths) => anyhow::bail!("Expected 5 model files, resolved {}", paths.len()),
    }
}

/// Find the model files locally or in the hub cache, downloading if allowed
pub async fn resolve_files(config: &VisionModelConfig) -> Result<FlorenceFiles> {
    if let Some(files) = FlorenceFiles::in_dir(&config.model_dir) {
        info!("Using Florence-2 model files from {}", config.model_dir.display());
        return Ok(files);
    }

    if config.offline {
        return resolve_from_cache(config).with_context(|| {
            format!(
                "Florence-2 model not found in {} or the hub cache, and offline mode is on",
                config.model_dir.display()
            )
        });
    }

    info!(
        "Model files not found in {}, fetching {}@{} from the hub",
        config.model_dir.display(),
        config.model_repo,
        config.revision
    );
    download_files(config).await
}

fn resolve_from_cache(config: &VisionModelConfig) -> Result<FlorenceFiles> {
    let cache = Cache::default().repo(config.hub_repo());

    let paths = hub_file_names()
        .into_iter()
        .map(|name| {
            cache
                .get(&name)
                .ok_or_else(|| anyhow::anyhow!("{} missing from hub cache", name))
        })
        .collect::<Result<Vec<_>>>()?;

    info!("Using cached Florence-2 model {}", config.model_repo);
    files_from_paths(paths)
}

async fn download_files(config: &VisionModelConfig) -> Result<FlorenceFiles> {
    let api = ApiBuilder::new()
        .with_progress(false)
        .build()
        .context("Failed to create HuggingFace hub client")?;
    let repo = api.repo(config.hub_repo());

    let mut paths = Vec::new();
    for name in hub_file_names() {
        let path = repo
            .get(&name)
            .await
            .with_context(|| format!("Failed to download {} from {}", name, config.model_repo))?;
        info!("Resolved {} -> {}", name, path.display());
        paths.push(path);
    }

    files_from_paths(paths)
}

/// Resolve model files and load the Florence-2 pipeline
///
/// Session creation is blocking, so it runs on the blocking pool.
pub async fn load_model(config: &VisionModelConfig) -> Result<Arc<FlorenceModel>> {
    let files = resolve_files(config).await?;

    let name = model_name(config, &files);
    let options = config.session_options();
    let generation = config.generation.clone();
    let resize_mode = config.resize_mode;

    let model = tokio::task::spawn_blocking(move || {
        FlorenceModel::load(name, &files, options, generation, resize_mode)
    })
    .await
    .context("Model loading task panicked")??;

    if options.device == DevicePreference::Cuda && model.device() != Device::Cuda {
        warn!("CUDA was requested but the model runs on {}", model.device());
    }

    Ok(Arc::new(model))
}

/// Repository name, or the local directory when files came from there
fn model_name(config: &VisionModelConfig, files: &FlorenceFiles) -> String {
    if files.tokenizer.starts_with(&config.model_dir) {
        dir_name(&config.model_dir)
    } else {
        config.model_repo.clone()
    }
}

fn dir_name(dir: &Path) -> String {
    dir.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| dir.display().to_string())
}
