// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Process configuration from command-line flags and environment variables

use clap::Parser;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;

use crate::logging::LoggingConfig;
use crate::vision::florence::generation::{
    DEFAULT_MAX_NEW_TOKENS, DEFAULT_NO_REPEAT_NGRAM_SIZE, DEFAULT_NUM_BEAMS,
};
use crate::vision::florence::{DevicePreference, GenerationConfig, ResizeMode};
use crate::vision::VisionModelConfig;

/// Default upload limit for `POST /api/process`
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;

/// Florence-2 DocVQA API server
#[derive(Parser, Debug, Clone)]
#[command(name = "florence-docvqa-api")]
#[command(version)]
#[command(about = "HTTP API answering questions about document images with Florence-2", long_about = None)]
pub struct ServerConfig {
    /// Address to bind
    #[arg(long, env = "HOST", default_value = "127.0.0.1")]
    pub host: IpAddr,

    #[arg(long, env = "PORT", default_value_t = 8000)]
    pub port: u16,

    /// Directory with an ONNX export of the model (checked before the hub)
    #[arg(long, env = "MODEL_DIR", default_value = "./models/florence-2-docvqa-onnx")]
    pub model_dir: PathBuf,

    /// HuggingFace repository to download from when MODEL_DIR is incomplete
    ///
    /// The default is the general Florence-2 fine-tune. The DocVQA fine-tune
    /// (Geetansh13/Florence-2-FT-DocVQA) ships PyTorch weights only; export it
    /// to ONNX and point MODEL_DIR at the result.
    #[arg(long, env = "MODEL_REPO", default_value = "onnx-community/Florence-2-base-ft")]
    pub model_repo: String,

    #[arg(long, env = "MODEL_REVISION", default_value = "main")]
    pub model_revision: String,

    /// Do not download; use MODEL_DIR or the local hub cache only
    ///
    /// Accepts the hub's own spellings (1/0, yes/no, true/false, on/off).
    #[arg(long, env = "HF_HUB_OFFLINE", value_parser = clap::builder::BoolishValueParser::new())]
    pub offline: bool,

    /// Execution device: auto, cpu or cuda
    #[arg(long, env = "DEVICE", default_value = "auto")]
    pub device: DevicePreference,

    /// Image resize strategy: stretch, center-crop or letterbox
    #[arg(long, env = "RESIZE_MODE", default_value = "stretch")]
    pub resize_mode: ResizeMode,

    #[arg(long, env = "NUM_BEAMS", default_value_t = DEFAULT_NUM_BEAMS)]
    pub num_beams: usize,

    #[arg(long, env = "MAX_NEW_TOKENS", default_value_t = DEFAULT_MAX_NEW_TOKENS)]
    pub max_new_tokens: usize,

    /// 0 disables the repeated n-gram ban
    #[arg(long, env = "NO_REPEAT_NGRAM_SIZE", default_value_t = DEFAULT_NO_REPEAT_NGRAM_SIZE)]
    pub no_repeat_ngram_size: usize,

    /// ONNX Runtime intra-op threads per session
    #[arg(long, env = "ORT_INTRA_THREADS", default_value_t = 4)]
    pub intra_threads: usize,

    /// Largest accepted request body in bytes
    #[arg(long, env = "MAX_UPLOAD_BYTES", default_value_t = DEFAULT_MAX_UPLOAD_BYTES)]
    pub max_upload_bytes: usize,

    /// Comma-separated allowed origins; empty allows any origin
    #[arg(long, env = "CORS_ALLOW_ORIGINS", value_delimiter = ',')]
    pub cors_origins: Vec<String>,

    /// DEBUG, INFO, WARNING, ERROR or CRITICAL
    #[arg(long, env = "LOG_LEVEL", default_value = "INFO")]
    pub log_level: String,

    #[arg(long, env = "LOG_DIR", default_value = "logs")]
    pub log_dir: PathBuf,
}

impl ServerConfig {
    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.port == 0 {
            return Err("PORT must be greater than 0".to_string());
        }
        if self.num_beams == 0 {
            return Err("NUM_BEAMS must be at least 1".to_string());
        }
        if self.max_new_tokens == 0 {
            return Err("MAX_NEW_TOKENS must be at least 1".to_string());
        }
        if self.max_upload_bytes == 0 {
            return Err("MAX_UPLOAD_BYTES must be greater than 0".to_string());
        }
        if self.intra_threads == 0 {
            return Err("ORT_INTRA_THREADS must be at least 1".to_string());
        }
        Ok(())
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }

    /// Allowed CORS origins with blanks removed
    pub fn cors_origins(&self) -> Vec<String> {
        self.cors_origins
            .iter()
            .map(|o| o.trim().to_string())
            .filter(|o| !o.is_empty())
            .collect()
    }

    pub fn generation_config(&self) -> GenerationConfig {
        GenerationConfig {
            num_beams: self.num_beams,
            max_new_tokens: self.max_new_tokens,
            no_repeat_ngram_size: self.no_repeat_ngram_size,
            ..Default::default()
        }
    }

    pub fn logging_config(&self) -> LoggingConfig {
        LoggingConfig::new(&self.log_level, self.log_dir.clone())
    }

    pub fn vision_model_config(&self) -> VisionModelConfig {
        VisionModelConfig {
            model_dir: self.model_dir.clone(),
            model_repo: self.model_repo.clone(),
            revision: self.model_revision.clone(),
            offline: self.offline,
            device: self.device,
            intra_threads: self.intra_threads,
            generation: self.generation_config(),
            resize_mode: self.resize_mode,
        }
    }
}
