// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Tracing setup: console output plus rotating JSON log files
//!
//! Both sinks share one level taken from `LOG_LEVEL`. Events inside the
//! per-request span carry its `request_id` in both outputs. File writes go
//! through a background worker, so request threads never touch the disk;
//! rotated files are gzip-compressed on that worker.

use anyhow::{Context, Result};
use chrono::Local;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tracing::{info, warn};
use tracing_appender::non_blocking::{NonBlockingBuilder, WorkerGuard};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

pub const DEFAULT_MAX_FILE_BYTES: u64 = 10 * 1024 * 1024;
pub const DEFAULT_RETENTION_DAYS: u64 = 10;

const LOG_FILE_PREFIX: &str = "app_";
const LOG_FILE_SUFFIX: &str = ".log";
const COMPRESSED_SUFFIX: &str = ".log.gz";

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggingConfig {
    /// Normalised level name: TRACE, DEBUG, INFO, WARN or ERROR
    pub log_level: String,
    pub log_dir: PathBuf,
    /// Size after which the file sink moves to a new file
    pub max_file_bytes: u64,
    /// Log files older than this are removed at startup
    pub retention_days: u64,
}

impl LoggingConfig {
    pub fn new(level: &str, log_dir: impl Into<PathBuf>) -> Self {
        Self {
            log_level: normalize_level(level).to_string(),
            log_dir: log_dir.into(),
            max_file_bytes: DEFAULT_MAX_FILE_BYTES,
            retention_days: DEFAULT_RETENTION_DAYS,
        }
    }

    pub fn env_filter(&self) -> EnvFilter {
        // ONNX Runtime is very chatty below warn
        EnvFilter::new(format!("{},ort=warn", self.log_level.to_lowercase()))
    }

    fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_days * 24 * 60 * 60)
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self::new("INFO", "logs")
    }
}

/// Keeps the file worker alive; drop it to flush pending records
pub struct LoggingGuard {
    log_file: PathBuf,
    _worker: WorkerGuard,
}

impl LoggingGuard {
    /// First file written by this process
    pub fn log_file(&self) -> &Path {
        &self.log_file
    }
}

/// Map a user-supplied level name onto a tracing level, defaulting to INFO
pub fn normalize_level(level: &str) -> &'static str {
    match level.trim().to_uppercase().as_str() {
        "TRACE" => "TRACE",
        "DEBUG" => "DEBUG",
        "INFO" => "INFO",
        "WARN" | "WARNING" => "WARN",
        "ERROR" | "CRITICAL" | "FATAL" => "ERROR",
        _ => "INFO",
    }
}

/// Install the global subscriber
///
/// The returned guard must live until shutdown.
pub fn setup_logging(config: &LoggingConfig) -> Result<LoggingGuard> {
    fs::create_dir_all(&config.log_dir)
        .with_context(|| format!("Failed to create log directory {}", config.log_dir.display()))?;

    let pruned = prune_old_logs(&config.log_dir, config.retention(), SystemTime::now())
        .context("Failed to prune old log files")?;

    let writer = RotatingFileWriter::new(&config.log_dir, config.max_file_bytes)?;
    let log_file = writer.current_path().to_path_buf();
    // Block instead of dropping records when the queue is full
    let (file_writer, worker) = NonBlockingBuilder::default()
        .lossy(false)
        .thread_name("log-writer")
        .finish(writer);

    let console_layer = tracing_subscriber::fmt::layer().with_target(false);
    let file_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_current_span(true)
        .with_span_list(false)
        .with_file(true)
        .with_line_number(true)
        .with_ansi(false)
        .with_writer(file_writer);

    tracing_subscriber::registry()
        .with(config.env_filter())
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .context("Failed to install tracing subscriber")?;

    if pruned > 0 {
        info!("Removed {} log files older than {} days", pruned, config.retention_days);
    }
    info!("Logger configured successfully.");

    Ok(LoggingGuard {
        log_file,
        _worker: worker,
    })
}

fn new_log_path(dir: &Path) -> PathBuf {
    let stamp = Local::now().format("%Y-%m-%d_%H-%M-%S_%6f");
    dir.join(format!("{}{}{}", LOG_FILE_PREFIX, stamp, LOG_FILE_SUFFIX))
}

/// `app_*.log` or a compressed `app_*.log.gz`
fn is_log_file(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(|n| {
            n.starts_with(LOG_FILE_PREFIX)
                && (n.ends_with(LOG_FILE_SUFFIX) || n.ends_with(COMPRESSED_SUFFIX))
        })
        .unwrap_or(false)
}

/// Delete log files last modified more than `max_age` before `now`
pub fn prune_old_logs(dir: &Path, max_age: Duration, now: SystemTime) -> io::Result<usize> {
    let mut removed = 0;

    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if !path.is_file() || !is_log_file(&path) {
            continue;
        }

        let modified = fs::metadata(&path)?.modified()?;
        let age = now.duration_since(modified).unwrap_or_default();
        if age > max_age {
            match fs::remove_file(&path) {
                Ok(()) => removed += 1,
                Err(e) => warn!("Failed to remove old log file {}: {}", path.display(), e),
            }
        }
    }

    Ok(removed)
}

/// Gzip `path` into `<path>.gz` and remove the original
pub fn compress_log_file(path: &Path) -> io::Result<PathBuf> {
    let mut target = path.as_os_str().to_owned();
    target.push(".gz");
    let target = PathBuf::from(target);

    let mut input = BufReader::new(File::open(path)?);
    let mut encoder = GzEncoder::new(File::create(&target)?, Compression::default());
    io::copy(&mut input, &mut encoder)?;
    encoder.finish()?.sync_all()?;

    fs::remove_file(path)?;
    Ok(target)
}

/// Size-rotating file sink for the JSON layer
///
/// Owned by the non-blocking worker thread. A full file is closed,
/// compressed and replaced by a freshly stamped one.
pub struct RotatingFileWriter {
    dir: PathBuf,
    path: PathBuf,
    file: File,
    written: u64,
    max_bytes: u64,
}

impl RotatingFileWriter {
    pub fn new(dir: &Path, max_bytes: u64) -> Result<Self> {
        let path = new_log_path(dir);
        let file = open_log(&path)
            .with_context(|| format!("Failed to open log file {}", path.display()))?;

        Ok(Self {
            dir: dir.to_path_buf(),
            path,
            file,
            written: 0,
            max_bytes,
        })
    }

    /// File currently being written
    pub fn current_path(&self) -> &Path {
        &self.path
    }

    fn rotate(&mut self) -> io::Result<()> {
        self.file.flush()?;
        let path = new_log_path(&self.dir);
        let previous = std::mem::replace(&mut self.path, path);
        self.file = open_log(&self.path)?;
        self.written = 0;

        // The new file is already in place; a failed compression keeps the plain log
        if let Err(e) = compress_log_file(&previous) {
            eprintln!("Failed to compress log file {}: {}", previous.display(), e);
        }
        Ok(())
    }
}

fn open_log(path: &Path) -> io::Result<File> {
    OpenOptions::new().create(true).append(true).open(path)
}

impl Write for RotatingFileWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.written > 0 && self.written + buf.len() as u64 > self.max_bytes {
            self.rotate()?;
        }

        let n = self.file.write(buf)?;
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}
