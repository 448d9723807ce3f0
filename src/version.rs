// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
// Version information for the Florence-2 DocVQA API

/// Semantic version number
pub const VERSION_NUMBER: &str = env!("CARGO_PKG_VERSION");

/// Service name used in logs
pub const SERVICE_NAME: &str = "Florence-2 DocVQA API";

/// Supported features in this version
pub const FEATURES: &[&str] = &[
    "docvqa",
    "beam-search",
    "cuda-fallback",
    "hub-download",
    "request-correlation-id",
    "json-file-logging",
];

/// Get formatted version string for logging
pub fn get_version_string() -> String {
    format!("{} v{}", SERVICE_NAME, VERSION_NUMBER)
}
