// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Document question answering endpoint
//!
//! Provides POST /api/process for multipart image + question uploads.

pub mod handler;
pub mod request;
pub mod response;

pub use handler::process_handler;
pub use request::ProcessForm;
pub use response::ProcessResponse;
