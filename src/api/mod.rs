// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
pub mod errors;
pub mod handlers;
pub mod http_server;
pub mod middleware;
pub mod process;

pub use errors::{ApiError, ErrorResponse};
pub use handlers::{health_handler, HealthResponse};
pub use http_server::{create_app, start_server, AppState};
pub use middleware::{PROCESS_TIME_HEADER, REQUEST_ID_HEADER};
pub use process::{process_handler, ProcessResponse};
