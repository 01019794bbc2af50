//! HTTP front end for the stem separation queue.
//!
//! Routes:
//! - `GET  /` - Upload form with live queue length
//! - `GET  /queue` - Queue occupancy as `{"length", "limit"}`
//! - `GET  /queue/jobs` - Held jobs, head first
//! - `POST /separate` - Multipart upload answered with a zip of the stems

pub mod bootstrap;
pub mod config;
mod error;
mod routes;
mod stream;

use std::path::PathBuf;
use std::sync::Arc;

use actors::QueueHandle;
use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};

pub use config::{Config, ConfigError};
pub use error::ServerError;
pub use routes::FILE_FIELD;

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub queue: QueueHandle,
    pub input_dir: Arc<PathBuf>,
    pub max_upload_bytes: usize,
}

impl AppState {
    pub fn new(queue: QueueHandle, input_dir: impl Into<PathBuf>, max_upload_bytes: usize) -> Self {
        Self {
            queue,
            input_dir: Arc::new(input_dir.into()),
            max_upload_bytes,
        }
    }
}

/// Build the application router.
pub fn build_router(state: AppState) -> Router {
    let upload_limit = DefaultBodyLimit::max(state.max_upload_bytes);

    Router::new()
        .route("/", get(routes::index))
        .route("/queue", get(routes::queue_status))
        .route("/queue/jobs", get(routes::queue_jobs))
        .route("/separate", post(routes::separate).layer(upload_limit))
        .with_state(state)
}
