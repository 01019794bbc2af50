//! HTTP-facing errors.

use std::time::Duration;

use actors::{ActorError, AdmissionError};
use axum::extract::multipart::MultipartError;
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use stem_core::FailureKind;

/// Everything `/separate` and `/queue` can answer with besides success.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("Missing multipart field 'file'")]
    MissingFile,

    #[error("Malformed upload: {0}")]
    Multipart(#[from] MultipartError),

    #[error("Failed to store upload: {0}")]
    Storage(#[from] std::io::Error),

    #[error("Too many requests")]
    Rejected(AdmissionError),

    #[error("Job failed: {0}")]
    Job(FailureKind),

    #[error(transparent)]
    Queue(#[from] ActorError),

    #[error("Job was dropped before it finished")]
    Dropped,
}

impl ServerError {
    pub fn status(&self) -> StatusCode {
        match self {
            ServerError::MissingFile => StatusCode::BAD_REQUEST,
            ServerError::Multipart(e) => e.status(),
            ServerError::Rejected(_) => StatusCode::TOO_MANY_REQUESTS,
            ServerError::Job(kind) => match kind {
                FailureKind::Unauthorized => StatusCode::UNAUTHORIZED,
                FailureKind::CapacityExceeded | FailureKind::Cooldown => {
                    StatusCode::TOO_MANY_REQUESTS
                }
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
            ServerError::Storage(_) | ServerError::Queue(_) | ServerError::Dropped => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            ServerError::Rejected(AdmissionError::Cooldown { retry_after }) => Some(*retry_after),
            _ => None,
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!("{}", self);
        }

        let body = match &self {
            ServerError::Job(FailureKind::Unauthorized) => "Unauthorized".to_string(),
            ServerError::Job(_) | ServerError::Dropped => "Internal server error".to_string(),
            other => other.to_string(),
        };

        let mut response = (status, body).into_response();
        if let Some(wait) = self.retry_after() {
            // Whole seconds, never zero.
            let secs = wait.as_secs() + u64::from(wait.subsec_nanos() > 0);
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(secs.max(1)));
        }
        response
    }
}
