//! HTTP handlers.

use std::path::{Path, PathBuf};

use actors::{ArchiveDelivery, JobResponse};
use axum::Json;
use axum::body::Body;
use axum::extract::{Multipart, Query, State};
use axum::http::{StatusCode, header};
use axum::response::{Html, IntoResponse, Response};
use serde::Deserialize;
use stem_core::{Job, QueueStatus, Upload};
use tokio::io::AsyncWriteExt;
use tokio_util::io::ReaderStream;

use crate::AppState;
use crate::error::ServerError;
use crate::stream::TicketedStream;

/// Multipart field carrying the audio file.
pub const FILE_FIELD: &str = "file";

#[derive(Debug, Default, Deserialize)]
pub struct SeparateQuery {
    pub password: Option<String>,
}

/// `POST /separate`: store the upload, queue it and answer with the archive.
pub async fn separate(
    State(state): State<AppState>,
    Query(query): Query<SeparateQuery>,
    mut multipart: Multipart,
) -> Result<Response, ServerError> {
    let upload = receive_upload(&state, &mut multipart, query.password).await?;
    let source_path = upload.source_path.clone();
    tracing::debug!("Stored upload {} at {:?}", upload.original_name, source_path);

    let rx = match state.queue.submit(upload) {
        Ok(rx) => rx,
        Err(e) => {
            discard(&source_path).await;
            return Err(e.into());
        }
    };

    // From here the queue owns the stored file, refused or not.
    match rx.await.map_err(|_| ServerError::Dropped)? {
        JobResponse::Archive(delivery) => Ok(archive_response(delivery)),
        JobResponse::Rejected(reason) => Err(ServerError::Rejected(reason)),
        JobResponse::Failed(kind) => Err(ServerError::Job(kind)),
    }
}

/// `GET /queue`
pub async fn queue_status(State(state): State<AppState>) -> Result<Json<QueueStatus>, ServerError> {
    Ok(Json(state.queue.status().await?))
}

/// `GET /queue/jobs`
pub async fn queue_jobs(State(state): State<AppState>) -> Result<Json<Vec<Job>>, ServerError> {
    Ok(Json(state.queue.jobs().await?))
}

/// `GET /`
pub async fn index(State(state): State<AppState>) -> Result<Html<String>, ServerError> {
    let status = state.queue.status().await?;
    Ok(Html(render_index(status)))
}

async fn receive_upload(
    state: &AppState,
    multipart: &mut Multipart,
    credential: Option<String>,
) -> Result<Upload, ServerError> {
    while let Some(mut field) = multipart.next_field().await? {
        if field.name() != Some(FILE_FIELD) {
            continue;
        }

        let upload = Upload::new(
            &state.input_dir,
            field.file_name().unwrap_or_default(),
            credential,
        );
        let guard = PartialUpload::new(upload.source_path.clone());
        let mut file = tokio::fs::File::create(&upload.source_path).await?;
        while let Some(chunk) = field.chunk().await? {
            file.write_all(&chunk).await?;
        }
        file.flush().await?;

        guard.keep();
        return Ok(upload);
    }

    Err(ServerError::MissingFile)
}

/// Removes a half-written upload unless kept.
///
/// Covers both an error while streaming the field and the handler being
/// dropped when the client disconnects mid-upload.
struct PartialUpload {
    path: Option<PathBuf>,
}

impl PartialUpload {
    fn new(path: PathBuf) -> Self {
        Self { path: Some(path) }
    }

    fn keep(mut self) {
        self.path = None;
    }
}

impl Drop for PartialUpload {
    fn drop(&mut self) {
        if let Some(path) = self.path.take()
            && let Err(e) = std::fs::remove_file(&path)
            && e.kind() != std::io::ErrorKind::NotFound
        {
            tracing::warn!("Failed to remove partial upload {:?}: {}", path, e);
        }
    }
}

fn archive_response(delivery: ArchiveDelivery) -> Response {
    let ArchiveDelivery {
        file,
        len,
        file_name,
        ticket,
    } = delivery;

    let body = Body::from_stream(TicketedStream::new(ReaderStream::new(file), len, ticket));
    let headers = [
        (header::CONTENT_TYPE, "application/zip".to_string()),
        (header::CONTENT_LENGTH, len.to_string()),
        (
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{}\"", file_name),
        ),
    ];
    (StatusCode::OK, headers, body).into_response()
}

async fn discard(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await
        && e.kind() != std::io::ErrorKind::NotFound
    {
        tracing::warn!("Failed to remove {:?}: {}", path, e);
    }
}

fn render_index(status: QueueStatus) -> String {
    format!(
        r#"<!doctype html>
<html>
  <head>
    <title>Demucs3</title>
    <link rel="stylesheet" href="https://bootswatch.com/5/darkly/bootstrap.min.css">
  </head>
  <body>
    <div class="container">
      <h1>Demucs3</h1>
      <p>Separate audio files into vocals, drums, bass, and other.</p>
      <div class="card">
        <div class="card-body">
          <form action="/separate" method="post" enctype="multipart/form-data">
            <div class="mb-3">
              <label for="file" class="form-label">Select audio file</label>
              <input class="form-control" type="file" id="file" name="{field}">
            </div>
            <button type="submit" id="submit" class="btn btn-primary">Separate</button>
          </form>
        </div>
        <div class="card-footer">
          <p id="length">Queue length: {length}</p>
          <p id="limit">Queue limit: {limit}</p>
        </div>
      </div>
    </div>
    <script>
      setInterval(() => {{
        fetch('/queue')
          .then(res => res.json())
          .then(data => {{
            document.getElementById('length').textContent = 'Queue length: ' + data.length;
            document.getElementById('limit').textContent = 'Queue limit: ' + data.limit;
          }});
      }}, 1000);
    </script>
  </body>
</html>
"#,
        field = FILE_FIELD,
        length = status.length,
        limit = status.limit,
    )
}
