#![allow(dead_code)]

use std::error::Error;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use actors::probe::ProbeFuture;
use actors::tools::ToolFuture;
use actors::{
    AuthPolicy, DurationProbe, Pipeline, QueueHandle, QueueSettings, ToolError, ToolRunner,
    start_queue,
};
use axum::Router;
use axum::body::Body;
use axum::http::{Request, header};
use server::{AppState, build_router};
use stem_core::{Base36IdGenerator, JobEvent, ToolStage};
use tempfile::TempDir;
use tokio::sync::{Semaphore, broadcast};

pub type TestResult<T = ()> = Result<T, Box<dyn Error + Send + Sync>>;

pub const ARCHIVE_BYTES: &[u8] = b"PK\x03\x04stems";
pub const BOUNDARY: &str = "stem-test-boundary";

/// Tools that write a fixed archive, optionally failing or waiting on a gate.
#[derive(Default)]
pub struct FakeTools {
    pub fail_separation: bool,
    pub gate: Option<Arc<Semaphore>>,
}

impl FakeTools {
    async fn separate(&self, output_dir: &Path) -> Result<(), ToolError> {
        if let Some(gate) = &self.gate
            && let Ok(permit) = gate.acquire().await
        {
            permit.forget();
        }
        if self.fail_separation {
            return Err(ToolError::Failed {
                stage: ToolStage::Separation,
                code: Some(1),
                stderr: "no model".to_string(),
            });
        }
        tokio::fs::create_dir_all(output_dir.join("mdx_extra"))
            .await
            .map_err(|source| ToolError::Wait {
                stage: ToolStage::Separation,
                source,
            })
    }

    async fn archive(&self, archive: &Path) -> Result<(), ToolError> {
        tokio::fs::write(archive, ARCHIVE_BYTES)
            .await
            .map_err(|source| ToolError::Wait {
                stage: ToolStage::Archive,
                source,
            })
    }
}

impl ToolRunner for FakeTools {
    fn run_separation<'a>(&'a self, _input: &'a Path, output_dir: &'a Path) -> ToolFuture<'a> {
        Box::pin(self.separate(output_dir))
    }

    fn run_archive<'a>(&'a self, _output_dir: &'a Path, archive: &'a Path) -> ToolFuture<'a> {
        Box::pin(self.archive(archive))
    }
}

pub struct FakeProbe;

impl DurationProbe for FakeProbe {
    fn probe<'a>(&'a self, _path: &'a Path) -> ProbeFuture<'a> {
        Box::pin(async { Ok(60.0) })
    }
}

pub struct TestApp {
    pub router: Router,
    pub queue: QueueHandle,
    pub input: TempDir,
    pub output: TempDir,
}

pub struct Options {
    pub tools: FakeTools,
    pub auth: AuthPolicy,
    pub limit: usize,
    pub cooldown: Duration,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            tools: FakeTools::default(),
            auth: AuthPolicy::Disabled,
            limit: stem_core::QUEUE_LIMIT,
            cooldown: Duration::ZERO,
        }
    }
}

pub async fn app(options: Options) -> TestResult<TestApp> {
    let input = tempfile::tempdir()?;
    let output = tempfile::tempdir()?;

    let pipeline =
        Pipeline::new(Arc::new(options.tools), Arc::new(FakeProbe)).with_auth(options.auth);
    let settings = QueueSettings::new(output.path())
        .with_limit(options.limit)
        .with_cooldown(options.cooldown);
    let (queue, _join) = start_queue(settings, pipeline, Arc::new(Base36IdGenerator)).await?;

    let router = build_router(AppState::new(queue.clone(), input.path(), 1024 * 1024));
    Ok(TestApp {
        router,
        queue,
        input,
        output,
    })
}

/// A `POST /separate` request carrying `bytes` as the `field` part.
pub fn upload_request(query: &str, field: &str, file_name: &str, bytes: &[u8]) -> TestResult<Request<Body>> {
    let mut body = Vec::new();
    body.extend_from_slice(format!("--{}\r\n", BOUNDARY).as_bytes());
    body.extend_from_slice(
        format!(
            "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\n",
            field, file_name
        )
        .as_bytes(),
    );
    body.extend_from_slice(b"Content-Type: audio/wav\r\n\r\n");
    body.extend_from_slice(bytes);
    body.extend_from_slice(format!("\r\n--{}--\r\n", BOUNDARY).as_bytes());

    Ok(Request::builder()
        .method("POST")
        .uri(format!("/separate{}", query))
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={}", BOUNDARY),
        )
        .body(Body::from(body))?)
}

pub fn get(uri: &str) -> TestResult<Request<Body>> {
    Ok(Request::builder().uri(uri).body(Body::empty())?)
}

/// Wait until the queue holds `length` jobs.
pub async fn wait_for_length(queue: &QueueHandle, length: usize) -> TestResult {
    for _ in 0..200 {
        if queue.status().await?.length == length {
            return Ok(());
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    Err(format!("queue never reached length {}", length).into())
}

/// Wait for the next job to leave the queue.
pub async fn wait_for_finish(events: &mut broadcast::Receiver<JobEvent>) -> TestResult {
    loop {
        let event = tokio::time::timeout(Duration::from_secs(5), events.recv()).await??;
        if matches!(event, JobEvent::JobFinished { .. }) {
            return Ok(());
        }
    }
}

pub fn file_count(dir: &Path) -> TestResult<usize> {
    Ok(std::fs::read_dir(dir)?.count())
}
