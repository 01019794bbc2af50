#![allow(dead_code)]

use std::error::Error;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use actors::probe::ProbeFuture;
use actors::tools::ToolFuture;
use actors::{
    AuthPolicy, DurationProbe, JobResponse, Pipeline, ProbeError, QueueHandle, QueueSettings,
    ToolError, ToolRunner, start_queue,
};
use stem_core::{Base36IdGenerator, JobEvent, JobId, JobState, ToolStage, Upload};
use tempfile::TempDir;
use tokio::io::AsyncReadExt;
use tokio::sync::{Semaphore, broadcast, oneshot};

pub type TestResult<T = ()> = Result<T, Box<dyn Error + Send + Sync>>;

pub const ARCHIVE_BYTES: &[u8] = b"PK\x03\x04fake-archive";

/// Tool runner that writes placeholder stems and archives.
#[derive(Default)]
pub struct FakeTools {
    active: AtomicUsize,
    max_active: AtomicUsize,
    calls: Mutex<Vec<String>>,
    fail_separation_for: Option<String>,
    fail_archive_for: Option<String>,
    panic_for: Option<String>,
    delay: Duration,
    gate: Option<Arc<Semaphore>>,
}

impl FakeTools {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail separation for inputs whose name contains `needle`.
    pub fn failing_for(mut self, needle: &str) -> Self {
        self.fail_separation_for = Some(needle.to_string());
        self
    }

    /// Fail archiving for jobs whose output directory contains `needle`.
    pub fn failing_archive_for(mut self, needle: &str) -> Self {
        self.fail_archive_for = Some(needle.to_string());
        self
    }

    /// Panic inside separation for inputs whose name contains `needle`.
    pub fn panicking_for(mut self, needle: &str) -> Self {
        self.panic_for = Some(needle.to_string());
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Block every separation until the gate hands out a permit.
    pub fn gated(mut self, gate: Arc<Semaphore>) -> Self {
        self.gate = Some(gate);
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    pub fn separated(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| c.strip_prefix("separate:").map(str::to_string))
            .collect()
    }

    pub fn max_active(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }

    fn record(&self, call: String) {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(call);
        }
    }

    async fn separate(&self, input: &Path, output_dir: &Path) -> Result<(), ToolError> {
        let name = input
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        self.record(format!("separate:{}", original_name(&name)));
        if let Some(needle) = &self.panic_for
            && name.contains(needle.as_str())
        {
            panic!("separator blew up on {}", name);
        }

        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now, Ordering::SeqCst);

        if let Some(gate) = &self.gate
            && let Ok(permit) = gate.acquire().await
        {
            permit.forget();
        }
        tokio::time::sleep(self.delay).await;

        let result = match &self.fail_separation_for {
            Some(needle) if name.contains(needle.as_str()) => Err(ToolError::Failed {
                stage: ToolStage::Separation,
                code: Some(1),
                stderr: "model crashed".to_string(),
            }),
            _ => {
                let stems = output_dir.join("mdx_extra").join("song");
                write_file(ToolStage::Separation, &stems.join("vocals.wav"), b"vocals").await
            }
        };

        self.active.fetch_sub(1, Ordering::SeqCst);
        result
    }

    async fn archive(&self, output_dir: &Path, archive: &Path) -> Result<(), ToolError> {
        let dir = output_dir
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        self.record(format!("archive:{}", dir));

        match &self.fail_archive_for {
            Some(needle) if dir.contains(needle.as_str()) => Err(ToolError::Failed {
                stage: ToolStage::Archive,
                code: Some(2),
                stderr: "disk full".to_string(),
            }),
            _ => write_file(ToolStage::Archive, archive, ARCHIVE_BYTES).await,
        }
    }
}

impl ToolRunner for FakeTools {
    fn run_separation<'a>(&'a self, input: &'a Path, output_dir: &'a Path) -> ToolFuture<'a> {
        Box::pin(self.separate(input, output_dir))
    }

    fn run_archive<'a>(&'a self, output_dir: &'a Path, archive: &'a Path) -> ToolFuture<'a> {
        Box::pin(self.archive(output_dir, archive))
    }
}

async fn write_file(stage: ToolStage, path: &Path, bytes: &[u8]) -> Result<(), ToolError> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|source| ToolError::Wait { stage, source })?;
    }
    tokio::fs::write(path, bytes)
        .await
        .map_err(|source| ToolError::Wait { stage, source })
}

/// Strip the `{jobId}_` prefix from a stored upload name.
fn original_name(stored: &str) -> String {
    stored
        .split_once('_')
        .map(|(_, rest)| rest.to_string())
        .unwrap_or_else(|| stored.to_string())
}

/// Probe that reports a fixed one-minute duration.
pub struct FakeProbe;

impl DurationProbe for FakeProbe {
    fn probe<'a>(&'a self, _path: &'a Path) -> ProbeFuture<'a> {
        Box::pin(async { Ok(60.0) })
    }
}

/// Probe that can never read a duration.
pub struct FailingProbe;

impl DurationProbe for FailingProbe {
    fn probe<'a>(&'a self, _path: &'a Path) -> ProbeFuture<'a> {
        Box::pin(async { Err(ProbeError::Parse("N/A".to_string())) })
    }
}

pub struct Harness {
    pub queue: QueueHandle,
    pub tools: Arc<FakeTools>,
    pub events: broadcast::Receiver<JobEvent>,
    pub join: tokio::task::JoinHandle<()>,
    pub input: TempDir,
    pub output: TempDir,
}

/// Start a queue without cooldown so tests can submit back to back.
pub async fn start(tools: FakeTools, auth: AuthPolicy) -> TestResult<Harness> {
    start_with(tools, auth, Duration::ZERO).await
}

pub async fn start_with(
    tools: FakeTools,
    auth: AuthPolicy,
    cooldown: Duration,
) -> TestResult<Harness> {
    launch(tools, Arc::new(FakeProbe), auth, cooldown).await
}

/// Start a queue whose duration probe always fails.
pub async fn start_without_duration(tools: FakeTools) -> TestResult<Harness> {
    launch(tools, Arc::new(FailingProbe), AuthPolicy::Disabled, Duration::ZERO).await
}

async fn launch(
    tools: FakeTools,
    probe: Arc<dyn DurationProbe>,
    auth: AuthPolicy,
    cooldown: Duration,
) -> TestResult<Harness> {
    let input = tempfile::tempdir()?;
    let output = tempfile::tempdir()?;
    let tools = Arc::new(tools);

    let pipeline = Pipeline::new(tools.clone(), probe).with_auth(auth);
    let settings = QueueSettings::new(output.path()).with_cooldown(cooldown);
    let (queue, join) = start_queue(settings, pipeline, Arc::new(Base36IdGenerator)).await?;
    let events = queue.subscribe();

    Ok(Harness {
        queue,
        tools,
        events,
        join,
        input,
        output,
    })
}

impl Harness {
    /// Store an upload in the input directory.
    pub async fn upload(&self, name: &str, credential: Option<&str>) -> TestResult<Upload> {
        let upload = Upload::new(self.input.path(), name, credential.map(str::to_string));
        tokio::fs::write(&upload.source_path, b"RIFF....WAVE").await?;
        Ok(upload)
    }

    /// Upload and submit in one go.
    pub async fn submit(
        &self,
        name: &str,
        credential: Option<&str>,
    ) -> TestResult<(JobId, oneshot::Receiver<JobResponse>)> {
        let upload = self.upload(name, credential).await?;
        let id = upload.id;
        let rx = self.queue.submit(upload)?;
        Ok((id, rx))
    }

    /// Wait for a job to end, returning the states it passed through.
    pub async fn finished(&mut self, job_id: JobId) -> TestResult<Vec<JobState>> {
        let mut states = Vec::new();
        loop {
            let event = tokio::time::timeout(Duration::from_secs(5), self.events.recv()).await??;
            match event {
                JobEvent::JobStateChanged { job_id: id, state, .. } if id == job_id => {
                    states.push(state);
                }
                JobEvent::JobFinished { job_id: id, .. } if id == job_id => return Ok(states),
                _ => {}
            }
        }
    }

    /// Wait for a job to end, returning the state the queue retired it with.
    pub async fn outcome(&mut self, job_id: JobId) -> TestResult<JobState> {
        loop {
            let event = tokio::time::timeout(Duration::from_secs(5), self.events.recv()).await??;
            if let JobEvent::JobFinished { job_id: id, state, .. } = event
                && id == job_id
            {
                return Ok(state);
            }
        }
    }

    /// Wait until a job has entered `state`.
    pub async fn reached(&mut self, job_id: JobId, state: JobState) -> TestResult {
        loop {
            let event = tokio::time::timeout(Duration::from_secs(5), self.events.recv()).await??;
            if let JobEvent::JobStateChanged { job_id: id, state: seen, .. } = event
                && id == job_id
                && seen == state
            {
                return Ok(());
            }
        }
    }
}

pub fn dir_is_empty(dir: &Path) -> TestResult<bool> {
    Ok(std::fs::read_dir(dir)?.next().is_none())
}

/// Await a response with a timeout.
pub async fn response(rx: oneshot::Receiver<JobResponse>) -> TestResult<JobResponse> {
    Ok(tokio::time::timeout(Duration::from_secs(5), rx).await??)
}

/// Read a delivered archive to the end and confirm delivery.
pub async fn download(response: JobResponse) -> TestResult<(String, Vec<u8>)> {
    let mut delivery = match response {
        JobResponse::Archive(delivery) => delivery,
        other => return Err(format!("expected an archive, got {:?}", other).into()),
    };
    let mut bytes = Vec::new();
    delivery.file.read_to_end(&mut bytes).await?;
    assert_eq!(bytes.len() as u64, delivery.len);
    delivery.ticket.complete();
    Ok((delivery.file_name, bytes))
}
