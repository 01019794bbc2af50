//! Job domain types for separation requests in the queue.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Suffix appended to every per-job output directory.
pub const OUTPUT_DIR_SUFFIX: &str = "demucs3";

/// File name of the archive written inside a job's output directory.
pub const ARCHIVE_FILE_NAME: &str = "out.zip";

/// Fallback used when the client supplies no usable file name.
const FALLBACK_NAME: &str = "upload";

/// Unique identifier for a job, using ULID for chronological sorting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub Ulid);

impl JobId {
    /// Create a new unique job ID.
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// External tool stage a failure belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolStage {
    Separation,
    Archive,
}

impl std::fmt::Display for ToolStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ToolStage::Separation => write!(f, "separation"),
            ToolStage::Archive => write!(f, "archive"),
        }
    }
}

/// Why a submission was refused or a job ended without delivering its archive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FailureKind {
    /// The caller's credential did not match the configured one.
    #[error("unauthorized")]
    Unauthorized,
    /// The queue was at capacity when the submission arrived.
    #[error("queue is full")]
    CapacityExceeded,
    /// Another submission was accepted moments ago.
    #[error("submission cooldown active")]
    Cooldown,
    /// The separation or archive tool reported failure.
    #[error("{stage} tool failed")]
    ToolInvocation { stage: ToolStage },
    /// The job's output directory could not be prepared.
    #[error("job workspace unavailable")]
    Workspace,
    /// The archive could not be handed to, or streamed to, the caller.
    #[error("archive delivery failed")]
    Delivery,
    /// The processing worker died while the job was in flight.
    #[error("worker lost while processing")]
    WorkerLost,
}

/// Current state of a job in its lifecycle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum JobState {
    /// Waiting in the queue.
    #[default]
    Queued,
    /// Authorized and duration probed.
    DurationProbed,
    /// The separation tool is running.
    Separating,
    /// The archive tool is running.
    Archiving,
    /// The archive is being streamed to the caller.
    Delivering,
    /// Archive delivered.
    Done,
    /// Ended without delivering.
    Failed { error: FailureKind },
}

impl JobState {
    /// Check if the job is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Done | JobState::Failed { .. })
    }

    /// Get a simple state string for display.
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Queued => "queued",
            JobState::DurationProbed => "duration_probed",
            JobState::Separating => "separating",
            JobState::Archiving => "archiving",
            JobState::Delivering => "delivering",
            JobState::Done => "done",
            JobState::Failed { .. } => "failed",
        }
    }
}

/// An uploaded file waiting for admission.
///
/// The upload's id becomes the job id once admitted, and its stored file
/// name is namespaced by that id so concurrent uploads never collide.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Upload {
    pub id: JobId,
    /// Client-supplied name, reduced to its final path component.
    pub original_name: String,
    /// Where the uploaded bytes live on disk.
    pub source_path: PathBuf,
    /// Credential supplied alongside the upload, if any.
    pub credential: Option<String>,
}

impl Upload {
    /// Prepare an upload that will be stored inside `input_dir`.
    pub fn new(input_dir: &Path, client_name: &str, credential: Option<String>) -> Self {
        let id = JobId::new();
        let original_name = sanitize_file_name(client_name);
        let source_path = input_dir.join(format!("{}_{}", id, original_name));
        Self {
            id,
            original_name,
            source_path,
            credential,
        }
    }
}

/// A job represents one accepted separation request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    /// Unique identifier for this job.
    pub id: JobId,
    /// Name of the uploaded file as supplied by the client.
    pub original_name: String,
    /// `original_name` without its extension.
    pub base_name: String,
    /// Extension of `original_name`, without the dot.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extension: Option<String>,
    /// Uploaded input file, removed when the job ends.
    pub source_path: PathBuf,
    /// Directory the separation tool writes into, removed when the job ends.
    pub output_dir: PathBuf,
    /// Archive produced from `output_dir`; lives inside it.
    pub archive_path: PathBuf,
    #[serde(skip)]
    pub credential: Option<String>,
    /// Current state.
    pub state: JobState,
    /// When the job was accepted.
    pub created_at: DateTime<Utc>,
    /// When the job last changed state.
    pub updated_at: DateTime<Utc>,
}

impl Job {
    /// Create a queued job from an admitted upload.
    ///
    /// `run_id` scopes the output directory: `{base}_{run_id}_demucs3`.
    pub fn new(upload: Upload, output_root: &Path, run_id: &str) -> Self {
        let (base_name, extension) = split_name(&upload.original_name);
        let output_dir =
            output_root.join(format!("{}_{}_{}", base_name, run_id, OUTPUT_DIR_SUFFIX));
        let archive_path = output_dir.join(ARCHIVE_FILE_NAME);
        let now = Utc::now();
        Self {
            id: upload.id,
            original_name: upload.original_name,
            base_name,
            extension,
            source_path: upload.source_path,
            output_dir,
            archive_path,
            credential: upload.credential,
            state: JobState::Queued,
            created_at: now,
            updated_at: now,
        }
    }

    /// Move the job to a new state.
    pub fn transition(&mut self, state: JobState) {
        self.state = state;
        self.updated_at = Utc::now();
    }

    /// File name offered to the caller for the archive download.
    pub fn download_name(&self) -> String {
        let base: String = self
            .base_name
            .chars()
            .map(|c| if c == '"' || c.is_control() { '_' } else { c })
            .collect();
        format!("{}_{}.zip", base, OUTPUT_DIR_SUFFIX)
    }
}

fn sanitize_file_name(client_name: &str) -> String {
    // Browsers on Windows may send a full path with backslashes.
    let last = client_name
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default()
        .trim();
    if last.is_empty() || last == "." || last == ".." {
        FALLBACK_NAME.to_string()
    } else {
        last.to_string()
    }
}

fn split_name(name: &str) -> (String, Option<String>) {
    let path = Path::new(name);
    let base = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| FALLBACK_NAME.to_string());
    let extension = path
        .extension()
        .map(|e| e.to_string_lossy().into_owned())
        .filter(|e| !e.is_empty());
    (base, extension)
}
