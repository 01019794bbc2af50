//! The linear job lifecycle: authorize, probe, separate, archive, deliver, clean up.

use std::io::ErrorKind;
use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use stem_core::{FailureKind, Job, JobEvent, JobState, estimate_processing_secs};
use tokio::sync::broadcast;

use crate::delivery::{ArchiveDelivery, DeliveryOutcome, DeliveryTicket};
use crate::messages::{JobResponse, Responder};
use crate::probe::DurationProbe;
use crate::tools::ToolRunner;

/// Whether submissions must carry the shared credential.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum AuthPolicy {
    #[default]
    Disabled,
    Password(String),
}

impl AuthPolicy {
    pub fn permits(&self, credential: Option<&str>) -> bool {
        match self {
            AuthPolicy::Disabled => true,
            AuthPolicy::Password(expected) => credential == Some(expected.as_str()),
        }
    }
}

/// Collaborators the worker drives each job through.
#[derive(Clone)]
pub struct Pipeline {
    tools: Arc<dyn ToolRunner>,
    probe: Arc<dyn DurationProbe>,
    auth: AuthPolicy,
    event_tx: Option<broadcast::Sender<JobEvent>>,
}

impl Pipeline {
    pub fn new(tools: Arc<dyn ToolRunner>, probe: Arc<dyn DurationProbe>) -> Self {
        Self {
            tools,
            probe,
            auth: AuthPolicy::Disabled,
            event_tx: None,
        }
    }

    /// Set the authentication policy.
    pub fn with_auth(mut self, auth: AuthPolicy) -> Self {
        self.auth = auth;
        self
    }

    /// Set the event broadcaster.
    pub fn with_event_tx(mut self, tx: broadcast::Sender<JobEvent>) -> Self {
        self.event_tx = Some(tx);
        self
    }

    /// Run a job to a terminal state.
    ///
    /// Exactly one response goes out on `responder`, and the job's input
    /// file and output directory are gone by the time this returns.
    pub async fn run(&self, mut job: Job, responder: Responder) -> JobState {
        let state = match self.drive(&mut job, responder).await {
            Ok(()) => JobState::Done,
            Err(error) => JobState::Failed { error },
        };
        self.set_state(&mut job, state.clone());
        cleanup_job_files(&job).await;
        state
    }

    async fn drive(&self, job: &mut Job, responder: Responder) -> Result<(), FailureKind> {
        if !self.auth.permits(job.credential.as_deref()) {
            tracing::warn!("Job {} rejected: bad credential", job.id);
            return Err(respond_failure(responder, FailureKind::Unauthorized));
        }

        match self.probe.probe(&job.source_path).await {
            Ok(duration) => {
                tracing::info!(
                    "Processing {} ({} seconds), estimated time: {} seconds",
                    job.original_name,
                    duration,
                    estimate_processing_secs(duration)
                );
            }
            Err(e) => {
                tracing::warn!("Could not probe duration of {}: {}", job.original_name, e);
            }
        }
        self.set_state(job, JobState::DurationProbed);

        if let Err(e) = tokio::fs::create_dir_all(&job.output_dir).await {
            tracing::error!("Failed to create {:?}: {}", job.output_dir, e);
            return Err(respond_failure(responder, FailureKind::Workspace));
        }

        self.set_state(job, JobState::Separating);
        tracing::info!("Separating {} into {:?}", job.original_name, job.output_dir);
        if let Err(e) = self
            .tools
            .run_separation(&job.source_path, &job.output_dir)
            .await
        {
            tracing::error!("Job {} failed: {}", job.id, e);
            let stage = e.stage();
            return Err(respond_failure(
                responder,
                FailureKind::ToolInvocation { stage },
            ));
        }

        self.set_state(job, JobState::Archiving);
        if let Err(e) = self
            .tools
            .run_archive(&job.output_dir, &job.archive_path)
            .await
        {
            tracing::error!("Job {} failed: {}", job.id, e);
            let stage = e.stage();
            return Err(respond_failure(
                responder,
                FailureKind::ToolInvocation { stage },
            ));
        }

        self.set_state(job, JobState::Delivering);
        deliver(job, responder).await
    }

    fn set_state(&self, job: &mut Job, state: JobState) {
        job.transition(state.clone());
        if let Some(ref tx) = self.event_tx {
            let _ = tx.send(JobEvent::JobStateChanged {
                job_id: job.id,
                state,
                timestamp: Utc::now(),
            });
        }
    }
}

/// Send a failure to the submitter. A vanished submitter is not an error here.
fn respond_failure(responder: Responder, kind: FailureKind) -> FailureKind {
    let _ = responder.send(JobResponse::Failed(kind.clone()));
    kind
}

async fn deliver(job: &Job, responder: Responder) -> Result<(), FailureKind> {
    let opened = match tokio::fs::File::open(&job.archive_path).await {
        Ok(file) => file.metadata().await.map(|meta| (file, meta.len())),
        Err(e) => Err(e),
    };
    let (file, len) = match opened {
        Ok(opened) => opened,
        Err(e) => {
            tracing::error!("Archive {:?} unreadable: {}", job.archive_path, e);
            return Err(respond_failure(responder, FailureKind::Delivery));
        }
    };

    let (ticket, done) = DeliveryTicket::new();
    let delivery = ArchiveDelivery {
        file,
        len,
        file_name: job.download_name(),
        ticket,
    };
    if responder.send(JobResponse::Archive(delivery)).is_err() {
        tracing::warn!("Job {}: caller went away before delivery", job.id);
        return Err(FailureKind::Delivery);
    }

    match done.await {
        Ok(DeliveryOutcome::Completed) => {
            tracing::info!("Job {}: delivered {} bytes", job.id, len);
            Ok(())
        }
        Ok(DeliveryOutcome::Aborted) | Err(_) => {
            tracing::warn!("Job {}: delivery aborted", job.id);
            Err(FailureKind::Delivery)
        }
    }
}

/// Remove a job's input file and output directory, archive included.
pub(crate) async fn cleanup_job_files(job: &Job) {
    remove_upload(&job.source_path).await;
    remove_dir(&job.output_dir).await;
}

/// Remove a stored upload. Already gone is fine.
pub(crate) async fn remove_upload(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await
        && e.kind() != ErrorKind::NotFound
    {
        tracing::warn!("Failed to remove {:?}: {}", path, e);
    }
}

async fn remove_dir(dir: &Path) {
    if let Err(e) = tokio::fs::remove_dir_all(dir).await
        && e.kind() != ErrorKind::NotFound
    {
        tracing::warn!("Failed to remove {:?}: {}", dir, e);
    }
}
