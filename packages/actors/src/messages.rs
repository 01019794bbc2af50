//! Message types for actor communication.

use std::time::Duration;

use ractor::RpcReplyPort;
use stem_core::{FailureKind, Job, JobId, JobState, QueueStatus, Upload};
use tokio::sync::oneshot;

use crate::delivery::ArchiveDelivery;

/// One-shot channel carrying the single response owed to a submitter.
pub type Responder = oneshot::Sender<JobResponse>;

/// The response a submitter eventually receives.
#[derive(Debug)]
pub enum JobResponse {
    /// The archive is ready to be streamed.
    Archive(ArchiveDelivery),
    /// The submission never entered the queue.
    Rejected(AdmissionError),
    /// The job was accepted but ended without an archive.
    Failed(FailureKind),
}

/// Why the admission gate refused a submission.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AdmissionError {
    #[error("Queue is full ({limit} jobs)")]
    CapacityExceeded { limit: usize },

    #[error("Submission cooldown active, retry in {retry_after:?}")]
    Cooldown { retry_after: Duration },
}

impl AdmissionError {
    /// The failure kind reported in events and responses.
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            AdmissionError::CapacityExceeded { .. } => FailureKind::CapacityExceeded,
            AdmissionError::Cooldown { .. } => FailureKind::Cooldown,
        }
    }
}

/// Messages for the QueueActor.
#[derive(Debug)]
pub enum QueueMessage {
    /// Admit a new upload, answering on `responder` exactly once.
    Submit { upload: Upload, responder: Responder },

    /// The worker finished the job at the head of the queue.
    JobFinished { job_id: JobId, state: JobState },

    /// Get queue occupancy.
    GetStatus { reply: RpcReplyPort<QueueStatus> },

    /// List queued jobs, head first.
    ListJobs { reply: RpcReplyPort<Vec<Job>> },

    /// Stop the worker and the queue.
    Shutdown,
}

/// Messages for the WorkerActor.
#[derive(Debug)]
pub enum WorkerMessage {
    /// Drive a job through its lifecycle.
    ProcessJob { job: Box<Job>, responder: Responder },
}

/// Error type for talking to the queue from outside the actor system.
#[derive(Debug, thiserror::Error)]
pub enum ActorError {
    #[error("Queue actor unavailable: {0}")]
    Unavailable(String),

    #[error("Queue actor dropped the reply")]
    NoReply,
}
