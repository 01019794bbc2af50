//! Event types for observing the queue.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{FailureKind, JobId, JobState};

/// Events emitted while submissions are admitted and jobs are processed.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum JobEvent {
    /// A submission was accepted and queued.
    JobEnqueued {
        job_id: JobId,
        original_name: String,
        /// Zero-based position in the queue, 0 meaning next to run.
        position: usize,
        timestamp: DateTime<Utc>,
    },
    /// A submission was refused at the door.
    SubmissionRejected {
        original_name: String,
        reason: FailureKind,
        timestamp: DateTime<Utc>,
    },
    /// A job reached the head of the queue and was handed to the worker.
    JobStarted {
        job_id: JobId,
        timestamp: DateTime<Utc>,
    },
    /// A job moved to a new lifecycle state.
    JobStateChanged {
        job_id: JobId,
        state: JobState,
        timestamp: DateTime<Utc>,
    },
    /// A job reached a terminal state and left the queue.
    JobFinished {
        job_id: JobId,
        state: JobState,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },
}

impl JobEvent {
    /// Get the timestamp of the event.
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            JobEvent::JobEnqueued { timestamp, .. } => *timestamp,
            JobEvent::SubmissionRejected { timestamp, .. } => *timestamp,
            JobEvent::JobStarted { timestamp, .. } => *timestamp,
            JobEvent::JobStateChanged { timestamp, .. } => *timestamp,
            JobEvent::JobFinished { timestamp, .. } => *timestamp,
        }
    }

    /// Get the job ID associated with this event, if any.
    pub fn job_id(&self) -> Option<JobId> {
        match self {
            JobEvent::JobEnqueued { job_id, .. } => Some(*job_id),
            JobEvent::JobStarted { job_id, .. } => Some(*job_id),
            JobEvent::JobStateChanged { job_id, .. } => Some(*job_id),
            JobEvent::JobFinished { job_id, .. } => Some(*job_id),
            JobEvent::SubmissionRejected { .. } => None,
        }
    }

    /// Get a short description of this event for logging.
    pub fn description(&self) -> String {
        match self {
            JobEvent::JobEnqueued {
                job_id,
                original_name,
                position,
                ..
            } => format!(
                "Job {} ({}) enqueued at position {}",
                job_id, original_name, position
            ),
            JobEvent::SubmissionRejected {
                original_name,
                reason,
                ..
            } => format!("Submission {} rejected: {}", original_name, reason),
            JobEvent::JobStarted { job_id, .. } => format!("Job {} started", job_id),
            JobEvent::JobStateChanged { job_id, state, .. } => {
                format!("Job {} -> {}", job_id, state.as_str())
            }
            JobEvent::JobFinished {
                job_id,
                state: JobState::Failed { error },
                duration_ms,
                ..
            } => format!("Job {} failed after {}ms: {}", job_id, duration_ms, error),
            JobEvent::JobFinished {
                job_id,
                duration_ms,
                ..
            } => format!("Job {} finished in {}ms", job_id, duration_ms),
        }
    }
}
