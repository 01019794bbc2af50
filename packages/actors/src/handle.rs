//! Cloneable front door to the queue actor.

use ractor::ActorRef;
use stem_core::{Job, JobEvent, QueueStatus, Upload};
use tokio::sync::{broadcast, oneshot};

use crate::messages::{ActorError, JobResponse, QueueMessage};

/// Handle used by request handlers to reach the queue.
#[derive(Clone)]
pub struct QueueHandle {
    actor: ActorRef<QueueMessage>,
    event_tx: broadcast::Sender<JobEvent>,
}

impl QueueHandle {
    pub fn new(actor: ActorRef<QueueMessage>, event_tx: broadcast::Sender<JobEvent>) -> Self {
        Self { actor, event_tx }
    }

    /// Submit an upload. The receiver resolves once the job's single response is ready.
    ///
    /// A receiver that errors means the queue dropped the job without answering,
    /// which only happens when the worker or the queue itself went away.
    pub fn submit(&self, upload: Upload) -> Result<oneshot::Receiver<JobResponse>, ActorError> {
        let (responder, rx) = oneshot::channel();
        self.actor
            .send_message(QueueMessage::Submit { upload, responder })
            .map_err(|e| ActorError::Unavailable(e.to_string()))?;
        Ok(rx)
    }

    /// Current queue occupancy.
    pub async fn status(&self) -> Result<QueueStatus, ActorError> {
        let (tx, rx) = ractor::concurrency::oneshot();
        self.actor
            .send_message(QueueMessage::GetStatus { reply: tx.into() })
            .map_err(|e| ActorError::Unavailable(e.to_string()))?;
        rx.await.map_err(|_| ActorError::NoReply)
    }

    /// Snapshot of held jobs, head first.
    pub async fn jobs(&self) -> Result<Vec<Job>, ActorError> {
        let (tx, rx) = ractor::concurrency::oneshot();
        self.actor
            .send_message(QueueMessage::ListJobs { reply: tx.into() })
            .map_err(|e| ActorError::Unavailable(e.to_string()))?;
        rx.await.map_err(|_| ActorError::NoReply)
    }

    /// Subscribe to job events.
    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.event_tx.subscribe()
    }

    /// Ask the queue to stop. Queued jobs are dropped and their files removed.
    pub fn shutdown(&self) -> Result<(), ActorError> {
        self.actor
            .send_message(QueueMessage::Shutdown)
            .map_err(|e| ActorError::Unavailable(e.to_string()))
    }
}
