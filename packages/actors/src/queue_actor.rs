//! Queue actor: admission gate, job store owner and dispatcher.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use ractor::{Actor, ActorProcessingErr, ActorRef, SupervisionEvent};
use stem_core::{
    FailureKind, IdGenerator, Job, JobEvent, JobId, JobState, QUEUE_LIMIT, QueueStatus,
    SUBMIT_COOLDOWN, Upload,
};
use tokio::sync::broadcast;

use crate::handle::QueueHandle;
use crate::messages::{AdmissionError, JobResponse, QueueMessage, Responder, WorkerMessage};
use crate::pipeline::{Pipeline, cleanup_job_files, remove_upload};
use crate::store::{JobStore, QueuedJob};
use crate::worker_actor::{WorkerActor, WorkerArgs};

/// Admission and layout settings for the queue.
#[derive(Debug, Clone)]
pub struct QueueSettings {
    /// Maximum jobs held, including the one in flight.
    pub limit: usize,
    /// Minimum spacing between accepted submissions.
    pub cooldown: Duration,
    /// Directory receiving one output directory per job.
    pub output_root: PathBuf,
}

impl QueueSettings {
    pub fn new(output_root: impl Into<PathBuf>) -> Self {
        Self {
            limit: QUEUE_LIMIT,
            cooldown: SUBMIT_COOLDOWN,
            output_root: output_root.into(),
        }
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    pub fn with_cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown = cooldown;
        self
    }
}

/// Queue actor arguments.
pub struct QueueArgs {
    pub settings: QueueSettings,
    pub pipeline: Pipeline,
    pub ids: Arc<dyn IdGenerator>,
    pub event_tx: broadcast::Sender<JobEvent>,
}

/// The job currently handed to the worker.
#[derive(Debug, Clone, Copy)]
struct InFlight {
    job_id: JobId,
    started_at: Instant,
}

/// State for the queue actor.
pub struct QueueActorState {
    settings: QueueSettings,
    store: JobStore,
    ids: Arc<dyn IdGenerator>,
    pipeline: Pipeline,
    worker: Option<ActorRef<WorkerMessage>>,
    in_flight: Option<InFlight>,
    last_accepted: Option<Instant>,
    event_tx: broadcast::Sender<JobEvent>,
    stopping: bool,
}

impl QueueActorState {
    fn new(args: QueueArgs) -> Self {
        Self {
            store: JobStore::new(args.settings.limit),
            settings: args.settings,
            ids: args.ids,
            pipeline: args.pipeline,
            worker: None,
            in_flight: None,
            last_accepted: None,
            event_tx: args.event_tx,
            stopping: false,
        }
    }

    /// Broadcast an event.
    fn broadcast(&self, event: JobEvent) {
        let _ = self.event_tx.send(event);
    }

    fn status(&self) -> QueueStatus {
        QueueStatus {
            length: self.store.len(),
            limit: self.store.limit(),
        }
    }

    /// Accept or refuse a submission.
    async fn admit(&mut self, upload: Upload, responder: Responder) {
        let now = Instant::now();
        if let Some(last) = self.last_accepted {
            let elapsed = now.duration_since(last);
            if elapsed < self.settings.cooldown {
                let retry_after = self.settings.cooldown - elapsed;
                self.reject(
                    &upload.source_path,
                    upload.original_name,
                    Some(responder),
                    AdmissionError::Cooldown { retry_after },
                )
                .await;
                return;
            }
        }

        let run_id = self.ids.generate();
        let job = Job::new(upload, &self.settings.output_root, &run_id);
        let job_id = job.id;
        let original_name = job.original_name.clone();

        let position = match self.store.enqueue(QueuedJob::new(job, responder)) {
            Ok(position) => position,
            Err(mut refused) => {
                let responder = refused.take_responder();
                let limit = self.store.limit();
                self.reject(
                    &refused.job.source_path,
                    refused.job.original_name,
                    responder,
                    AdmissionError::CapacityExceeded { limit },
                )
                .await;
                return;
            }
        };
        self.last_accepted = Some(now);

        tracing::info!(
            "Queued {} as job {} ({}/{})",
            original_name,
            job_id,
            self.store.len(),
            self.store.limit()
        );
        self.broadcast(JobEvent::JobEnqueued {
            job_id,
            original_name,
            position,
            timestamp: Utc::now(),
        });

        self.process_next();
    }

    /// Refuse a submission. A refused upload is never owned by a job, so it goes here.
    async fn reject(
        &self,
        source_path: &Path,
        original_name: String,
        responder: Option<Responder>,
        error: AdmissionError,
    ) {
        tracing::warn!("Rejected {}: {}", original_name, error);
        remove_upload(source_path).await;
        let reason = error.failure_kind();
        if let Some(responder) = responder {
            let _ = responder.send(JobResponse::Rejected(error));
        }
        self.broadcast(JobEvent::SubmissionRejected {
            original_name,
            reason,
            timestamp: Utc::now(),
        });
    }

    /// Hand the head job to the worker unless one is already in flight.
    fn process_next(&mut self) {
        if self.in_flight.is_some() || self.stopping {
            return;
        }
        let Some(worker) = self.worker.clone() else {
            return;
        };
        let Some(entry) = self.store.peek_front_mut() else {
            return;
        };
        let Some(responder) = entry.take_responder() else {
            tracing::error!("Job {} at the head was already dispatched", entry.job.id);
            return;
        };

        let job = entry.job.clone();
        let job_id = job.id;
        self.in_flight = Some(InFlight {
            job_id,
            started_at: Instant::now(),
        });

        if let Err(e) = worker.send_message(WorkerMessage::ProcessJob {
            job: Box::new(job),
            responder,
        }) {
            // The responder went down with the message; the caller sees a closed channel.
            tracing::error!("Worker unavailable for job {}: {}", job_id, e);
            self.worker = None;
            if let Some(job) = self.abandon_in_flight() {
                tokio::spawn(async move { cleanup_job_files(&job).await });
            }
            return;
        }

        self.broadcast(JobEvent::JobStarted {
            job_id,
            timestamp: Utc::now(),
        });
    }

    /// Retire the head job after the worker reported a terminal state.
    fn finish(&mut self, job_id: JobId, final_state: JobState) {
        let Some(in_flight) = self.in_flight.take_if(|f| f.job_id == job_id) else {
            tracing::warn!("Ignoring completion of job {} which is not in flight", job_id);
            return;
        };
        if self.store.dequeue_front(job_id).is_none() {
            tracing::error!("Job {} finished but is not at the head of the queue", job_id);
        }

        self.broadcast(JobEvent::JobFinished {
            job_id,
            state: final_state,
            duration_ms: in_flight.started_at.elapsed().as_millis() as u64,
            timestamp: Utc::now(),
        });

        self.process_next();
    }

    /// Drop the in-flight job after losing the worker.
    ///
    /// Returns the job so the caller can remove its files.
    fn abandon_in_flight(&mut self) -> Option<Job> {
        let in_flight = self.in_flight.take()?;
        let entry = self.store.dequeue_front(in_flight.job_id)?;
        tracing::error!("Job {} abandoned: worker lost", in_flight.job_id);

        self.broadcast(JobEvent::JobFinished {
            job_id: in_flight.job_id,
            state: JobState::Failed {
                error: FailureKind::WorkerLost,
            },
            duration_ms: in_flight.started_at.elapsed().as_millis() as u64,
            timestamp: Utc::now(),
        });
        Some(entry.job)
    }
}

async fn spawn_worker(
    myself: &ActorRef<QueueMessage>,
    state: &mut QueueActorState,
) -> Result<(), ActorProcessingErr> {
    let args = WorkerArgs {
        queue: myself.clone(),
        pipeline: state.pipeline.clone(),
    };
    let (worker, _handle) = Actor::spawn_linked(None, WorkerActor, args, myself.get_cell())
        .await
        .map_err(|e| ActorProcessingErr::from(format!("Failed to spawn worker: {}", e)))?;
    state.worker = Some(worker);
    Ok(())
}

/// Queue actor that owns the job store.
///
/// All store mutation happens in `handle`, one message at a time; the
/// long-running work lives in the linked worker so admission never waits
/// on an external tool.
pub struct QueueActor;

impl Actor for QueueActor {
    type Msg = QueueMessage;
    type State = QueueActorState;
    type Arguments = QueueArgs;

    async fn pre_start(
        &self,
        myself: ActorRef<Self::Msg>,
        args: Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        tracing::info!(
            "Starting separation queue (limit {}, output {:?})",
            args.settings.limit,
            args.settings.output_root
        );
        let mut state = QueueActorState::new(args);
        spawn_worker(&myself, &mut state).await?;
        Ok(state)
    }

    async fn handle(
        &self,
        myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            QueueMessage::Submit { upload, responder } => {
                state.admit(upload, responder).await;
            }

            QueueMessage::JobFinished {
                job_id,
                state: final_state,
            } => {
                state.finish(job_id, final_state);
            }

            QueueMessage::GetStatus { reply } => {
                let _ = reply.send(state.status());
            }

            QueueMessage::ListJobs { reply } => {
                let _ = reply.send(state.store.jobs().cloned().collect());
            }

            QueueMessage::Shutdown => {
                tracing::info!("Shutting down separation queue");
                state.stopping = true;
                // A running tool is killed with the worker.
                if let Some(worker) = state.worker.take() {
                    worker.kill();
                }
                myself.stop(None);
            }
        }

        Ok(())
    }

    async fn handle_supervisor_evt(
        &self,
        myself: ActorRef<Self::Msg>,
        message: SupervisionEvent,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        let reason = match message {
            SupervisionEvent::ActorTerminated(_, _, reason) => {
                reason.unwrap_or_else(|| "stopped".to_string())
            }
            SupervisionEvent::ActorFailed(_, err) => err.to_string(),
            _ => return Ok(()),
        };

        state.worker = None;
        if let Some(job) = state.abandon_in_flight() {
            cleanup_job_files(&job).await;
        }
        if state.stopping {
            return Ok(());
        }

        tracing::warn!("Separation worker exited ({}), restarting", reason);
        spawn_worker(&myself, state).await?;
        state.process_next();
        Ok(())
    }

    async fn post_stop(
        &self,
        _myself: ActorRef<Self::Msg>,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        // Queued callers see their response channel close; their uploads go too.
        while let Some(job_id) = state.store.peek_front().map(|entry| entry.job.id) {
            if let Some(entry) = state.store.dequeue_front(job_id) {
                cleanup_job_files(&entry.job).await;
            }
        }
        Ok(())
    }
}

/// Start the queue actor and its worker.
pub async fn start_queue(
    settings: QueueSettings,
    pipeline: Pipeline,
    ids: Arc<dyn IdGenerator>,
) -> Result<(QueueHandle, tokio::task::JoinHandle<()>), ractor::SpawnErr> {
    let (event_tx, _) = broadcast::channel(1024);
    let args = QueueArgs {
        settings,
        pipeline: pipeline.with_event_tx(event_tx.clone()),
        ids,
        event_tx: event_tx.clone(),
    };
    let (actor, handle) = Actor::spawn(None, QueueActor, args).await?;

    Ok((QueueHandle::new(actor, event_tx), handle))
}
