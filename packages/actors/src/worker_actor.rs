//! Worker actor that drives one job at a time through the pipeline.

use chrono::Utc;
use ractor::{Actor, ActorProcessingErr, ActorRef};

use crate::messages::{QueueMessage, WorkerMessage};
use crate::pipeline::Pipeline;

/// State for the worker actor.
pub struct WorkerActorState {
    /// Queue actor reference, told when a job ends.
    pub queue: ActorRef<QueueMessage>,
    /// Collaborators for each lifecycle step.
    pub pipeline: Pipeline,
}

/// Worker actor arguments.
pub struct WorkerArgs {
    pub queue: ActorRef<QueueMessage>,
    pub pipeline: Pipeline,
}

/// Worker actor that executes jobs.
///
/// A job is processed inside a single `handle` call, so the mailbox holds
/// any further work until the external tools are free again.
pub struct WorkerActor;

impl Actor for WorkerActor {
    type Msg = WorkerMessage;
    type State = WorkerActorState;
    type Arguments = WorkerArgs;

    async fn pre_start(
        &self,
        _myself: ActorRef<Self::Msg>,
        args: Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        tracing::debug!("Starting separation worker");
        Ok(WorkerActorState {
            queue: args.queue,
            pipeline: args.pipeline,
        })
    }

    async fn handle(
        &self,
        _myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            WorkerMessage::ProcessJob { job, responder } => {
                let job = *job;
                let job_id = job.id;
                let started_at = Utc::now();

                let final_state = state.pipeline.run(job, responder).await;

                tracing::info!(
                    "Job {} ended as {} after {}ms",
                    job_id,
                    final_state.as_str(),
                    (Utc::now() - started_at).num_milliseconds()
                );
                state.queue.send_message(QueueMessage::JobFinished {
                    job_id,
                    state: final_state,
                })?;
            }
        }

        Ok(())
    }
}
