//! Actor system for the separation queue.
//!
//! This crate provides the Ractor-based actors that admit uploads, hold
//! them in FIFO order and drive them one at a time through the external
//! separation and archive tools.
//!
//! # Architecture
//!
//! - `QueueActor` - Admission gate and owner of the job store
//! - `WorkerActor` - Runs the head job through the `Pipeline`, linked to the queue
//! - `QueueHandle` - Cloneable handle used by the HTTP layer
//!
//! # Usage
//!
//! ```ignore
//! use actors::{Pipeline, QueueSettings, start_queue};
//!
//! let pipeline = Pipeline::new(tools, probe);
//! let (queue, handle) = start_queue(QueueSettings::new("./out"), pipeline, ids).await?;
//!
//! let response = queue.submit(upload)?.await?;
//! ```

mod delivery;
mod handle;
mod messages;
mod pipeline;
pub mod probe;
mod queue_actor;
mod store;
pub mod tools;
mod worker_actor;

pub use delivery::{ArchiveDelivery, DeliveryOutcome, DeliveryTicket};
pub use handle::QueueHandle;
pub use messages::{ActorError, AdmissionError, JobResponse, QueueMessage, WorkerMessage};
pub use pipeline::{AuthPolicy, Pipeline};
pub use probe::{DurationProbe, FfprobeDurationProbe, ProbeError};
pub use queue_actor::{QueueActor, QueueArgs, QueueSettings, start_queue};
pub use store::{JobStore, QueuedJob};
pub use tools::{CommandTemplate, CommandToolRunner, ToolError, ToolRunner};
pub use worker_actor::WorkerActor;

/// Re-export ractor types for convenience.
pub use ractor::{Actor, ActorRef, concurrency};
