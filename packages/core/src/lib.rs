//! Core domain types for the stem separation queue.
//!
//! This crate contains shared types used across all packages:
//! - Job, JobState and Upload for separation requests
//! - QueueStatus and the queue constants
//! - Events for observing admission and processing
//! - Id generation for per-job output directories

mod events;
mod id;
mod job;
mod queue;

pub use events::JobEvent;
pub use id::{Base36IdGenerator, IdGenerator};
pub use job::{
    ARCHIVE_FILE_NAME, FailureKind, Job, JobId, JobState, OUTPUT_DIR_SUFFIX, ToolStage, Upload,
};
pub use queue::{
    PROCESSING_FACTOR, QUEUE_LIMIT, QueueStatus, SUBMIT_COOLDOWN, estimate_processing_secs,
};
