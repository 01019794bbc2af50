//! Queue-wide constants and the status snapshot served to clients.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Maximum number of jobs held in the queue, including the one in flight.
pub const QUEUE_LIMIT: usize = 10;

/// Window after an accepted submission during which new ones are refused.
pub const SUBMIT_COOLDOWN: Duration = Duration::from_secs(1);

/// Seconds of processing per second of audio, measured on the reference host.
pub const PROCESSING_FACTOR: f64 = 1.76;

/// Rough processing time for a file of the given duration, in whole seconds.
///
/// Only used for logging; it never drives timeouts or scheduling.
pub fn estimate_processing_secs(duration_secs: f64) -> u64 {
    if !duration_secs.is_finite() || duration_secs <= 0.0 {
        return 0;
    }
    (duration_secs * PROCESSING_FACTOR).round() as u64
}

/// Occupancy snapshot of the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStatus {
    /// Jobs currently queued, counting the one being processed.
    pub length: usize,
    /// Configured capacity.
    pub limit: usize,
}

impl QueueStatus {
    /// Whether another submission would be refused for capacity.
    pub fn is_full(&self) -> bool {
        self.length >= self.limit
    }
}
