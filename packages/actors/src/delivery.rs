//! Handing a finished archive to the transport layer.

use tokio::fs::File;
use tokio::sync::oneshot;

/// How streaming the archive to the caller ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// Every byte was handed to the connection.
    Completed,
    /// The stream errored or was dropped early.
    Aborted,
}

/// An opened archive ready to be streamed to the caller.
///
/// The worker waits on the paired ticket before deleting the job's files.
#[derive(Debug)]
pub struct ArchiveDelivery {
    pub file: File,
    /// Size of the archive in bytes.
    pub len: u64,
    /// Name offered to the caller.
    pub file_name: String,
    pub ticket: DeliveryTicket,
}

/// Reports the end of a delivery back to the worker.
///
/// Dropping an unfinished ticket reports [`DeliveryOutcome::Aborted`].
#[derive(Debug)]
pub struct DeliveryTicket {
    tx: Option<oneshot::Sender<DeliveryOutcome>>,
}

impl DeliveryTicket {
    pub fn new() -> (Self, oneshot::Receiver<DeliveryOutcome>) {
        let (tx, rx) = oneshot::channel();
        (Self { tx: Some(tx) }, rx)
    }

    /// The archive was fully streamed.
    pub fn complete(mut self) {
        self.finish(DeliveryOutcome::Completed);
    }

    /// Streaming failed part way.
    pub fn abort(mut self) {
        self.finish(DeliveryOutcome::Aborted);
    }

    fn finish(&mut self, outcome: DeliveryOutcome) {
        if let Some(tx) = self.tx.take() {
            let _ = tx.send(outcome);
        }
    }
}

impl Drop for DeliveryTicket {
    fn drop(&mut self) {
        self.finish(DeliveryOutcome::Aborted);
    }
}
