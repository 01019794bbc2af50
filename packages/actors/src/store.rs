//! Bounded FIFO of admitted jobs.

use std::collections::VecDeque;

use stem_core::{Job, JobId};

use crate::messages::Responder;

/// A queued job together with the channel back to its submitter.
///
/// The responder is taken when the job is handed to the worker; the job
/// itself stays at the head of the store until it reaches a terminal state.
#[derive(Debug)]
pub struct QueuedJob {
    pub job: Job,
    responder: Option<Responder>,
}

impl QueuedJob {
    pub fn new(job: Job, responder: Responder) -> Self {
        Self {
            job,
            responder: Some(responder),
        }
    }

    /// Take the responder for dispatch. Returns `None` once dispatched.
    pub fn take_responder(&mut self) -> Option<Responder> {
        self.responder.take()
    }

    /// Whether the job has been handed to the worker.
    pub fn is_dispatched(&self) -> bool {
        self.responder.is_none()
    }
}

/// Ordered, capacity-bounded job store.
///
/// Jobs leave only from the front, so processing order equals arrival order.
#[derive(Debug)]
pub struct JobStore {
    jobs: VecDeque<QueuedJob>,
    limit: usize,
}

impl JobStore {
    pub fn new(limit: usize) -> Self {
        Self {
            jobs: VecDeque::with_capacity(limit),
            limit,
        }
    }

    /// Append a job, handing it back untouched if the store is full.
    pub fn enqueue(&mut self, entry: QueuedJob) -> Result<usize, QueuedJob> {
        if self.is_full() {
            return Err(entry);
        }
        self.jobs.push_back(entry);
        Ok(self.jobs.len() - 1)
    }

    pub fn peek_front(&self) -> Option<&QueuedJob> {
        self.jobs.front()
    }

    pub fn peek_front_mut(&mut self) -> Option<&mut QueuedJob> {
        self.jobs.front_mut()
    }

    /// Remove the front job, but only if it is the one named.
    pub fn dequeue_front(&mut self, job_id: JobId) -> Option<QueuedJob> {
        match self.jobs.front() {
            Some(front) if front.job.id == job_id => self.jobs.pop_front(),
            _ => None,
        }
    }

    /// Zero-based position of a job, 0 meaning the head.
    pub fn position(&self, job_id: JobId) -> Option<usize> {
        self.jobs.iter().position(|entry| entry.job.id == job_id)
    }

    pub fn jobs(&self) -> impl Iterator<Item = &Job> {
        self.jobs.iter().map(|entry| &entry.job)
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.jobs.len() >= self.limit
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use stem_core::Upload;
    use tokio::sync::oneshot;

    use super::*;

    fn entry(name: &str) -> QueuedJob {
        let upload = Upload::new(Path::new("in"), name, None);
        let (tx, _rx) = oneshot::channel();
        QueuedJob::new(Job::new(upload, Path::new("out"), "id"), tx)
    }

    #[test]
    fn enqueue_respects_limit() {
        let mut store = JobStore::new(2);
        assert_eq!(store.enqueue(entry("a.wav")).ok(), Some(0));
        assert_eq!(store.enqueue(entry("b.wav")).ok(), Some(1));
        assert!(store.is_full());

        let rejected = store.enqueue(entry("c.wav"));
        assert!(rejected.is_err());
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn only_the_front_can_leave() {
        let mut store = JobStore::new(3);
        let first = entry("a.wav");
        let second = entry("b.wav");
        let (first_id, second_id) = (first.job.id, second.job.id);
        assert!(store.enqueue(first).is_ok());
        assert!(store.enqueue(second).is_ok());

        assert!(store.dequeue_front(second_id).is_none());
        assert_eq!(store.len(), 2);
        assert_eq!(store.position(second_id), Some(1));

        let removed = store.dequeue_front(first_id).map(|e| e.job.id);
        assert_eq!(removed, Some(first_id));
        assert_eq!(store.peek_front().map(|e| e.job.id), Some(second_id));
    }

    #[test]
    fn responder_is_taken_once() {
        let mut queued = entry("a.wav");
        assert!(!queued.is_dispatched());
        assert!(queued.take_responder().is_some());
        assert!(queued.take_responder().is_none());
        assert!(queued.is_dispatched());
    }
}
