//! Bounded work queue between the intake side and the worker pool
//! (SPEC_FULL.md §10 ambient concurrency). Mirrors the lineage's
//! `JobQueue`: a `Mutex<VecDeque<_>>` woken by a `tokio::sync::Notify`,
//! with cancellation expressed by dropping a per-submission token rather
//! than mutating the queue.

use std::collections::VecDeque;
use std::sync::Mutex;

use tokio::sync::{oneshot, Notify};
use tokio_util::sync::CancellationToken;

use crate::error::JudgeResult;
use crate::model::{Problem, SubmissionRequest, SubmissionResult};

/// One queued unit of work: a submission to judge, the already-resolved
/// problem it targets, a channel to deliver the result back to the caller,
/// and a token the caller can fire to cancel it before or during judging.
pub struct QueuedSubmission {
    pub request: SubmissionRequest,
    pub problem: Option<Problem>,
    pub responder: oneshot::Sender<JudgeResult<SubmissionResult>>,
    pub cancellation: CancellationToken,
}

#[derive(Default)]
pub struct SubmissionQueue {
    queue: Mutex<VecDeque<QueuedSubmission>>,
    notify: Notify,
}

impl SubmissionQueue {
    pub fn new() -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
        }
    }

    pub fn push(&self, submission: QueuedSubmission) {
        self.queue.lock().unwrap().push_back(submission);
        self.notify.notify_one();
    }

    pub async fn pop(&self) -> QueuedSubmission {
        loop {
            if let Some(submission) = self.queue.lock().unwrap().pop_front() {
                return submission;
            }
            self.notify.notified().await;
        }
    }

    pub fn len(&self) -> usize {
        self.queue.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
