//! Worker pool: one task per worker, pulling `QueuedSubmission`s off the
//! queue and running `judge::run` inside `spawn_blocking` (the orchestrator
//! is synchronous end to end — sandboxing blocks on `waitpid`). Grounded on
//! the lineage's `worker.rs` shutdown/dispatch shape, generalized from a
//! single `JobMessage` enum to a uniform queued-submission record since
//! every mode returns its result to the caller (spec §4.6 applies uniformly
//! across `submit`/`run_sample`/`custom`).

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::judge;
use crate::queue::SubmissionQueue;
use crate::sink::SubmissionSink;
use crate::storage::TestCaseStorage;

pub async fn worker(
    id: u8,
    config: Arc<Config>,
    storage: Arc<TestCaseStorage>,
    sink: Arc<dyn SubmissionSink>,
    queue: Arc<SubmissionQueue>,
    shutdown: CancellationToken,
) {
    log::info!("worker {id} initialized");

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                log::info!("worker {id} received shutdown signal, stopping");
                break;
            }

            submission = queue.pop() => {
                let submitter_id = submission.request.submitter_id;
                let cancellation = submission.cancellation.clone();

                let config = config.clone();
                let storage = storage.clone();
                let sink = sink.clone();
                let request = submission.request;
                let problem = submission.problem;

                let result_handle = tokio::task::spawn_blocking(move || {
                    judge::run(&config, &storage, sink.as_ref(), problem.as_ref(), &request, &cancellation)
                });

                match result_handle.await {
                    Ok(result) => {
                        if let Err(ref e) = result {
                            log::warn!("submission from {submitter_id} on worker {id} failed: {e}");
                        }
                        if submission.responder.send(result).is_err() {
                            log::debug!("submitter for {submitter_id} dropped before result was delivered");
                        }
                    }
                    Err(e) => {
                        log::error!("judging submission from {submitter_id} panicked on worker {id}: {e}");
                    }
                }
            }
        }
    }

    log::info!("worker {id} has shut down gracefully");
}

/// Spawn `count` worker tasks sharing one queue, returning their join
/// handles so the caller can await a graceful shutdown.
pub fn spawn_pool(
    count: usize,
    config: Arc<Config>,
    storage: Arc<TestCaseStorage>,
    sink: Arc<dyn SubmissionSink>,
    queue: Arc<SubmissionQueue>,
    shutdown: CancellationToken,
) -> Vec<tokio::task::JoinHandle<()>> {
    (0..count)
        .map(|id| {
            tokio::spawn(worker(
                id as u8,
                config.clone(),
                storage.clone(),
                sink.clone(),
                queue.clone(),
                shutdown.clone(),
            ))
        })
        .collect()
}
