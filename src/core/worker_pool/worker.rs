//! Worker thread loops.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::RecvTimeoutError;
use tracing::debug;

use super::PoolShared;
use crate::core::task::Job;

/// Keeps pool bookkeeping correct however the worker loop ends.
struct ExitGuard<'a> {
    shared: &'a PoolShared,
    worker_id: usize,
}

impl Drop for ExitGuard<'_> {
    fn drop(&mut self) {
        self.shared.counters.worker_exited();
        self.shared.termination.thread_exited();
        debug!(pool_id = %self.shared.id, worker_id = self.worker_id, "worker thread exiting");
    }
}

/// Body of every worker thread.
pub(super) fn run(shared: &Arc<PoolShared>, worker_id: usize, first: Option<Job>) {
    let _guard = ExitGuard {
        shared: shared.as_ref(),
        worker_id,
    };
    debug!(pool_id = %shared.id, worker_id, "worker thread started");

    if let Some(job) = first {
        shared.run_job(worker_id, job);
    }

    match shared.config.policy.keep_alive() {
        Some(keep_alive) => cached_loop(shared, worker_id, keep_alive),
        None => core_loop(shared, worker_id),
    }
}

/// Fixed, single, and scheduled workers live until the queue closes.
fn core_loop(shared: &PoolShared, worker_id: usize) {
    while let Ok(job) = shared.task_rx.recv() {
        shared.counters.queued.fetch_sub(1, Ordering::Relaxed);
        shared.run_job(worker_id, job);
    }
}

/// Cached workers retire after `keep_alive` without work.
fn cached_loop(shared: &PoolShared, worker_id: usize, keep_alive: Duration) {
    loop {
        shared.idle_workers.fetch_add(1, Ordering::AcqRel);
        let job = loop {
            match shared.task_rx.recv_timeout(keep_alive) {
                Ok(job) => break Some(job),
                // A failed claim means a submitter already counted on this
                // worker, so keep waiting for that task.
                Err(RecvTimeoutError::Timeout) => {
                    if shared.try_claim_idle() {
                        debug!(pool_id = %shared.id, worker_id, "idle worker retiring");
                        break None;
                    }
                }
                Err(RecvTimeoutError::Disconnected) => {
                    shared.try_claim_idle();
                    break None;
                }
            }
        };

        let Some(job) = job else {
            return;
        };
        shared.counters.queued.fetch_sub(1, Ordering::Relaxed);
        shared.run_job(worker_id, job);
    }
}
