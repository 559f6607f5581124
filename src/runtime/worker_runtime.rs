//! Per-thread tokio runtime for async tasks running on pool workers.
//!
//! Each worker builds its own single-threaded runtime the first time it runs
//! an async task and keeps it for the rest of its life, so async work never
//! touches the caller's runtime.

use std::cell::RefCell;
use std::future::Future;

use anyhow::Context;
use tokio::runtime::{Builder, Runtime};

use crate::core::AppResult;

thread_local! {
    static WORKER_RUNTIME: RefCell<Option<Runtime>> = const { RefCell::new(None) };
}

/// Drive `future` to completion on this thread's runtime.
///
/// # Errors
///
/// Fails if the runtime cannot be built, or if called re-entrantly from a
/// future that is already running on it.
pub(crate) fn block_on<F: Future>(future: F) -> AppResult<F::Output> {
    WORKER_RUNTIME.with(|slot| {
        let mut slot = slot
            .try_borrow_mut()
            .context("worker runtime is already driving a future")?;
        if slot.is_none() {
            let runtime = Builder::new_current_thread()
                .enable_all()
                .build()
                .context("failed to build worker runtime")?;
            tracing::debug!("worker runtime created");
            *slot = Some(runtime);
        }
        let runtime = slot.as_ref().context("worker runtime missing")?;
        Ok(runtime.block_on(future))
    })
}
