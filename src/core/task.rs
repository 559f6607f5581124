//! Task identity, lifecycle states, and the per-thread interruption context.

use std::cell::RefCell;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::error::TaskFailure;

/// Identifier assigned by a pool in submission order.
pub type TaskId = u64;

/// Lifecycle state of a task.
///
/// `Queued → Running → {Completed | Failed}` and `Queued → Cancelled`.
/// Terminal states never change once reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    /// Waiting for a worker (or for its timer to fire).
    Queued,
    /// Picked up by a worker.
    Running,
    /// Finished and produced a value.
    Completed,
    /// Returned an error or panicked.
    Failed,
    /// Removed before it ran.
    Cancelled,
}

impl TaskState {
    /// Whether no further transition can leave this state.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Stable lowercase name, used in logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

thread_local! {
    static CURRENT_INTERRUPT: RefCell<Option<Arc<AtomicBool>>> = const { RefCell::new(None) };
}

/// Whether the task running on this thread has been asked to stop.
///
/// Cancelling a running task (or `shutdown_now`) only raises this flag;
/// long-running operations are expected to poll it and return early.
/// Outside of a pool task this always returns `false`.
#[must_use]
pub fn is_interrupted() -> bool {
    CURRENT_INTERRUPT.with(|current| {
        current
            .borrow()
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::Acquire))
    })
}

/// Restores the previous interrupt flag when dropped.
pub(crate) struct InterruptScope {
    previous: Option<Arc<AtomicBool>>,
}

/// Make `flag` the interrupt flag reported by [`is_interrupted`] on this thread.
pub(crate) fn enter_interrupt_scope(flag: Arc<AtomicBool>) -> InterruptScope {
    let previous = CURRENT_INTERRUPT.with(|current| current.replace(Some(flag)));
    InterruptScope { previous }
}

impl Drop for InterruptScope {
    fn drop(&mut self) {
        let previous = self.previous.take();
        CURRENT_INTERRUPT.with(|current| *current.borrow_mut() = previous);
    }
}

/// Run `operation`, capturing both returned errors and panics.
pub(crate) fn run_guarded<T, F>(operation: F) -> Result<T, TaskFailure>
where
    F: FnOnce() -> Result<T, anyhow::Error>,
{
    match panic::catch_unwind(AssertUnwindSafe(operation)) {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(err)) => Err(TaskFailure::from_error(&err)),
        Err(payload) => Err(TaskFailure::from_panic(payload.as_ref())),
    }
}

type JobFn = Box<dyn FnOnce() -> TaskState + Send + 'static>;

/// Unit of work travelling through a pool queue.
///
/// The closure reports the state the task ended in so workers can keep
/// statistics. Dropping a job without running it cancels whatever task it
/// wraps.
pub(crate) struct Job {
    pub(crate) id: TaskId,
    pub(crate) interrupt: Arc<AtomicBool>,
    run: JobFn,
}

impl Job {
    pub(crate) fn new<F>(id: TaskId, interrupt: Arc<AtomicBool>, run: F) -> Self
    where
        F: FnOnce() -> TaskState + Send + 'static,
    {
        Self {
            id,
            interrupt,
            run: Box::new(run),
        }
    }

    /// Fire-and-forget job: there is no handle, so failures are only logged.
    pub(crate) fn detached<F>(id: TaskId, operation: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self::new(id, Arc::new(AtomicBool::new(false)), move || {
            match run_guarded(|| {
                operation();
                Ok(())
            }) {
                Ok(()) => TaskState::Completed,
                Err(failure) => {
                    tracing::error!(task_id = id, error = %failure, "detached task panicked");
                    TaskState::Failed
                }
            }
        })
    }

    pub(crate) fn run(self) -> TaskState {
        (self.run)()
    }
}

impl fmt::Debug for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Job").field("id", &self.id).finish_non_exhaustive()
    }
}
