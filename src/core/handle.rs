//! Write-once result cells shared between a task and its readers.
//!
//! A [`ResultHandle`] is bound to exactly one task. Readers block until the
//! task reaches a terminal state; after that every read, from every clone of
//! the handle, returns the same cached outcome without waiting.
//!
//! [`FutureTask`] packages an operation together with its handle so it can be
//! run anywhere: inline, through [`WorkerPool::execute`], or by the pool itself
//! via [`WorkerPool::submit`].
//!
//! [`WorkerPool::execute`]: crate::core::WorkerPool::execute
//! [`WorkerPool::submit`]: crate::core::WorkerPool::submit

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, warn};

use super::error::{PoolError, TaskFailure};
use super::task::{enter_interrupt_scope, run_guarded, Job, TaskId, TaskState};

/// Terminal outcome stored in a cell.
#[derive(Debug)]
pub(crate) enum Outcome<T> {
    Completed(T),
    Failed(TaskFailure),
    Cancelled,
}

impl<T> Outcome<T> {
    const fn state(&self) -> TaskState {
        match self {
            Self::Completed(_) => TaskState::Completed,
            Self::Failed(_) => TaskState::Failed,
            Self::Cancelled => TaskState::Cancelled,
        }
    }
}

impl<T: Clone> Outcome<T> {
    fn to_result(&self) -> Result<T, PoolError> {
        match self {
            Self::Completed(value) => Ok(value.clone()),
            Self::Failed(failure) => Err(PoolError::TaskExecutionFailure(failure.clone())),
            Self::Cancelled => Err(PoolError::Cancelled),
        }
    }
}

struct Slot<T> {
    state: TaskState,
    outcome: Option<Outcome<T>>,
    /// Bumped by `interrupt`; waiters that saw an older value give up.
    wake_epoch: u64,
}

/// Shared cell behind a task and all of its handles.
pub(crate) struct TaskCell<T> {
    id: TaskId,
    slot: Mutex<Slot<T>>,
    ready: Condvar,
    interrupt: Arc<AtomicBool>,
}

impl<T> TaskCell<T> {
    pub(crate) fn new(id: TaskId) -> Arc<Self> {
        Arc::new(Self {
            id,
            slot: Mutex::new(Slot {
                state: TaskState::Queued,
                outcome: None,
                wake_epoch: 0,
            }),
            ready: Condvar::new(),
            interrupt: Arc::new(AtomicBool::new(false)),
        })
    }

    pub(crate) const fn id(&self) -> TaskId {
        self.id
    }

    pub(crate) fn interrupt_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.interrupt)
    }

    pub(crate) fn state(&self) -> TaskState {
        self.slot.lock().state
    }

    pub(crate) fn is_terminal(&self) -> bool {
        self.state().is_terminal()
    }

    /// `Queued → Running`. Returns `false` if the task was cancelled first.
    pub(crate) fn begin(&self) -> bool {
        let mut slot = self.slot.lock();
        if slot.state == TaskState::Queued {
            slot.state = TaskState::Running;
            true
        } else {
            false
        }
    }

    /// Store the terminal outcome and wake every reader. The first outcome wins.
    pub(crate) fn resolve(&self, outcome: Outcome<T>) -> bool {
        let mut slot = self.slot.lock();
        if slot.state.is_terminal() {
            return false;
        }
        slot.state = outcome.state();
        slot.outcome = Some(outcome);
        self.ready.notify_all();
        true
    }

    /// Cancel a queued task; a running one only gets its interrupt flag raised.
    pub(crate) fn cancel(&self) -> bool {
        let mut slot = self.slot.lock();
        match slot.state {
            TaskState::Queued => {
                self.interrupt.store(true, Ordering::Release);
                slot.state = TaskState::Cancelled;
                slot.outcome = Some(Outcome::Cancelled);
                self.ready.notify_all();
                true
            }
            TaskState::Running => {
                self.interrupt.store(true, Ordering::Release);
                false
            }
            _ => false,
        }
    }

    fn interrupt_waiters(&self) {
        let mut slot = self.slot.lock();
        slot.wake_epoch = slot.wake_epoch.wrapping_add(1);
        self.ready.notify_all();
    }
}

/// Handle to the eventual outcome of one task.
///
/// Cloning is cheap; all clones observe the same cell.
pub struct ResultHandle<T> {
    cell: Arc<TaskCell<T>>,
}

impl<T> Clone for ResultHandle<T> {
    fn clone(&self) -> Self {
        Self {
            cell: Arc::clone(&self.cell),
        }
    }
}

impl<T> fmt::Debug for ResultHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResultHandle")
            .field("task_id", &self.cell.id)
            .field("state", &self.cell.state())
            .finish()
    }
}

impl<T> ResultHandle<T> {
    pub(crate) fn from_cell(cell: Arc<TaskCell<T>>) -> Self {
        Self { cell }
    }

    /// Identifier of the bound task.
    #[must_use]
    pub fn task_id(&self) -> TaskId {
        self.cell.id()
    }

    /// Current lifecycle state of the bound task.
    #[must_use]
    pub fn state(&self) -> TaskState {
        self.cell.state()
    }

    /// Whether the task has reached a terminal state.
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.cell.is_terminal()
    }

    /// Whether the task ended as cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cell.state() == TaskState::Cancelled
    }

    /// Cancel the task.
    ///
    /// A queued task becomes `Cancelled` and will never run; returns `true`.
    /// A running task only receives an interrupt signal (see
    /// [`is_interrupted`](crate::core::is_interrupted)) and finishes on its
    /// own; returns `false`. Finished tasks are left untouched.
    pub fn cancel(&self) -> bool {
        self.cell.cancel()
    }

    /// Wake every reader currently blocked on this handle with
    /// [`PoolError::InterruptedWait`]. The task itself is not affected.
    pub fn interrupt(&self) {
        self.cell.interrupt_waiters();
    }
}

impl<T: Clone> ResultHandle<T> {
    /// Block until the task finishes and return its outcome.
    ///
    /// # Errors
    ///
    /// - `PoolError::TaskExecutionFailure` if the operation failed or panicked
    /// - `PoolError::Cancelled` if the task was cancelled or discarded
    /// - `PoolError::InterruptedWait` if [`interrupt`](Self::interrupt) was
    ///   called while this reader was waiting
    pub fn get(&self) -> Result<T, PoolError> {
        let mut slot = self.cell.slot.lock();
        let epoch = slot.wake_epoch;
        loop {
            if let Some(outcome) = slot.outcome.as_ref() {
                return outcome.to_result();
            }
            if slot.wake_epoch != epoch {
                return Err(PoolError::InterruptedWait);
            }
            self.cell.ready.wait(&mut slot);
        }
    }

    /// Like [`get`](Self::get), giving up after `timeout`.
    ///
    /// # Errors
    ///
    /// Same as [`get`](Self::get), plus `PoolError::Timeout` on expiry.
    pub fn get_timeout(&self, timeout: Duration) -> Result<T, PoolError> {
        // A deadline past what `Instant` can hold means no deadline at all.
        let Some(deadline) = Instant::now().checked_add(timeout) else {
            return self.get();
        };
        let mut slot = self.cell.slot.lock();
        let epoch = slot.wake_epoch;
        loop {
            if let Some(outcome) = slot.outcome.as_ref() {
                return outcome.to_result();
            }
            if slot.wake_epoch != epoch {
                return Err(PoolError::InterruptedWait);
            }
            if self.cell.ready.wait_until(&mut slot, deadline).timed_out() {
                return slot
                    .outcome
                    .as_ref()
                    .map_or(Err(PoolError::Timeout), Outcome::to_result);
            }
        }
    }

    /// Return the outcome if the task already finished, without blocking.
    #[must_use]
    pub fn try_get(&self) -> Option<Result<T, PoolError>> {
        self.cell.slot.lock().outcome.as_ref().map(Outcome::to_result)
    }
}

#[cfg(feature = "tokio-runtime")]
impl<T: Clone + Send + 'static> ResultHandle<T> {
    /// Await the outcome from async code.
    ///
    /// The blocking wait runs on tokio's blocking pool so the caller's
    /// runtime stays responsive.
    ///
    /// # Errors
    ///
    /// Same as [`get`](Self::get). A wait that tokio aborts is reported as
    /// `PoolError::InterruptedWait`.
    pub async fn get_async(&self) -> Result<T, PoolError> {
        if let Some(result) = self.try_get() {
            return result;
        }
        let handle = self.clone();
        tokio::task::spawn_blocking(move || handle.get())
            .await
            .unwrap_or(Err(PoolError::InterruptedWait))
    }

    /// Await the outcome for at most `timeout`.
    ///
    /// # Errors
    ///
    /// Same as [`get_timeout`](Self::get_timeout).
    pub async fn get_async_timeout(&self, timeout: Duration) -> Result<T, PoolError> {
        if let Some(result) = self.try_get() {
            return result;
        }
        let handle = self.clone();
        tokio::task::spawn_blocking(move || handle.get_timeout(timeout))
            .await
            .unwrap_or(Err(PoolError::InterruptedWait))
    }
}

type Operation<T> = Box<dyn FnOnce() -> Result<T, anyhow::Error> + Send + 'static>;

/// An operation bundled with the handle that will receive its outcome.
///
/// `run` executes the operation at most once; later calls are no-ops. A task
/// dropped without ever running resolves its handle as cancelled, so readers
/// never block on work that no longer exists.
///
/// ```
/// use prometheus_executors::core::FutureTask;
///
/// let task = FutureTask::new(|| Ok::<_, anyhow::Error>((0..100).sum::<u32>()));
/// let handle = task.handle();
/// task.run();
/// assert_eq!(handle.get().unwrap(), 4950);
/// ```
pub struct FutureTask<T> {
    operation: Mutex<Option<Operation<T>>>,
    cell: Arc<TaskCell<T>>,
}

impl<T: Send + 'static> FutureTask<T> {
    /// Wrap `operation` in a task with id `0`.
    pub fn new<F, E>(operation: F) -> Self
    where
        F: FnOnce() -> Result<T, E> + Send + 'static,
        E: Into<anyhow::Error> + 'static,
    {
        Self::with_id(0, operation)
    }

    /// Wrap `operation` in a task with an explicit id.
    pub fn with_id<F, E>(id: TaskId, operation: F) -> Self
    where
        F: FnOnce() -> Result<T, E> + Send + 'static,
        E: Into<anyhow::Error> + 'static,
    {
        let operation: Operation<T> =
            Box::new(move || -> Result<T, anyhow::Error> { operation().map_err(Into::into) });
        Self {
            operation: Mutex::new(Some(operation)),
            cell: TaskCell::new(id),
        }
    }

    /// Run the operation on the calling thread and publish its outcome.
    ///
    /// Returns `true` if this call executed the operation, `false` if it had
    /// already run or the task was cancelled.
    pub fn run(&self) -> bool {
        let Some(operation) = self.operation.lock().take() else {
            return false;
        };
        if !self.cell.begin() {
            debug!(task_id = self.cell.id(), "skipping cancelled task");
            return false;
        }

        let _scope = enter_interrupt_scope(self.cell.interrupt_flag());
        let started = Instant::now();
        debug!(task_id = self.cell.id(), "task started");

        let outcome = match run_guarded(operation) {
            Ok(value) => Outcome::Completed(value),
            Err(failure) => {
                warn!(task_id = self.cell.id(), error = %failure, "task failed");
                Outcome::Failed(failure)
            }
        };
        debug!(
            task_id = self.cell.id(),
            elapsed = ?started.elapsed(),
            state = %outcome.state(),
            "task finished"
        );
        self.cell.resolve(outcome);
        true
    }

    /// Convert into a queue job that runs the task and reports its final state.
    pub(crate) fn into_job(self) -> Job {
        let id = self.cell.id();
        let interrupt = self.cell.interrupt_flag();
        Job::new(id, interrupt, move || {
            self.run();
            self.state()
        })
    }
}

impl<T> FutureTask<T> {
    /// A handle to this task's outcome.
    #[must_use]
    pub fn handle(&self) -> ResultHandle<T> {
        ResultHandle::from_cell(Arc::clone(&self.cell))
    }

    /// Identifier of this task.
    #[must_use]
    pub fn id(&self) -> TaskId {
        self.cell.id()
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> TaskState {
        self.cell.state()
    }

    /// Whether the task has reached a terminal state.
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.cell.is_terminal()
    }

    /// Cancel the task; see [`ResultHandle::cancel`].
    pub fn cancel(&self) -> bool {
        self.cell.cancel()
    }
}

impl<T> fmt::Debug for FutureTask<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FutureTask")
            .field("task_id", &self.cell.id)
            .field("state", &self.cell.state())
            .finish()
    }
}

impl<T> Drop for FutureTask<T> {
    fn drop(&mut self) {
        if self.cell.resolve(Outcome::Cancelled) {
            debug!(task_id = self.cell.id(), "task dropped before it ran");
        }
    }
}
