//! Worker pool with dedicated OS threads and a shared FIFO queue.
//!
//! A `WorkerPool` runs submitted operations on its own worker threads under one
//! of four worker-count policies (see [`PoolPolicy`]). Delayed and fixed-rate
//! work goes through a timer thread that hands due entries to the same
//! workers.
//!
//! # Design
//!
//! - **One queue**: every task travels through a single unbounded
//!   `crossbeam_channel`; workers block on `recv` and never poll.
//! - **Clean shutdown**: dropping the sender lets workers drain what is left
//!   and exit on their own.
//! - **Write-once results**: each submission returns a [`ResultHandle`] bound
//!   to that task only.
//!
//! ```
//! use prometheus_executors::core::WorkerPool;
//!
//! let pool = WorkerPool::fixed(2)?;
//! let handle = pool.submit(|| Ok::<_, anyhow::Error>(6 * 7))?;
//! assert_eq!(handle.get()?, 42);
//! pool.shutdown();
//! # Ok::<(), prometheus_executors::core::PoolError>(())
//! ```

mod worker;

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::{Condvar, Mutex, RwLock};
use serde::Serialize;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::{PoolPolicy, WorkerPoolConfig};
use crate::core::error::PoolError;
use crate::core::handle::{FutureTask, ResultHandle, TaskCell};
use crate::core::task::{Job, TaskId, TaskState};
use crate::core::timer::{Dispatch, Timer};
use crate::runtime::{Spawn, ThreadSpawner};
use crate::util::clock::{Clock, SystemClock};

/// Statistics about pool utilization.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    /// Live worker threads.
    pub worker_count: usize,
    /// Most worker threads ever alive at once.
    pub largest_worker_count: usize,
    /// Tasks currently executing.
    pub active_tasks: u64,
    /// Tasks waiting in the queue.
    pub queued_tasks: u64,
    /// Timer entries waiting for their deadline.
    pub scheduled_tasks: usize,
    /// Tasks accepted by `execute`, `submit` and `schedule*`.
    pub submitted: u64,
    /// Task runs that finished normally.
    pub completed: u64,
    /// Task runs that returned an error or panicked.
    pub failed: u64,
    /// Tasks cancelled or discarded before running.
    pub cancelled: u64,
}

/// Internal counters for pool statistics.
#[derive(Debug, Default)]
struct PoolCounters {
    workers: AtomicUsize,
    largest_workers: AtomicUsize,
    active: AtomicU64,
    queued: AtomicU64,
    submitted: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    cancelled: AtomicU64,
}

impl PoolCounters {
    fn snapshot(&self, scheduled_tasks: usize) -> PoolStats {
        PoolStats {
            worker_count: self.workers.load(Ordering::Relaxed),
            largest_worker_count: self.largest_workers.load(Ordering::Relaxed),
            active_tasks: self.active.load(Ordering::Relaxed),
            queued_tasks: self.queued.load(Ordering::Relaxed),
            scheduled_tasks,
            submitted: self.submitted.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            cancelled: self.cancelled.load(Ordering::Relaxed),
        }
    }

    fn record(&self, state: TaskState) {
        let counter = match state {
            TaskState::Completed => &self.completed,
            TaskState::Failed => &self.failed,
            TaskState::Cancelled => &self.cancelled,
            TaskState::Queued | TaskState::Running => return,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn worker_started(&self) {
        let live = self.workers.fetch_add(1, Ordering::AcqRel) + 1;
        self.largest_workers.fetch_max(live, Ordering::AcqRel);
    }

    fn worker_exited(&self) {
        self.workers.fetch_sub(1, Ordering::AcqRel);
    }
}

#[derive(Debug, Default)]
struct TerminationState {
    live_threads: usize,
    queue_closed: bool,
}

impl TerminationState {
    const fn is_terminated(&self) -> bool {
        self.queue_closed && self.live_threads == 0
    }
}

/// Tracks pool threads so callers can wait for all of them to exit.
#[derive(Debug, Default)]
struct Termination {
    state: Mutex<TerminationState>,
    done: Condvar,
}

impl Termination {
    fn thread_started(&self) {
        self.state.lock().live_threads += 1;
    }

    fn thread_exited(&self) {
        let mut state = self.state.lock();
        state.live_threads = state.live_threads.saturating_sub(1);
        if state.is_terminated() {
            self.done.notify_all();
        }
    }

    fn mark_closed(&self) {
        let mut state = self.state.lock();
        state.queue_closed = true;
        if state.is_terminated() {
            self.done.notify_all();
        }
    }

    fn is_terminated(&self) -> bool {
        self.state.lock().is_terminated()
    }

    fn wait(&self, timeout: Duration) -> bool {
        let deadline = Instant::now().checked_add(timeout);
        let mut state = self.state.lock();
        while !state.is_terminated() {
            match deadline {
                Some(deadline) => {
                    if self.done.wait_until(&mut state, deadline).timed_out() {
                        return state.is_terminated();
                    }
                }
                None => self.done.wait(&mut state),
            }
        }
        true
    }
}

/// State shared by the pool handle, its workers, and its timer.
struct PoolShared {
    id: Uuid,
    config: WorkerPoolConfig,
    clock: Arc<dyn Clock>,
    spawner: Arc<dyn Spawn>,
    /// `None` once the queue is closed; workers then drain and exit.
    task_tx: RwLock<Option<Sender<Job>>>,
    task_rx: Receiver<Job>,
    accepting: AtomicBool,
    stopping: AtomicBool,
    timer: Mutex<Option<Arc<Timer>>>,
    /// Interrupt flag of the task each worker is running, by worker id.
    running: RwLock<HashMap<usize, Arc<AtomicBool>>>,
    counters: PoolCounters,
    /// Cached workers waiting for work, minus claims already handed to them.
    idle_workers: AtomicUsize,
    next_task_id: AtomicU64,
    next_worker_id: AtomicUsize,
    termination: Termination,
}

impl PoolShared {
    fn next_task_id(&self) -> TaskId {
        self.next_task_id.fetch_add(1, Ordering::Relaxed)
    }

    fn ensure_accepting(&self) -> Result<(), PoolError> {
        if self.accepting.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(PoolError::PoolClosed)
        }
    }

    /// Reserve one idle cached worker for a task about to be queued.
    fn try_claim_idle(&self) -> bool {
        self.idle_workers
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |idle| idle.checked_sub(1))
            .is_ok()
    }

    /// Queue `job`, growing a cached pool when no idle worker can take it.
    /// A rejected job is dropped, which cancels its handle.
    fn hand_off(self: &Arc<Self>, job: Job) -> Result<(), PoolError> {
        let task_tx = self.task_tx.read();
        let Some(sender) = task_tx.as_ref() else {
            return Err(PoolError::PoolClosed);
        };

        if self.config.policy.is_cached() && !self.try_claim_idle() {
            return self.spawn_worker(Some(job));
        }

        self.counters.queued.fetch_add(1, Ordering::Relaxed);
        sender.send(job).map_err(|_| {
            self.counters.queued.fetch_sub(1, Ordering::Relaxed);
            PoolError::PoolClosed
        })
    }

    fn spawn_worker(self: &Arc<Self>, first: Option<Job>) -> Result<(), PoolError> {
        let worker_id = self.next_worker_id.fetch_add(1, Ordering::Relaxed);
        let name = format!("{}-{worker_id}", self.config.thread_name_prefix);

        self.termination.thread_started();
        self.counters.worker_started();

        let shared = Arc::clone(self);
        let body = Box::new(move || worker::run(&shared, worker_id, first));
        if let Err(e) = self.spawner.spawn(name, body) {
            self.counters.worker_exited();
            self.termination.thread_exited();
            error!(pool_id = %self.id, worker_id, error = %e, "failed to spawn worker thread");
            return Err(PoolError::Spawn(e.to_string()));
        }
        Ok(())
    }

    fn start_timer(self: &Arc<Self>) -> Result<Timer, PoolError> {
        self.termination.thread_started();
        let name = format!("{}-timer", self.config.thread_name_prefix);
        Timer::start(
            name,
            Arc::clone(&self.clock),
            self.spawner.as_ref(),
            self.config.shutdown,
            Arc::clone(self),
        )
        .inspect_err(|e| {
            self.termination.thread_exited();
            error!(pool_id = %self.id, error = %e, "failed to start timer thread");
        })
    }

    /// Run `f` against the timer, starting it on first use.
    fn with_timer<R>(
        self: &Arc<Self>,
        f: impl FnOnce(&Timer) -> Result<R, PoolError>,
    ) -> Result<R, PoolError> {
        let mut slot = self.timer.lock();
        self.ensure_accepting()?;
        let timer = match slot.as_ref() {
            Some(timer) => Arc::clone(timer),
            None => {
                let timer = Arc::new(self.start_timer()?);
                *slot = Some(Arc::clone(&timer));
                timer
            }
        };
        f(&timer)
    }

    fn timer(&self) -> Option<Arc<Timer>> {
        self.timer.lock().clone()
    }

    fn close_queue(&self) {
        if self.task_tx.write().take().is_some() {
            debug!(pool_id = %self.id, "task queue closed");
            self.termination.mark_closed();
        }
    }

    /// Execute one job on the calling worker.
    fn run_job(&self, worker_id: usize, job: Job) {
        if self.stopping.load(Ordering::Acquire) {
            debug!(pool_id = %self.id, worker_id, task_id = job.id, "discarding task after shutdown_now");
            drop(job);
            self.counters.record(TaskState::Cancelled);
            return;
        }

        let interrupt = Arc::clone(&job.interrupt);
        self.running.write().insert(worker_id, Arc::clone(&interrupt));
        if self.stopping.load(Ordering::Acquire) {
            interrupt.store(true, Ordering::Release);
        }

        self.counters.active.fetch_add(1, Ordering::Relaxed);
        let state = {
            let _scope = crate::core::task::enter_interrupt_scope(interrupt);
            job.run()
        };
        self.counters.active.fetch_sub(1, Ordering::Relaxed);

        self.running.write().remove(&worker_id);
        self.counters.record(state);
    }
}

impl Dispatch for Arc<PoolShared> {
    fn dispatch(&self, job: Job) -> Result<(), PoolError> {
        self.hand_off(job)
    }

    fn timer_exited(&self) {
        self.close_queue();
        self.termination.thread_exited();
    }
}

/// A pool of worker threads executing submitted tasks.
///
/// All methods take `&self`; share a pool across threads with `Arc`.
/// Dropping the pool calls [`shutdown`](Self::shutdown), so queued work still
/// runs to completion on the detached workers.
pub struct WorkerPool {
    shared: Arc<PoolShared>,
}

impl WorkerPool {
    /// Create a pool driven by the system clock.
    ///
    /// # Errors
    ///
    /// - `PoolError::InvalidConfig` if the configuration is invalid
    /// - `PoolError::Spawn` if a worker or timer thread cannot be created
    pub fn new(config: WorkerPoolConfig) -> Result<Self, PoolError> {
        Self::with_clock(config, Arc::new(SystemClock::new()))
    }

    /// Create a pool whose timer reads time from `clock`.
    ///
    /// # Errors
    ///
    /// Same as [`new`](Self::new).
    pub fn with_clock(config: WorkerPoolConfig, clock: Arc<dyn Clock>) -> Result<Self, PoolError> {
        let spawner = Arc::new(ThreadSpawner::new(config.thread_stack_size));
        Self::from_parts(config, clock, spawner)
    }

    /// Create a pool from explicit clock and thread spawner.
    ///
    /// # Errors
    ///
    /// Same as [`new`](Self::new).
    pub fn from_parts(
        config: WorkerPoolConfig,
        clock: Arc<dyn Clock>,
        spawner: Arc<dyn Spawn>,
    ) -> Result<Self, PoolError> {
        config.validate().map_err(PoolError::InvalidConfig)?;

        let (task_tx, task_rx) = unbounded();
        let shared = Arc::new(PoolShared {
            id: Uuid::new_v4(),
            config,
            clock,
            spawner,
            task_tx: RwLock::new(Some(task_tx)),
            task_rx,
            accepting: AtomicBool::new(true),
            stopping: AtomicBool::new(false),
            timer: Mutex::new(None),
            running: RwLock::new(HashMap::new()),
            counters: PoolCounters::default(),
            idle_workers: AtomicUsize::new(0),
            next_task_id: AtomicU64::new(1),
            next_worker_id: AtomicUsize::new(0),
            termination: Termination::default(),
        });

        let core_workers = shared.config.policy.core_workers();
        let started = (0..core_workers)
            .try_for_each(|_| shared.spawn_worker(None))
            .and_then(|()| {
                if shared.config.policy.is_scheduled() {
                    shared.with_timer(|_| Ok(()))
                } else {
                    Ok(())
                }
            });
        if let Err(e) = started {
            shared.accepting.store(false, Ordering::Release);
            shared.close_queue();
            return Err(e);
        }

        info!(
            pool_id = %shared.id,
            policy = shared.config.policy.name(),
            core_workers,
            "worker pool started"
        );
        Ok(Self { shared })
    }

    /// Pool with exactly `workers` threads.
    ///
    /// # Errors
    ///
    /// Same as [`new`](Self::new).
    pub fn fixed(workers: usize) -> Result<Self, PoolError> {
        Self::new(WorkerPoolConfig::fixed(workers))
    }

    /// Pool that grows on demand and retires idle workers after 60 seconds.
    ///
    /// # Errors
    ///
    /// Same as [`new`](Self::new).
    pub fn cached() -> Result<Self, PoolError> {
        Self::new(WorkerPoolConfig::cached())
    }

    /// Pool with one worker running tasks in submission order.
    ///
    /// # Errors
    ///
    /// Same as [`new`](Self::new).
    pub fn single() -> Result<Self, PoolError> {
        Self::new(WorkerPoolConfig::single())
    }

    /// Pool with `workers` threads and a timer started up front.
    ///
    /// # Errors
    ///
    /// Same as [`new`](Self::new).
    pub fn scheduled(workers: usize) -> Result<Self, PoolError> {
        Self::new(WorkerPoolConfig::scheduled(workers))
    }

    /// Unique id of this pool, used in log fields.
    #[must_use]
    pub fn id(&self) -> Uuid {
        self.shared.id
    }

    /// Worker-count policy of this pool.
    #[must_use]
    pub fn policy(&self) -> PoolPolicy {
        self.shared.config.policy
    }

    /// Run `operation` without a result handle.
    ///
    /// A panic inside `operation` is caught and logged; the worker survives.
    ///
    /// # Errors
    ///
    /// - `PoolError::PoolClosed` if the pool has been shut down
    /// - `PoolError::Spawn` if a cached pool could not grow a worker
    pub fn execute<F>(&self, operation: F) -> Result<(), PoolError>
    where
        F: FnOnce() + Send + 'static,
    {
        self.shared.ensure_accepting()?;
        let id = self.shared.next_task_id();
        self.shared.hand_off(Job::detached(id, operation))?;
        self.shared.counters.submitted.fetch_add(1, Ordering::Relaxed);
        debug!(pool_id = %self.shared.id, task_id = id, "task executed");
        Ok(())
    }

    /// Queue `operation` and return a handle to its result.
    ///
    /// Never blocks the caller.
    ///
    /// # Errors
    ///
    /// Same as [`execute`](Self::execute).
    pub fn submit<T, F, E>(&self, operation: F) -> Result<ResultHandle<T>, PoolError>
    where
        T: Send + 'static,
        F: FnOnce() -> Result<T, E> + Send + 'static,
        E: Into<anyhow::Error> + 'static,
    {
        self.shared.ensure_accepting()?;
        self.submit_task(FutureTask::with_id(self.shared.next_task_id(), operation))
    }

    /// Queue a task built by the caller and return its handle.
    ///
    /// # Errors
    ///
    /// Same as [`execute`](Self::execute). On error the task is dropped and
    /// its handle resolves as cancelled.
    pub fn submit_task<T: Send + 'static>(
        &self,
        task: FutureTask<T>,
    ) -> Result<ResultHandle<T>, PoolError> {
        self.shared.ensure_accepting()?;
        let handle = task.handle();
        let task_id = task.id();
        self.shared.hand_off(task.into_job())?;
        self.shared.counters.submitted.fetch_add(1, Ordering::Relaxed);
        debug!(pool_id = %self.shared.id, task_id, "task submitted");
        Ok(handle)
    }

    /// Queue an async operation.
    ///
    /// `make_future` is called on the worker and the future is driven to
    /// completion on that worker's own single-threaded tokio runtime, so it
    /// does not need to be `Send`.
    ///
    /// # Errors
    ///
    /// Same as [`execute`](Self::execute).
    #[cfg(feature = "tokio-runtime")]
    pub fn submit_async<T, F, Fut, E>(&self, make_future: F) -> Result<ResultHandle<T>, PoolError>
    where
        T: Send + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: std::future::Future<Output = Result<T, E>>,
        E: Into<anyhow::Error> + 'static,
    {
        self.submit(move || -> anyhow::Result<T> {
            crate::runtime::worker_runtime::block_on(make_future())?.map_err(Into::into)
        })
    }

    /// Run `operation` once, no earlier than `delay` from now.
    ///
    /// # Errors
    ///
    /// - `PoolError::PoolClosed` if the pool has been shut down
    /// - `PoolError::Spawn` if the timer thread could not be started
    pub fn schedule<T, F, E>(&self, operation: F, delay: Duration) -> Result<ResultHandle<T>, PoolError>
    where
        T: Send + 'static,
        F: FnOnce() -> Result<T, E> + Send + 'static,
        E: Into<anyhow::Error> + 'static,
    {
        let task = FutureTask::with_id(self.shared.next_task_id(), operation);
        let handle = task.handle();
        let task_id = task.id();
        self.shared
            .with_timer(|timer| timer.schedule_once(task.into_job(), delay))?;
        self.shared.counters.submitted.fetch_add(1, Ordering::Relaxed);
        debug!(pool_id = %self.shared.id, task_id, ?delay, "task scheduled");
        Ok(handle)
    }

    /// Run `operation` at `initial_delay`, `initial_delay + period`, and so on.
    ///
    /// A run is only started after the previous one finished. If a run
    /// overruns its period, the next one starts immediately; no run is ever
    /// skipped. The returned handle resolves as cancelled when the task is
    /// cancelled or discarded by shutdown, and as failed when a run fails,
    /// which also stops the repetition.
    ///
    /// Cancelling the handle stops all future runs; a run already in progress
    /// is allowed to finish with its interrupt flag raised.
    ///
    /// # Errors
    ///
    /// - `PoolError::InvalidConfig` if `period` is zero
    /// - otherwise the same as [`schedule`](Self::schedule)
    pub fn schedule_at_fixed_rate<F, E>(
        &self,
        mut operation: F,
        initial_delay: Duration,
        period: Duration,
    ) -> Result<ResultHandle<()>, PoolError>
    where
        F: FnMut() -> Result<(), E> + Send + 'static,
        E: Into<anyhow::Error> + 'static,
    {
        if period.is_zero() {
            return Err(PoolError::InvalidConfig("period must be greater than 0".into()));
        }
        let cell = TaskCell::new(self.shared.next_task_id());
        let task_id = cell.id();
        self.shared.with_timer(|timer| {
            timer.schedule_at_fixed_rate(
                Arc::clone(&cell),
                Box::new(move || -> anyhow::Result<()> { operation().map_err(Into::into) }),
                initial_delay,
                period,
            )
        })?;
        self.shared.counters.submitted.fetch_add(1, Ordering::Relaxed);
        debug!(
            pool_id = %self.shared.id,
            task_id,
            ?initial_delay,
            ?period,
            "fixed-rate task scheduled"
        );
        Ok(ResultHandle::from_cell(cell))
    }

    /// Stop accepting new work and let queued tasks finish. Does not block.
    ///
    /// Delayed one-shot tasks and fixed-rate tasks are kept or cancelled
    /// according to the pool's [`ShutdownPolicy`](crate::config::ShutdownPolicy).
    pub fn shutdown(&self) {
        if !self.shared.accepting.swap(false, Ordering::AcqRel) {
            return;
        }
        info!(pool_id = %self.shared.id, "shutting down worker pool");

        match self.shared.timer() {
            Some(timer) => {
                let discarded = timer.shutdown();
                self.shared
                    .counters
                    .cancelled
                    .fetch_add(discarded as u64, Ordering::Relaxed);
                if discarded > 0 {
                    debug!(pool_id = %self.shared.id, discarded, "timer entries dropped on shutdown");
                }
            }
            None => self.shared.close_queue(),
        }
    }

    /// Stop immediately: discard queued and scheduled tasks and interrupt
    /// running ones.
    ///
    /// Running tasks only have their interrupt flag raised (see
    /// [`is_interrupted`](crate::core::is_interrupted)). Returns the ids of
    /// every discarded task; their handles resolve as cancelled.
    pub fn shutdown_now(&self) -> Vec<TaskId> {
        self.shared.accepting.store(false, Ordering::Release);
        self.shared.stopping.store(true, Ordering::Release);

        let mut discarded = self.shared.timer().map(|timer| timer.stop()).unwrap_or_default();
        self.shared.close_queue();
        for job in self.shared.task_rx.try_iter() {
            self.shared.counters.queued.fetch_sub(1, Ordering::Relaxed);
            discarded.push(job.id);
        }
        self.shared
            .counters
            .cancelled
            .fetch_add(discarded.len() as u64, Ordering::Relaxed);

        let running = self.shared.running.read();
        for flag in running.values() {
            flag.store(true, Ordering::Release);
        }
        warn!(
            pool_id = %self.shared.id,
            discarded = discarded.len(),
            interrupted = running.len(),
            "worker pool stopped"
        );
        discarded
    }

    /// Block until every pool thread has exited, or `timeout` passes.
    ///
    /// Returns `true` if the pool terminated.
    #[must_use]
    pub fn await_termination(&self, timeout: Duration) -> bool {
        self.shared.termination.wait(timeout)
    }

    /// Whether `shutdown` or `shutdown_now` has been called.
    #[must_use]
    pub fn is_shutdown(&self) -> bool {
        !self.shared.accepting.load(Ordering::Acquire)
    }

    /// Whether the pool is shut down and all of its threads have exited.
    #[must_use]
    pub fn is_terminated(&self) -> bool {
        self.shared.termination.is_terminated()
    }

    /// Snapshot of the pool's counters.
    #[must_use]
    pub fn stats(&self) -> PoolStats {
        let scheduled = self.shared.timer().map_or(0, |timer| timer.pending());
        self.shared.counters.snapshot(scheduled)
    }
}

impl fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerPool")
            .field("id", &self.shared.id)
            .field("policy", &self.shared.config.policy)
            .field("shutdown", &self.is_shutdown())
            .finish_non_exhaustive()
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}
