//! Timer thread for delayed and fixed-rate tasks.
//!
//! Entries wait in a min-heap ordered by deadline. A single thread parks on a
//! `Condvar` until the earliest deadline (as reported by the pool's
//! [`Clock`]) and hands ready entries to the worker set through [`Dispatch`].
//!
//! Fixed-rate entries are re-armed only after a run completes, at
//! `initial_delay + n * period` from the moment they were scheduled. A late
//! target fires immediately, so overruns compress consecutive runs instead of
//! skipping them or letting them overlap.

use std::cmp::Ordering as CmpOrdering;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex, MutexGuard};
use tracing::{debug, warn};

use super::error::PoolError;
use super::handle::{Outcome, TaskCell};
use super::task::{run_guarded, Job, TaskId, TaskState};
use crate::config::ShutdownPolicy;
use crate::runtime::Spawn;
use crate::util::clock::Clock;

/// Where the timer sends entries whose deadline has passed.
pub(crate) trait Dispatch: Send + Sync + 'static {
    /// Hand a ready job to the workers.
    fn dispatch(&self, job: Job) -> Result<(), PoolError>;
    /// Called once when the timer thread exits.
    fn timer_exited(&self);
}

pub(crate) type PeriodicOp = Box<dyn FnMut() -> Result<(), anyhow::Error> + Send + 'static>;

/// A fixed-rate entry shared between the heap and its in-flight run.
pub(crate) struct Periodic {
    id: TaskId,
    operation: Mutex<PeriodicOp>,
    cell: Arc<TaskCell<()>>,
    origin: Duration,
    initial_delay: Duration,
    period: Duration,
    runs: AtomicU64,
}

impl Periodic {
    /// Target start of run `n` (zero based).
    fn target(&self, n: u64) -> Duration {
        let n = u32::try_from(n).unwrap_or(u32::MAX);
        self.origin
            .saturating_add(self.initial_delay)
            .saturating_add(self.period.saturating_mul(n))
    }
}

enum EntryKind {
    Once(Job),
    Periodic(Arc<Periodic>),
}

struct Entry {
    deadline: Duration,
    seq: u64,
    kind: EntryKind,
}

impl Entry {
    fn id(&self) -> TaskId {
        match &self.kind {
            EntryKind::Once(job) => job.id,
            EntryKind::Periodic(periodic) => periodic.id,
        }
    }

    /// Whether the task behind this entry was cancelled while it waited.
    fn is_cancelled(&self) -> bool {
        match &self.kind {
            EntryKind::Once(job) => job.interrupt.load(Ordering::Acquire),
            EntryKind::Periodic(periodic) => periodic.cell.is_terminal(),
        }
    }

    fn survives_shutdown(&self, policy: ShutdownPolicy) -> bool {
        match self.kind {
            EntryKind::Once(_) => policy.run_delayed_after_shutdown,
            EntryKind::Periodic(_) => policy.continue_periodic_after_shutdown,
        }
    }

    /// Discard the entry; its handle resolves as cancelled.
    fn cancel(self) {
        match self.kind {
            // Dropping the job drops its task, which cancels the handle.
            EntryKind::Once(job) => drop(job),
            EntryKind::Periodic(periodic) => {
                periodic.cell.resolve(Outcome::Cancelled);
            }
        }
    }
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.seq == other.seq
    }
}

impl Eq for Entry {}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for Entry {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        // Reversed for a min-heap: earliest deadline first, then FIFO.
        other
            .deadline
            .cmp(&self.deadline)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TimerMode {
    Running,
    /// Shutdown requested; keeps firing surviving entries, then exits.
    Draining,
    Stopped,
}

struct TimerState {
    entries: BinaryHeap<Entry>,
    next_seq: u64,
    /// Periodic runs handed to workers and not yet settled.
    in_flight: usize,
    mode: TimerMode,
    policy: ShutdownPolicy,
}

impl TimerState {
    fn should_exit(&self) -> bool {
        match self.mode {
            TimerMode::Running => false,
            TimerMode::Draining => self.entries.is_empty() && self.in_flight == 0,
            TimerMode::Stopped => true,
        }
    }

    fn push(&mut self, deadline: Duration, kind: EntryKind) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.entries.push(Entry {
            deadline,
            seq,
            kind,
        });
    }
}

struct TimerShared {
    state: Mutex<TimerState>,
    wake: Condvar,
    clock: Arc<dyn Clock>,
}

impl TimerShared {
    /// Called once per periodic run, whether or not the run executed.
    fn settle(&self, periodic: &Arc<Periodic>, next: Option<Duration>) {
        let mut state = self.state.lock();
        state.in_flight = state.in_flight.saturating_sub(1);

        let rearm = next.filter(|_| {
            !periodic.cell.is_terminal()
                && match state.mode {
                    TimerMode::Running => true,
                    TimerMode::Draining => state.policy.continue_periodic_after_shutdown,
                    TimerMode::Stopped => false,
                }
        });
        match rearm {
            Some(deadline) => state.push(deadline, EntryKind::Periodic(Arc::clone(periodic))),
            None => {
                periodic.cell.resolve(Outcome::Cancelled);
            }
        }
        self.wake.notify_one();
    }
}

/// One execution of a fixed-rate entry. Dropping it settles the entry.
struct PeriodicRun {
    timer: Arc<TimerShared>,
    periodic: Arc<Periodic>,
    next: Option<Duration>,
}

impl PeriodicRun {
    fn execute(mut self) -> TaskState {
        let periodic = Arc::clone(&self.periodic);
        if periodic.cell.is_terminal() {
            return TaskState::Cancelled;
        }

        let started = Instant::now();
        let result = {
            let mut operation = periodic.operation.lock();
            run_guarded(|| (*operation)())
        };
        let completed = periodic.runs.fetch_add(1, Ordering::AcqRel) + 1;

        match result {
            Ok(()) => {
                debug!(
                    task_id = periodic.id,
                    run = completed,
                    elapsed = ?started.elapsed(),
                    "periodic run finished"
                );
                self.next = Some(periodic.target(completed));
                TaskState::Completed
            }
            Err(failure) => {
                warn!(
                    task_id = periodic.id,
                    run = completed,
                    error = %failure,
                    "periodic task failed, cancelling further runs"
                );
                periodic.cell.resolve(Outcome::Failed(failure));
                TaskState::Failed
            }
        }
    }
}

impl Drop for PeriodicRun {
    fn drop(&mut self) {
        self.timer.settle(&self.periodic, self.next.take());
    }
}

/// Handle to a running timer thread.
pub(crate) struct Timer {
    shared: Arc<TimerShared>,
}

impl Timer {
    /// Spawn the timer thread.
    pub(crate) fn start<D: Dispatch>(
        name: String,
        clock: Arc<dyn Clock>,
        spawner: &dyn Spawn,
        policy: ShutdownPolicy,
        target: D,
    ) -> Result<Self, PoolError> {
        let shared = Arc::new(TimerShared {
            state: Mutex::new(TimerState {
                entries: BinaryHeap::new(),
                next_seq: 0,
                in_flight: 0,
                mode: TimerMode::Running,
                policy,
            }),
            wake: Condvar::new(),
            clock: Arc::clone(&clock),
        });

        let weak: Weak<TimerShared> = Arc::downgrade(&shared);
        clock.on_advance(Arc::new(move || {
            if let Some(shared) = weak.upgrade() {
                let _state = shared.state.lock();
                shared.wake.notify_all();
            }
        }));

        let thread_shared = Arc::clone(&shared);
        spawner
            .spawn(name, Box::new(move || run_timer(&thread_shared, &target)))
            .map_err(|e| PoolError::Spawn(e.to_string()))?;

        Ok(Self { shared })
    }

    /// Run `job` once, no earlier than `delay` from now.
    pub(crate) fn schedule_once(&self, job: Job, delay: Duration) -> Result<(), PoolError> {
        let deadline = self.shared.clock.now().saturating_add(delay);
        self.push(deadline, EntryKind::Once(job))
    }

    /// Run `operation` at `initial_delay + n * period` until cancelled or failed.
    pub(crate) fn schedule_at_fixed_rate(
        &self,
        cell: Arc<TaskCell<()>>,
        operation: PeriodicOp,
        initial_delay: Duration,
        period: Duration,
    ) -> Result<(), PoolError> {
        let periodic = Arc::new(Periodic {
            id: cell.id(),
            operation: Mutex::new(operation),
            cell,
            origin: self.shared.clock.now(),
            initial_delay,
            period,
            runs: AtomicU64::new(0),
        });
        let first = periodic.target(0);
        self.push(first, EntryKind::Periodic(periodic))
    }

    fn push(&self, deadline: Duration, kind: EntryKind) -> Result<(), PoolError> {
        let mut state = self.shared.state.lock();
        if state.mode != TimerMode::Running {
            drop(state);
            Entry {
                deadline,
                seq: 0,
                kind,
            }
            .cancel();
            return Err(PoolError::PoolClosed);
        }
        state.push(deadline, kind);
        self.shared.wake.notify_one();
        Ok(())
    }

    /// Begin draining: drop cancelled entries and those the policy does not
    /// keep after shutdown. Returns how many entries were discarded.
    pub(crate) fn shutdown(&self) -> usize {
        let mut state = self.shared.state.lock();
        if state.mode != TimerMode::Running {
            return 0;
        }
        state.mode = TimerMode::Draining;
        let policy = state.policy;
        let (kept, dropped): (Vec<Entry>, Vec<Entry>) = std::mem::take(&mut state.entries)
            .into_iter()
            .partition(|entry| !entry.is_cancelled() && entry.survives_shutdown(policy));
        state.entries = BinaryHeap::from(kept);
        self.shared.wake.notify_all();
        drop(state);

        let discarded = dropped.len();
        for entry in dropped {
            entry.cancel();
        }
        discarded
    }

    /// Stop immediately, cancelling every pending entry. Returns their ids.
    pub(crate) fn stop(&self) -> Vec<TaskId> {
        let mut state = self.shared.state.lock();
        state.mode = TimerMode::Stopped;
        let entries = std::mem::take(&mut state.entries);
        self.shared.wake.notify_all();
        drop(state);

        entries
            .into_iter()
            .map(|entry| {
                let id = entry.id();
                entry.cancel();
                id
            })
            .collect()
    }

    /// Entries waiting for their deadline.
    pub(crate) fn pending(&self) -> usize {
        self.shared.state.lock().entries.len()
    }
}

fn run_timer<D: Dispatch>(shared: &Arc<TimerShared>, target: &D) {
    debug!("timer thread started");
    let mut state = shared.state.lock();
    while !state.should_exit() {
        let now = shared.clock.now();
        match state.entries.peek().map(|entry| entry.deadline) {
            Some(_)
                if state.mode == TimerMode::Draining
                    && state.entries.iter().any(Entry::is_cancelled) =>
            {
                state.entries.retain(|entry| !entry.is_cancelled());
            }
            Some(deadline) if deadline <= now => {
                let Some(entry) = state.entries.pop() else {
                    continue;
                };
                let job = match entry.kind {
                    EntryKind::Once(job) => job,
                    EntryKind::Periodic(periodic) => {
                        if periodic.cell.is_terminal() {
                            continue;
                        }
                        state.in_flight += 1;
                        periodic_job(shared, periodic)
                    }
                };
                fire(&mut state, target, job);
            }
            Some(deadline) => {
                let remaining = deadline - now;
                match shared.clock.park_timeout(remaining) {
                    Some(timeout) => {
                        shared.wake.wait_for(&mut state, timeout);
                    }
                    None => shared.wake.wait(&mut state),
                }
            }
            None => shared.wake.wait(&mut state),
        }
    }
    drop(state);
    debug!("timer thread exiting");
    target.timer_exited();
}

/// Dispatch outside the lock: a rejected job settles back into the timer.
fn fire<D: Dispatch>(state: &mut MutexGuard<'_, TimerState>, target: &D, job: Job) {
    let task_id = job.id;
    if let Err(err) = MutexGuard::unlocked(state, || target.dispatch(job)) {
        warn!(task_id, error = %err, "timer could not hand task to workers");
    }
}

fn periodic_job(shared: &Arc<TimerShared>, periodic: Arc<Periodic>) -> Job {
    let id = periodic.id;
    let interrupt = periodic.cell.interrupt_flag();
    let run = PeriodicRun {
        timer: Arc::clone(shared),
        periodic,
        next: None,
    };
    Job::new(id, interrupt, move || run.execute())
}
