//! Delayed and fixed-rate scheduling driven by a manual clock.
//!
//! Time only moves when a test calls `advance`/`advance_to`, so every start
//! time recorded by a task is exact.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use prometheus_executors::config::{ShutdownPolicy, WorkerPoolConfig};
use prometheus_executors::core::{PoolError, TaskState, WorkerPool};
use prometheus_executors::util::{Clock, ManualClock};

const WAIT: Duration = Duration::from_secs(5);

fn ms(value: u64) -> Duration {
    Duration::from_millis(value)
}

fn eventually(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + WAIT;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(2));
    }
    condition()
}

/// Give the timer and workers real time to act on the current clock value.
fn settle() {
    thread::sleep(Duration::from_millis(30));
}

fn scheduled_pool(workers: usize) -> (WorkerPool, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new());
    let pool = WorkerPool::with_clock(
        WorkerPoolConfig::scheduled(workers),
        Arc::clone(&clock) as Arc<dyn Clock>,
    )
    .unwrap();
    (pool, clock)
}

/// Records the clock time at the start of every run.
fn recorder(clock: &Arc<ManualClock>) -> (Arc<Mutex<Vec<Duration>>>, impl FnMut() -> anyhow::Result<()>) {
    let starts = Arc::new(Mutex::new(Vec::new()));
    let clock = Arc::clone(clock);
    let sink = Arc::clone(&starts);
    let op = move || {
        sink.lock().push(clock.now());
        Ok::<(), anyhow::Error>(())
    };
    (starts, op)
}

#[test]
fn test_schedule_runs_once_after_delay() {
    let (pool, clock) = scheduled_pool(2);
    let task_clock = Arc::clone(&clock);
    let handle = pool
        .schedule(move || Ok::<_, anyhow::Error>(task_clock.now()), ms(100))
        .unwrap();
    assert_eq!(pool.stats().scheduled_tasks, 1);

    clock.advance(ms(99));
    assert_eq!(handle.get_timeout(ms(50)), Err(PoolError::Timeout));
    assert_eq!(handle.state(), TaskState::Queued);

    clock.advance(ms(1));
    assert_eq!(handle.get_timeout(WAIT).unwrap(), ms(100));
    assert_eq!(pool.stats().scheduled_tasks, 0);
}

#[test]
fn test_delayed_tasks_fire_in_deadline_order() {
    let (pool, clock) = scheduled_pool(1);
    let order = Arc::new(Mutex::new(Vec::new()));
    let handles: Vec<_> = [(300, "c"), (100, "a"), (200, "b")]
        .into_iter()
        .map(|(delay, name)| {
            let order = Arc::clone(&order);
            pool.schedule(
                move || {
                    order.lock().push(name);
                    Ok::<_, anyhow::Error>(())
                },
                ms(delay),
            )
            .unwrap()
        })
        .collect();

    clock.advance(ms(300));
    for handle in handles {
        handle.get_timeout(WAIT).unwrap();
    }
    assert_eq!(*order.lock(), vec!["a", "b", "c"]);
}

#[test]
fn test_fixed_pool_starts_timer_on_demand() {
    let clock = Arc::new(ManualClock::new());
    let pool = WorkerPool::with_clock(
        WorkerPoolConfig::fixed(1),
        Arc::clone(&clock) as Arc<dyn Clock>,
    )
    .unwrap();
    let handle = pool.schedule(|| Ok::<_, anyhow::Error>("late"), ms(10)).unwrap();
    clock.advance(ms(10));
    assert_eq!(handle.get_timeout(WAIT).unwrap(), "late");
}

#[test]
fn test_fixed_rate_starts_on_period_boundaries() {
    let (pool, clock) = scheduled_pool(2);
    let (starts, op) = recorder(&clock);
    let handle = pool.schedule_at_fixed_rate(op, ms(100), ms(50)).unwrap();

    clock.advance_to(ms(99));
    settle();
    assert!(starts.lock().is_empty());

    for (expected_runs, at) in [(1, 100), (2, 150), (3, 200), (4, 250)] {
        clock.advance_to(ms(at));
        assert!(eventually(|| starts.lock().len() == expected_runs));
    }
    clock.advance_to(ms(280));
    settle();

    assert_eq!(*starts.lock(), vec![ms(100), ms(150), ms(200), ms(250)]);
    assert!(!handle.is_done());
    assert!(handle.cancel());
}

#[test]
fn test_fixed_rate_overrun_compresses_without_overlap() {
    let (pool, clock) = scheduled_pool(4);
    let starts = Arc::new(Mutex::new(Vec::new()));
    let active = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));

    let op = {
        let clock = Arc::clone(&clock);
        let starts = Arc::clone(&starts);
        let active = Arc::clone(&active);
        let peak = Arc::clone(&peak);
        move || {
            let now = active.fetch_add(1, Ordering::SeqCst) + 1;
            peak.fetch_max(now, Ordering::SeqCst);
            let run = {
                let mut starts = starts.lock();
                starts.push(clock.now());
                starts.len()
            };
            if run == 1 {
                // First run takes 120ms of clock time, overrunning two periods.
                clock.advance(ms(120));
            }
            active.fetch_sub(1, Ordering::SeqCst);
            Ok::<_, anyhow::Error>(())
        }
    };
    let handle = pool.schedule_at_fixed_rate(op, ms(100), ms(50)).unwrap();

    clock.advance_to(ms(100));
    assert!(eventually(|| starts.lock().len() == 3));
    settle();
    assert_eq!(*starts.lock(), vec![ms(100), ms(220), ms(220)]);

    clock.advance_to(ms(250));
    assert!(eventually(|| starts.lock().len() == 4));
    assert_eq!(starts.lock()[3], ms(250));
    assert_eq!(peak.load(Ordering::SeqCst), 1);

    handle.cancel();
}

#[test]
fn test_cancel_stops_fixed_rate_task() {
    let (pool, clock) = scheduled_pool(1);
    let (starts, op) = recorder(&clock);
    let handle = pool.schedule_at_fixed_rate(op, ms(10), ms(10)).unwrap();

    clock.advance_to(ms(10));
    assert!(eventually(|| starts.lock().len() == 1));

    assert!(handle.cancel());
    assert_eq!(handle.get_timeout(WAIT), Err(PoolError::Cancelled));

    clock.advance_to(ms(100));
    settle();
    assert_eq!(starts.lock().len(), 1);
    assert!(eventually(|| pool.stats().scheduled_tasks == 0));
}

#[test]
fn test_failing_run_stops_repetition() {
    let (pool, clock) = scheduled_pool(1);
    let runs = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&runs);
    let handle = pool
        .schedule_at_fixed_rate(
            move || {
                if counter.fetch_add(1, Ordering::SeqCst) == 1 {
                    anyhow::bail!("sensor offline");
                }
                Ok(())
            },
            ms(100),
            ms(50),
        )
        .unwrap();

    clock.advance_to(ms(100));
    assert!(eventually(|| runs.load(Ordering::SeqCst) == 1));
    clock.advance_to(ms(150));

    match handle.get_timeout(WAIT) {
        Err(PoolError::TaskExecutionFailure(failure)) => {
            assert_eq!(failure.message(), "sensor offline");
        }
        other => panic!("expected failure, got {other:?}"),
    }

    clock.advance_to(ms(1_000));
    settle();
    assert_eq!(runs.load(Ordering::SeqCst), 2);
}

#[test]
fn test_zero_period_is_rejected() {
    let (pool, _clock) = scheduled_pool(1);
    let err = pool
        .schedule_at_fixed_rate(|| Ok::<_, anyhow::Error>(()), ms(10), Duration::ZERO)
        .unwrap_err();
    assert!(matches!(err, PoolError::InvalidConfig(_)));
}

#[test]
fn test_shutdown_cancels_periodic_but_runs_delayed() {
    let (pool, clock) = scheduled_pool(1);
    let (starts, op) = recorder(&clock);
    let periodic = pool.schedule_at_fixed_rate(op, ms(100), ms(100)).unwrap();
    let delayed = pool
        .schedule(|| Ok::<_, anyhow::Error>("after shutdown"), ms(200))
        .unwrap();

    pool.shutdown();
    assert_eq!(
        pool.schedule(|| Ok::<_, anyhow::Error>(()), ms(1)).unwrap_err(),
        PoolError::PoolClosed
    );
    assert_eq!(periodic.get_timeout(WAIT), Err(PoolError::Cancelled));
    assert!(!pool.is_terminated());

    clock.advance_to(ms(200));
    assert_eq!(delayed.get_timeout(WAIT).unwrap(), "after shutdown");
    assert!(starts.lock().is_empty());
    assert!(pool.await_termination(WAIT));
}

#[test]
fn test_shutdown_policy_can_keep_periodic_and_drop_delayed() {
    let clock = Arc::new(ManualClock::new());
    let config = WorkerPoolConfig::scheduled(1).with_shutdown_policy(ShutdownPolicy {
        run_delayed_after_shutdown: false,
        continue_periodic_after_shutdown: true,
    });
    let pool = WorkerPool::with_clock(config, Arc::clone(&clock) as Arc<dyn Clock>).unwrap();
    let (starts, op) = recorder(&clock);
    let periodic = pool.schedule_at_fixed_rate(op, ms(10), ms(10)).unwrap();
    let delayed = pool.schedule(|| Ok::<_, anyhow::Error>(()), ms(15)).unwrap();

    pool.shutdown();
    assert_eq!(delayed.get_timeout(WAIT), Err(PoolError::Cancelled));

    clock.advance_to(ms(10));
    assert!(eventually(|| starts.lock().len() == 1));
    clock.advance_to(ms(20));
    assert!(eventually(|| starts.lock().len() == 2));

    // The periodic task keeps the pool alive until it is cancelled.
    assert!(!pool.await_termination(ms(20)));
    periodic.cancel();
    // The next run is due at 30ms; the timer drops the cancelled entry as soon as it wakes.
    clock.advance_to(ms(21));
    assert!(pool.await_termination(WAIT));
}

#[test]
fn test_shutdown_drops_cancelled_delayed_task() {
    let (pool, _clock) = scheduled_pool(1);
    let handle = pool
        .schedule(|| Ok::<_, anyhow::Error>(()), Duration::from_secs(3_600))
        .unwrap();
    assert!(handle.cancel());

    pool.shutdown();
    assert!(pool.await_termination(WAIT));
    assert!(pool.is_terminated());
    assert_eq!(pool.stats().scheduled_tasks, 0);
    assert_eq!(handle.get_timeout(WAIT), Err(PoolError::Cancelled));
}

#[test]
fn test_shutdown_drops_cancelled_periodic_task_under_keep_policy() {
    let clock = Arc::new(ManualClock::new());
    let config = WorkerPoolConfig::scheduled(1).with_shutdown_policy(ShutdownPolicy {
        run_delayed_after_shutdown: true,
        continue_periodic_after_shutdown: true,
    });
    let pool = WorkerPool::with_clock(config, Arc::clone(&clock) as Arc<dyn Clock>).unwrap();
    let handle = pool
        .schedule_at_fixed_rate(|| Ok::<_, anyhow::Error>(()), Duration::from_secs(3_600), ms(10))
        .unwrap();
    assert!(handle.cancel());

    pool.shutdown();
    assert!(pool.await_termination(WAIT));
    assert_eq!(pool.stats().scheduled_tasks, 0);
}

#[test]
fn test_shutdown_now_discards_timer_entries() {
    let (pool, _clock) = scheduled_pool(1);
    let delayed = pool.schedule(|| Ok::<_, anyhow::Error>(1), ms(100)).unwrap();
    let periodic = pool
        .schedule_at_fixed_rate(|| Ok::<_, anyhow::Error>(()), ms(100), ms(10))
        .unwrap();

    let mut discarded = pool.shutdown_now();
    discarded.sort_unstable();
    let mut expected = vec![delayed.task_id(), periodic.task_id()];
    expected.sort_unstable();
    assert_eq!(discarded, expected);

    assert_eq!(delayed.get_timeout(WAIT), Err(PoolError::Cancelled));
    assert_eq!(periodic.get_timeout(WAIT), Err(PoolError::Cancelled));
    assert!(pool.is_shutdown());
    assert!(pool.await_termination(WAIT));
}
