//! Tests for thread spawner utilities

use std::io;
use std::sync::Arc;

use prometheus_executors::config::WorkerPoolConfig;
use prometheus_executors::core::{PoolError, WorkerPool};
use prometheus_executors::runtime::{Spawn, ThreadBody, ThreadSpawner};
use prometheus_executors::util::{Clock, SystemClock};

/// Spawner that refuses to create any thread.
struct RefusingSpawner;

impl Spawn for RefusingSpawner {
    fn spawn(&self, _name: String, _body: ThreadBody) -> io::Result<()> {
        Err(io::Error::new(io::ErrorKind::WouldBlock, "thread limit reached"))
    }
}

#[test]
fn test_thread_spawner_runs_body() {
    let (tx, rx) = std::sync::mpsc::channel();
    ThreadSpawner::new(128 * 1024)
        .spawn(
            "runtime-test".to_string(),
            Box::new(move || {
                tx.send(123).unwrap();
            }),
        )
        .unwrap();
    assert_eq!(rx.recv().unwrap(), 123);
}

#[test]
fn test_pool_reports_spawn_failure() {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock::new());
    let err = WorkerPool::from_parts(WorkerPoolConfig::fixed(2), clock, Arc::new(RefusingSpawner))
        .unwrap_err();
    assert!(matches!(err, PoolError::Spawn(msg) if msg.contains("thread limit reached")));
}

#[test]
fn test_cached_pool_submit_reports_spawn_failure() {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock::new());
    let pool =
        WorkerPool::from_parts(WorkerPoolConfig::cached(), clock, Arc::new(RefusingSpawner))
            .expect("cached pools start without threads");
    let err = pool.submit(|| Ok::<_, anyhow::Error>(1)).unwrap_err();
    assert!(matches!(err, PoolError::Spawn(_)));
    assert_eq!(pool.stats().worker_count, 0);
}
