//! # Prometheus Executors
//!
//! Bounded worker pools with explicit lifecycle, write-once result handles,
//! and an injectable clock.
//!
//! A [`WorkerPool`](core::WorkerPool) runs tasks on dedicated OS threads
//! under one of four worker-count policies:
//!
//! - **Fixed**: exactly N workers sharing an unbounded FIFO queue
//! - **Cached**: grows a worker when none is idle; idle workers retire after a
//!   keep-alive window
//! - **Single**: one worker, strict submission order
//! - **Scheduled**: N workers plus a timer thread for delayed and fixed-rate
//!   tasks
//!
//! Every pool accepts delayed work; non-scheduled pools start their timer on
//! first use.
//!
//! ```rust
//! use std::time::Duration;
//! use prometheus_executors::core::{FutureTask, WorkerPool};
//!
//! let pool = WorkerPool::scheduled(2)?;
//!
//! let sum = pool.submit(|| Ok::<_, anyhow::Error>((1..=10).sum::<u32>()))?;
//! let later = pool.schedule(|| Ok::<_, anyhow::Error>("tick"), Duration::from_millis(5))?;
//!
//! let task = FutureTask::new(|| Ok::<_, anyhow::Error>(3 * 3));
//! let squared = task.handle();
//! pool.execute(move || {
//!     task.run();
//! })?;
//!
//! assert_eq!(sum.get()?, 55);
//! assert_eq!(later.get()?, "tick");
//! assert_eq!(squared.get()?, 9);
//!
//! pool.shutdown();
//! assert!(pool.await_termination(Duration::from_secs(5)));
//! # Ok::<(), prometheus_executors::core::PoolError>(())
//! ```
//!
//! Task errors and panics never take down a worker: they are captured into the
//! task's [`ResultHandle`](core::ResultHandle) and logged with `tracing`.
//!
//! For complete scenarios, see `tests/worker_pool_test.rs` and
//! `tests/scheduled_pool_test.rs`.

#![deny(warnings)]
#![deny(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

/// Worker pools, tasks, result handles, and errors.
pub mod core;
/// Configuration models for pools and pool sets.
pub mod config;
/// Builders to construct pools from configuration.
pub mod builders;
/// Thread and async runtime adapters.
pub mod runtime;
/// Shared utilities.
pub mod util;
