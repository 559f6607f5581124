//! Worker pools, tasks, and result handles.

pub mod error;
pub mod handle;
pub mod task;
pub(crate) mod timer;
pub mod worker_pool;

pub use error::{AppResult, PoolError, TaskFailure};
pub use handle::{FutureTask, ResultHandle};
pub use task::{is_interrupted, TaskId, TaskState};
pub use worker_pool::{PoolStats, WorkerPool};
