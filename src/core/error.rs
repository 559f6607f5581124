//! Error types for pool and task operations.

use std::any::Any;
use std::fmt;

use thiserror::Error;

/// A captured task failure.
///
/// Failures are rendered once, at the point of capture, so every reader of a
/// [`ResultHandle`](crate::core::ResultHandle) observes the same value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskFailure {
    message: String,
    panicked: bool,
}

impl TaskFailure {
    /// Capture an error returned by a task, including its context chain.
    #[must_use]
    pub fn from_error(err: &anyhow::Error) -> Self {
        Self {
            message: format!("{err:#}"),
            panicked: false,
        }
    }

    /// Capture a panic payload raised inside a task.
    #[must_use]
    pub fn from_panic(payload: &(dyn Any + Send)) -> Self {
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| (*s).to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "non-string panic payload".to_string());
        Self {
            message,
            panicked: true,
        }
    }

    /// The rendered error message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Whether the task panicked rather than returning an error.
    #[must_use]
    pub const fn is_panic(&self) -> bool {
        self.panicked
    }
}

impl fmt::Display for TaskFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.panicked {
            write!(f, "task panicked: {}", self.message)
        } else {
            f.write_str(&self.message)
        }
    }
}

/// Errors produced by worker pools and result handles.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PoolError {
    /// A blocked reader was interrupted before the task finished.
    #[error("wait interrupted before the task finished")]
    InterruptedWait,
    /// The task's operation returned an error or panicked.
    #[error("task execution failed: {0}")]
    TaskExecutionFailure(TaskFailure),
    /// The pool no longer accepts submissions.
    #[error("pool has been shut down")]
    PoolClosed,
    /// The task was cancelled before it ran.
    #[error("task was cancelled")]
    Cancelled,
    /// A timed wait expired.
    #[error("operation timed out")]
    Timeout,
    /// Configuration or argument validation failed.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    /// The OS refused to create a pool thread.
    #[error("failed to spawn pool thread: {0}")]
    Spawn(String),
}

/// Application-facing result using anyhow for higher-level contexts.
pub type AppResult<T> = Result<T, anyhow::Error>;

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn test_failure_keeps_context_chain() {
        let err = Err::<(), _>(anyhow::anyhow!("disk full"))
            .context("writing chunk")
            .unwrap_err();
        let failure = TaskFailure::from_error(&err);
        assert_eq!(failure.message(), "writing chunk: disk full");
        assert!(!failure.is_panic());
        assert_eq!(failure.to_string(), "writing chunk: disk full");
    }

    #[test]
    fn test_failure_from_panic_payloads() {
        let failure = TaskFailure::from_panic(&"boom");
        assert_eq!(failure.message(), "boom");
        assert!(failure.is_panic());
        assert_eq!(failure.to_string(), "task panicked: boom");

        let failure = TaskFailure::from_panic(&String::from("owned boom"));
        assert_eq!(failure.message(), "owned boom");

        let failure = TaskFailure::from_panic(&42_u32);
        assert_eq!(failure.message(), "non-string panic payload");
    }

    #[test]
    fn test_pool_error_display() {
        assert_eq!(PoolError::PoolClosed.to_string(), "pool has been shut down");
        assert_eq!(
            PoolError::InterruptedWait.to_string(),
            "wait interrupted before the task finished"
        );
        let failure = TaskFailure::from_panic(&"bad input");
        assert_eq!(
            PoolError::TaskExecutionFailure(failure).to_string(),
            "task execution failed: task panicked: bad input"
        );
    }
}
