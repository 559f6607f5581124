//! Tests for error types

use prometheus_executors::core::{PoolError, TaskFailure};

#[test]
fn test_pool_closed_error() {
    let err = PoolError::PoolClosed;
    assert_eq!(format!("{}", err), "pool has been shut down");
}

#[test]
fn test_cancelled_error() {
    let err = PoolError::Cancelled;
    assert_eq!(format!("{}", err), "task was cancelled");
}

#[test]
fn test_timeout_error() {
    let err = PoolError::Timeout;
    assert_eq!(format!("{}", err), "operation timed out");
}

#[test]
fn test_invalid_config_error() {
    let err = PoolError::InvalidConfig("period must be greater than 0".to_string());
    assert_eq!(
        format!("{}", err),
        "invalid configuration: period must be greater than 0"
    );
}

#[test]
fn test_spawn_error() {
    let err = PoolError::Spawn("resource temporarily unavailable".to_string());
    assert_eq!(
        format!("{}", err),
        "failed to spawn pool thread: resource temporarily unavailable"
    );
}

#[test]
fn test_execution_failure_wraps_error_chain() {
    let source = anyhow::anyhow!("connection reset").context("fetching page 3");
    let err = PoolError::TaskExecutionFailure(TaskFailure::from_error(&source));
    assert_eq!(
        format!("{}", err),
        "task execution failed: fetching page 3: connection reset"
    );
}

#[test]
fn test_pool_error_is_std_error() {
    let err: Box<dyn std::error::Error + Send + Sync> = Box::new(PoolError::InterruptedWait);
    assert_eq!(err.to_string(), "wait interrupted before the task finished");

    let converted: anyhow::Error = PoolError::PoolClosed.into();
    assert!(converted.downcast_ref::<PoolError>().is_some());
}
