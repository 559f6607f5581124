//! Tests for utility functions

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use prometheus_executors::util::{init_tracing, Clock, ManualClock, SystemClock};

#[test]
fn test_manual_clock_starts_at_zero() {
    let clock = ManualClock::new();
    assert_eq!(clock.now(), Duration::ZERO);
}

#[test]
fn test_manual_clock_never_goes_backwards() {
    let clock = ManualClock::new();
    clock.advance_to(Duration::from_millis(300));
    clock.advance_to(Duration::from_millis(100));
    assert_eq!(clock.now(), Duration::from_millis(300));
}

#[test]
fn test_manual_clock_notifies_every_waker() {
    let clock = ManualClock::new();
    let calls = Arc::new(AtomicUsize::new(0));
    for _ in 0..3 {
        let calls = Arc::clone(&calls);
        clock.on_advance(Arc::new(move || {
            calls.fetch_add(1, Ordering::SeqCst);
        }));
    }
    clock.advance(Duration::from_millis(1));
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[test]
fn test_system_clock_advances_with_real_time() {
    let clock = SystemClock::new();
    let before = clock.now();
    std::thread::sleep(Duration::from_millis(5));
    assert!(clock.now() >= before + Duration::from_millis(5));
}

#[test]
fn test_init_tracing_is_idempotent() {
    init_tracing();
    init_tracing();
    tracing::info!("tracing initialized twice without panicking");
}
