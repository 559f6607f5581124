//! Time sources for timer-driven work.
//!
//! Pools read time through [`Clock`] so delayed and fixed-rate tasks can be
//! driven deterministically in tests with [`ManualClock`].

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

/// Callback invoked when a clock's time moves without real time passing.
pub type ClockWaker = Arc<dyn Fn() + Send + Sync + 'static>;

/// Monotonic time source.
pub trait Clock: Send + Sync + 'static {
    /// Time elapsed since the clock's origin.
    fn now(&self) -> Duration;

    /// How long a timer may park while its next deadline is `remaining`
    /// away. `None` means park until explicitly woken.
    fn park_timeout(&self, remaining: Duration) -> Option<Duration>;

    /// Register a callback run whenever the clock jumps forward.
    ///
    /// Real clocks never jump, so the default ignores the waker.
    fn on_advance(&self, waker: ClockWaker) {
        let _ = waker;
    }
}

/// Wall-clock backed [`Clock`] measuring from its creation.
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    /// Create a clock whose origin is now.
    #[must_use]
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }

    fn park_timeout(&self, remaining: Duration) -> Option<Duration> {
        Some(remaining)
    }
}

/// Clock that only moves when told to.
///
/// ```
/// use std::time::Duration;
/// use prometheus_executors::util::{Clock, ManualClock};
///
/// let clock = ManualClock::new();
/// clock.advance(Duration::from_millis(250));
/// assert_eq!(clock.now(), Duration::from_millis(250));
/// ```
#[derive(Default)]
pub struct ManualClock {
    now: Mutex<Duration>,
    wakers: Mutex<Vec<ClockWaker>>,
}

impl ManualClock {
    /// Create a clock at time zero.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Move time forward by `by` and wake every registered timer.
    pub fn advance(&self, by: Duration) {
        {
            let mut now = self.now.lock();
            *now = now.saturating_add(by);
        }
        self.wake_all();
    }

    /// Jump to `to` if it lies in the future; the clock never moves backwards.
    pub fn advance_to(&self, to: Duration) {
        {
            let mut now = self.now.lock();
            if to > *now {
                *now = to;
            }
        }
        self.wake_all();
    }

    fn wake_all(&self) {
        let wakers = self.wakers.lock().clone();
        for waker in wakers {
            waker();
        }
    }
}

impl fmt::Debug for ManualClock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManualClock")
            .field("now", &*self.now.lock())
            .field("wakers", &self.wakers.lock().len())
            .finish()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Duration {
        *self.now.lock()
    }

    fn park_timeout(&self, _remaining: Duration) -> Option<Duration> {
        None
    }

    fn on_advance(&self, waker: ClockWaker) {
        self.wakers.lock().push(waker);
    }
}
