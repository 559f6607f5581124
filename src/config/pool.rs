//! Pool configuration structures.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

const DEFAULT_KEEP_ALIVE_MS: u64 = 60_000;
const DEFAULT_STACK_SIZE: usize = 2 * 1024 * 1024;

fn default_keep_alive_ms() -> u64 {
    DEFAULT_KEEP_ALIVE_MS
}

fn default_thread_name_prefix() -> String {
    "pool-worker".into()
}

const fn default_stack_size() -> usize {
    DEFAULT_STACK_SIZE
}

const fn default_true() -> bool {
    true
}

/// Worker-count policy of a pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PoolPolicy {
    /// Exactly `workers` threads; excess tasks wait in an unbounded FIFO queue.
    Fixed {
        /// Number of worker threads.
        workers: usize,
    },
    /// Grows a worker whenever no idle one can take a task; idle workers exit
    /// after `keep_alive_ms`.
    Cached {
        /// Idle time before a worker exits, in milliseconds.
        #[serde(default = "default_keep_alive_ms")]
        keep_alive_ms: u64,
    },
    /// One worker; tasks run in submission order and never overlap.
    Single,
    /// `workers` threads plus a timer thread started with the pool.
    Scheduled {
        /// Number of worker threads.
        workers: usize,
    },
}

impl PoolPolicy {
    /// Workers started with the pool and kept for its lifetime.
    #[must_use]
    pub const fn core_workers(&self) -> usize {
        match *self {
            Self::Fixed { workers } | Self::Scheduled { workers } => workers,
            Self::Cached { .. } => 0,
            Self::Single => 1,
        }
    }

    /// Idle timeout for cached workers.
    #[must_use]
    pub const fn keep_alive(&self) -> Option<Duration> {
        match *self {
            Self::Cached { keep_alive_ms } => Some(Duration::from_millis(keep_alive_ms)),
            _ => None,
        }
    }

    /// Whether the pool grows workers on demand.
    #[must_use]
    pub const fn is_cached(&self) -> bool {
        matches!(self, Self::Cached { .. })
    }

    /// Whether the timer thread starts together with the pool.
    #[must_use]
    pub const fn is_scheduled(&self) -> bool {
        matches!(self, Self::Scheduled { .. })
    }

    /// Short name used in logs.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Fixed { .. } => "fixed",
            Self::Cached { .. } => "cached",
            Self::Single => "single",
            Self::Scheduled { .. } => "scheduled",
        }
    }
}

/// What happens to timer entries when `shutdown()` is called.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShutdownPolicy {
    /// One-shot delayed tasks still fire after shutdown.
    #[serde(default = "default_true")]
    pub run_delayed_after_shutdown: bool,
    /// Fixed-rate tasks keep repeating after shutdown.
    #[serde(default)]
    pub continue_periodic_after_shutdown: bool,
}

impl Default for ShutdownPolicy {
    fn default() -> Self {
        Self {
            run_delayed_after_shutdown: true,
            continue_periodic_after_shutdown: false,
        }
    }
}

/// Configuration for one [`WorkerPool`](crate::core::WorkerPool).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerPoolConfig {
    /// Worker-count policy.
    pub policy: PoolPolicy,
    /// Worker threads are named `{prefix}-{n}`.
    #[serde(default = "default_thread_name_prefix")]
    pub thread_name_prefix: String,
    /// Stack size of every pool thread, in bytes.
    #[serde(default = "default_stack_size")]
    pub thread_stack_size: usize,
    /// Treatment of timer entries on shutdown.
    #[serde(default)]
    pub shutdown: ShutdownPolicy,
}

impl WorkerPoolConfig {
    /// Fixed pool with one worker per logical CPU.
    #[must_use]
    pub fn new() -> Self {
        Self::with_policy(PoolPolicy::Fixed {
            workers: num_cpus::get(),
        })
    }

    /// Configuration for `policy` with default thread settings.
    #[must_use]
    pub fn with_policy(policy: PoolPolicy) -> Self {
        Self {
            policy,
            thread_name_prefix: default_thread_name_prefix(),
            thread_stack_size: DEFAULT_STACK_SIZE,
            shutdown: ShutdownPolicy::default(),
        }
    }

    /// Exactly `workers` threads.
    #[must_use]
    pub fn fixed(workers: usize) -> Self {
        Self::with_policy(PoolPolicy::Fixed { workers })
    }

    /// Unbounded pool with a 60 second keep-alive.
    #[must_use]
    pub fn cached() -> Self {
        Self::with_policy(PoolPolicy::Cached {
            keep_alive_ms: DEFAULT_KEEP_ALIVE_MS,
        })
    }

    /// A single worker.
    #[must_use]
    pub fn single() -> Self {
        Self::with_policy(PoolPolicy::Single)
    }

    /// `workers` threads plus an eager timer.
    #[must_use]
    pub fn scheduled(workers: usize) -> Self {
        Self::with_policy(PoolPolicy::Scheduled { workers })
    }

    /// Set the idle timeout of a cached pool. Ignored by other policies.
    #[must_use]
    pub fn with_keep_alive(mut self, keep_alive: Duration) -> Self {
        if let PoolPolicy::Cached { keep_alive_ms } = &mut self.policy {
            *keep_alive_ms = u64::try_from(keep_alive.as_millis()).unwrap_or(u64::MAX);
        }
        self
    }

    /// Set the thread name prefix.
    #[must_use]
    pub fn with_thread_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.thread_name_prefix = prefix.into();
        self
    }

    /// Set the stack size of pool threads.
    #[must_use]
    pub const fn with_thread_stack_size(mut self, size: usize) -> Self {
        self.thread_stack_size = size;
        self
    }

    /// Set the shutdown policy for timer entries.
    #[must_use]
    pub const fn with_shutdown_policy(mut self, shutdown: ShutdownPolicy) -> Self {
        self.shutdown = shutdown;
        self
    }

    /// Validate configuration values.
    ///
    /// # Errors
    ///
    /// Returns a description of the first invalid field.
    pub fn validate(&self) -> Result<(), String> {
        match self.policy {
            PoolPolicy::Fixed { workers: 0 } | PoolPolicy::Scheduled { workers: 0 } => {
                return Err("workers must be greater than 0".into());
            }
            PoolPolicy::Cached { keep_alive_ms: 0 } => {
                return Err("keep_alive_ms must be greater than 0".into());
            }
            _ => {}
        }
        if self.thread_name_prefix.trim().is_empty() {
            return Err("thread_name_prefix must not be empty".into());
        }
        if self.thread_stack_size == 0 {
            return Err("thread_stack_size must be greater than 0".into());
        }
        Ok(())
    }
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// A set of named pools, usually loaded from JSON.
///
/// ```json
/// {
///   "pools": {
///     "io": { "policy": { "kind": "cached", "keep_alive_ms": 30000 } },
///     "ticks": { "policy": { "kind": "scheduled", "workers": 2 } }
///   }
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolSetConfig {
    /// Map of pool name to configuration.
    pub pools: HashMap<String, WorkerPoolConfig>,
}

impl PoolSetConfig {
    /// Validate all pools and ensure at least one pool exists.
    ///
    /// # Errors
    ///
    /// Returns a message naming the first invalid pool.
    pub fn validate(&self) -> Result<(), String> {
        if self.pools.is_empty() {
            return Err("at least one pool must be defined".into());
        }
        for (name, pool) in &self.pools {
            pool.validate()
                .map_err(|e| format!("pool `{name}` invalid: {e}"))?;
        }
        Ok(())
    }

    /// Parse a pool set from a JSON string and validate it.
    ///
    /// # Errors
    ///
    /// Returns a message on parse or validation failure.
    pub fn from_json_str(input: &str) -> Result<Self, String> {
        let cfg: Self = serde_json::from_str(input).map_err(|e| format!("parse error: {e}"))?;
        cfg.validate()?;
        Ok(cfg)
    }
}
