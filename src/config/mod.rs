//! Configuration models for worker pools.

pub mod pool;

pub use pool::{PoolPolicy, PoolSetConfig, ShutdownPolicy, WorkerPoolConfig};
