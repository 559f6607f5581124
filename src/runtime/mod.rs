//! Thread and async runtime adapters used by pools.

pub mod thread_spawner;
#[cfg(feature = "tokio-runtime")]
pub(crate) mod worker_runtime;

pub use thread_spawner::{Spawn, ThreadBody, ThreadSpawner};
