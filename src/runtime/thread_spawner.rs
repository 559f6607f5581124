//! Thread creation seam for pool workers and timers.

use std::io;
use std::thread;

/// Body executed on a newly spawned pool thread.
pub type ThreadBody = Box<dyn FnOnce() + Send + 'static>;

/// Creates the OS threads a pool runs on.
///
/// Pools never call `std::thread` directly, so tests can count or refuse
/// thread creation.
pub trait Spawn: Send + Sync + 'static {
    /// Start `body` on a new detached thread called `name`.
    ///
    /// # Errors
    ///
    /// Returns the OS error if the thread could not be created.
    fn spawn(&self, name: String, body: ThreadBody) -> io::Result<()>;
}

/// Spawner backed by [`std::thread::Builder`].
#[derive(Debug, Clone, Copy)]
pub struct ThreadSpawner {
    stack_size: usize,
}

impl ThreadSpawner {
    /// Spawner whose threads get `stack_size` bytes of stack.
    #[must_use]
    pub const fn new(stack_size: usize) -> Self {
        Self { stack_size }
    }
}

impl Spawn for ThreadSpawner {
    fn spawn(&self, name: String, body: ThreadBody) -> io::Result<()> {
        thread::Builder::new()
            .name(name)
            .stack_size(self.stack_size)
            .spawn(body)
            .map(drop)
    }
}
