//! Off-thread task dispatch
//!
//! Role transitions must not call back into the receive engine on the
//! thread holding the writer mutex. Tasks go to tokio's blocking pool; the
//! caller never waits for them.

use tokio::runtime::Handle;

/// Fire-and-forget executor backed by a tokio runtime handle.
#[derive(Debug, Clone)]
pub struct TaskDispatcher {
    handle: Handle,
}

impl TaskDispatcher {
    pub fn new(handle: Handle) -> Self {
        Self { handle }
    }

    /// Dispatcher for the runtime the caller is running in, if any.
    pub fn current() -> Option<Self> {
        Handle::try_current().ok().map(Self::new)
    }

    /// Runs `task` on the blocking pool without waiting for it.
    pub fn dispatch<F>(&self, task: F)
    where
        F: FnOnce() + Send + 'static,
    {
        drop(self.handle.spawn_blocking(task));
    }
}
