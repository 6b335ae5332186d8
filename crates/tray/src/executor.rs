//! Where user callbacks run.
//!
//! Click handlers and the ready callback never run on the pump thread.
//! Each one is submitted as an independent task; there is no ordering
//! between tasks, not even between two clicks on the same item.

use tokio::runtime::Handle;

/// Unbounded pool for user callbacks.
#[derive(Debug, Clone, Default)]
pub enum CallbackExecutor {
    /// One short-lived OS thread per callback.
    #[default]
    Threads,
    /// Blocking tasks on a tokio runtime.
    Tokio(Handle),
}

impl CallbackExecutor {
    /// Uses the tokio runtime of the caller if there is one, plain
    /// threads otherwise.
    pub fn from_current_runtime() -> Self {
        match Handle::try_current() {
            Ok(handle) => Self::Tokio(handle),
            Err(_) => Self::Threads,
        }
    }

    /// Submits `task` and returns immediately.
    pub fn spawn<F>(&self, task: F)
    where
        F: FnOnce() + Send + 'static,
    {
        match self {
            Self::Threads => {
                if let Err(e) = std::thread::Builder::new()
                    .name("tray-callback".into())
                    .spawn(task)
                {
                    tracing::error!("failed to spawn callback thread: {e}");
                }
            }
            Self::Tokio(handle) => {
                handle.spawn_blocking(task);
            }
        }
    }
}
