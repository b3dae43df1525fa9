use tokio::task::{JoinError, JoinHandle};

/// Owns a spawned task and aborts it on drop.
///
/// Concurrent stages keep one of these for every background task they start,
/// so tearing a stage down (by returning early, failing, or having its own
/// future dropped) also tears down the tasks it spawned.
#[derive(Debug)]
pub struct TaskGuard<T> {
    handle: JoinHandle<T>,
}

impl<T> TaskGuard<T> {
    #[must_use]
    pub const fn new(handle: JoinHandle<T>) -> Self {
        Self { handle }
    }

    pub fn abort(&self) {
        self.handle.abort();
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Waits for the task to finish.
    ///
    /// # Errors
    ///
    /// * If the task panicked or was aborted
    pub async fn join(mut self) -> Result<T, JoinError> {
        (&mut self.handle).await
    }
}

impl<T> Drop for TaskGuard<T> {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
