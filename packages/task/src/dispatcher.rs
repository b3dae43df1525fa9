use std::sync::Arc;

use tokio::runtime::{Handle, Runtime};

use crate::{Error, spawn_on};

struct Inner {
    name: String,
    handle: Handle,
    runtime: Option<Runtime>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Some(runtime) = self.runtime.take() {
            log::debug!("shutting down dispatcher: {}", self.name);
            runtime.shutdown_background();
        }
    }
}

/// A named execution context tasks can be moved onto.
///
/// Either borrows an existing runtime through its [`Handle`], or owns a
/// dedicated worker pool that is shut down when the last clone is dropped.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("name", &self.inner.name)
            .field("owned", &self.inner.runtime.is_some())
            .finish_non_exhaustive()
    }
}

impl Dispatcher {
    /// The runtime the caller is currently running on.
    ///
    /// # Errors
    ///
    /// * If called outside of a tokio runtime
    pub fn current() -> Result<Self, Error> {
        Ok(Self::from_handle("current", Handle::try_current()?))
    }

    #[must_use]
    pub fn from_handle(name: &str, handle: Handle) -> Self {
        Self {
            inner: Arc::new(Inner {
                name: name.to_owned(),
                handle,
                runtime: None,
            }),
        }
    }

    /// Builds a dedicated multi-threaded pool whose worker threads are named
    /// `name`.
    ///
    /// # Errors
    ///
    /// * If the underlying runtime fails to build
    pub fn multi_thread(name: &str, workers: usize) -> Result<Self, Error> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(workers.max(1))
            .thread_name(name)
            .enable_time()
            .build()?;

        Ok(Self {
            inner: Arc::new(Inner {
                name: name.to_owned(),
                handle: runtime.handle().clone(),
                runtime: Some(runtime),
            }),
        })
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    #[must_use]
    pub fn handle(&self) -> &Handle {
        &self.inner.handle
    }

    pub fn spawn<Fut>(&self, name: &str, future: Fut) -> tokio::task::JoinHandle<Fut::Output>
    where
        Fut: Future + Send + 'static,
        Fut::Output: Send + 'static,
    {
        spawn_on(name, &self.inner.handle, future)
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::{assert_eq, assert_ne};

    use super::*;

    #[test_log::test(tokio::test)]
    async fn owned_pool_runs_on_named_threads() {
        let dispatcher = Dispatcher::multi_thread("switchy-test-pool", 1).unwrap();
        let caller = std::thread::current().id();

        let (name, id) = dispatcher
            .spawn("test: thread name", async {
                let thread = std::thread::current();
                (thread.name().map(ToOwned::to_owned), thread.id())
            })
            .await
            .unwrap();

        assert_eq!(name.as_deref(), Some("switchy-test-pool"));
        assert_ne!(id, caller);
    }

    #[test_log::test(tokio::test)]
    async fn current_dispatcher_spawns_on_the_calling_runtime() {
        let dispatcher = Dispatcher::current().unwrap();

        let value = dispatcher.spawn("test: current", async { 7 }).await.unwrap();

        assert_eq!(value, 7);
        assert_eq!(dispatcher.name(), "current");
    }

    #[test_log::test]
    fn current_fails_outside_a_runtime() {
        assert!(matches!(Dispatcher::current(), Err(Error::NoRuntime(_))));
    }
}
