#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

//! Task utilities shared by the switchy channel and flow packages.
//!
//! * [`spawn`]/[`spawn_on`]/[`spawn_in`] start named tokio tasks and trace their lifetime
//! * [`Scope`] owns a set of [`Job`]s and cancels them together
//! * [`Dispatcher`] is an explicit execution context a task can be moved to
//! * [`TaskGuard`] aborts its task when dropped so nothing is left orphaned

use std::time::Duration;

mod dispatcher;
mod guard;
mod job;
mod scope;

pub use dispatcher::Dispatcher;
pub use guard::TaskGuard;
pub use job::{Job, JobState};
pub use scope::Scope;
pub use tokio::task::JoinError;
pub use tokio_util::sync::CancellationToken;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    IO(#[from] std::io::Error),
    #[error(transparent)]
    Join(#[from] JoinError),
    #[error("no tokio runtime is running on this thread")]
    NoRuntime(#[from] tokio::runtime::TryCurrentError),
}

/// Spawns a named task on the current runtime.
///
/// # Panics
///
/// * If called outside of a tokio runtime
pub fn spawn<Fut>(name: &str, future: Fut) -> tokio::task::JoinHandle<Fut::Output>
where
    Fut: Future + Send + 'static,
    Fut::Output: Send + 'static,
{
    spawn_on(name, &tokio::runtime::Handle::current(), future)
}

pub fn spawn_on<Fut>(
    name: &str,
    handle: &tokio::runtime::Handle,
    future: Fut,
) -> tokio::task::JoinHandle<Fut::Output>
where
    Fut: Future + Send + 'static,
    Fut::Output: Send + 'static,
{
    handle.spawn(traced(name, future))
}

/// Spawns `future` into `set`, with the same logging as [`spawn`].
pub fn spawn_in<Fut>(
    name: &str,
    set: &mut tokio::task::JoinSet<Fut::Output>,
    future: Fut,
) -> tokio::task::AbortHandle
where
    Fut: Future + Send + 'static,
    Fut::Output: Send + 'static,
{
    set.spawn(traced(name, future))
}

/// Spawns a named task like [`spawn`] and wraps it in a [`TaskGuard`], so
/// the task is aborted when the guard is dropped.
///
/// # Panics
///
/// * If called outside of a tokio runtime
pub fn spawn_guarded<Fut>(name: &str, future: Fut) -> TaskGuard<Fut::Output>
where
    Fut: Future + Send + 'static,
    Fut::Output: Send + 'static,
{
    TaskGuard::new(spawn(name, future))
}

fn traced<Fut>(name: &str, future: Fut) -> impl Future<Output = Fut::Output> + Send + use<Fut>
where
    Fut: Future + Send + 'static,
    Fut::Output: Send + 'static,
{
    log::trace!("spawn start: {name}");
    #[cfg(debug_assertions)]
    let name = name.to_owned();
    async move {
        let response = future.await;
        #[cfg(debug_assertions)]
        log::trace!("spawn finished: {name}");

        response
    }
}

/// Suspends the calling task for at least `duration`.
pub async fn delay(duration: Duration) {
    tokio::time::sleep(duration).await;
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use tokio::time::Instant;

    use super::*;

    #[test_log::test(tokio::test)]
    async fn spawn_in_adds_the_task_to_the_set() {
        let mut set = tokio::task::JoinSet::new();
        spawn_in("test: spawn_in 1", &mut set, async { 1 });
        spawn_in("test: spawn_in 2", &mut set, async { 2 });

        let mut outputs = set.join_all().await;
        outputs.sort_unstable();
        assert_eq!(outputs, vec![1, 2]);
    }

    #[test_log::test(tokio::test)]
    async fn spawn_returns_the_task_output() {
        let value = spawn("test: spawn", async { 42 }).await.unwrap();

        assert_eq!(value, 42);
    }

    #[test_log::test(tokio::test(start_paused = true))]
    async fn delay_waits_at_least_the_requested_duration() {
        let start = Instant::now();

        delay(Duration::from_millis(250)).await;

        assert!(start.elapsed() >= Duration::from_millis(250));
    }
}
