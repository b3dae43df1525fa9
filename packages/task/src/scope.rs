use std::{convert::Infallible, fmt::Display, sync::Arc};

use tokio::runtime::Handle;
use tokio_util::{sync::CancellationToken, task::TaskTracker};

use crate::{
    Error,
    job::{Job, JobFuture},
    spawn_on,
};

/// A group of jobs sharing one cancellation token.
///
/// Cancelling the scope cancels every job launched in it and in its child
/// scopes. [`Scope::join`] waits for all of them, children included.
#[derive(Debug, Clone)]
pub struct Scope {
    name: Arc<str>,
    token: CancellationToken,
    trackers: Arc<[TaskTracker]>,
    handle: Handle,
}

impl Scope {
    /// Creates a root scope on the current runtime.
    ///
    /// # Errors
    ///
    /// * If called outside of a tokio runtime
    pub fn new(name: &str) -> Result<Self, Error> {
        Ok(Self::with_handle(name, Handle::try_current()?))
    }

    #[must_use]
    pub fn with_handle(name: &str, handle: Handle) -> Self {
        Self {
            name: name.into(),
            token: CancellationToken::new(),
            trackers: Arc::new([TaskTracker::new()]),
            handle,
        }
    }

    /// Creates a scope that is cancelled along with this one.
    #[must_use]
    pub fn child(&self, name: &str) -> Self {
        let trackers = std::iter::once(TaskTracker::new())
            .chain(self.trackers.iter().cloned())
            .collect();

        Self {
            name: format!("{}/{name}", self.name).into(),
            token: self.token.child_token(),
            trackers,
            handle: self.handle.clone(),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub const fn handle(&self) -> &Handle {
        &self.handle
    }

    #[must_use]
    pub const fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Launches `future` as a job of this scope.
    pub fn launch<Fut>(&self, name: &str, future: Fut) -> Job
    where
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.launch_fallible(name, async move {
            future.await;
            Ok::<_, Infallible>(())
        })
    }

    /// Launches a job whose error marks it [`crate::JobState::Failed`].
    ///
    /// The error is logged; callers that need it should handle it inside
    /// `future`.
    pub fn launch_fallible<Fut, E>(&self, name: &str, future: Fut) -> Job
    where
        Fut: Future<Output = Result<(), E>> + Send + 'static,
        E: Display + Send + 'static,
    {
        let name = format!("{}/{name}", self.name);
        let job = Job::new(&name, self.token.child_token());

        let mut future = Box::pin(JobFuture::new(job.clone(), future))
            as std::pin::Pin<Box<dyn Future<Output = ()> + Send>>;
        for tracker in self.trackers.iter() {
            future = Box::pin(tracker.track_future(future));
        }

        spawn_on(&name, &self.handle, future);

        job
    }

    pub fn cancel(&self) {
        log::debug!("cancel scope: {}", self.name);
        self.token.cancel();
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Waits for every job launched in this scope and its children.
    ///
    /// Jobs may still be launched while waiting; they are waited for too.
    pub async fn join(&self) {
        let tracker = &self.trackers[0];
        tracker.close();
        tracker.wait().await;
        tracker.reopen();
    }

    pub async fn cancel_and_join(&self) {
        self.cancel();
        self.join().await;
    }
}
