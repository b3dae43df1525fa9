use std::{
    fmt::Display,
    panic::AssertUnwindSafe,
    pin::Pin,
    sync::{
        Arc, Mutex, PoisonError,
        atomic::{AtomicU8, Ordering},
    },
    task::{Context, Poll, Waker},
};

use pin_project_lite::pin_project;
use tokio_util::sync::{CancellationToken, WaitForCancellationFutureOwned};

/// Lifecycle of a launched [`Job`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum JobState {
    Active = 0,
    Completed = 1,
    Failed = 2,
    Cancelled = 3,
}

impl JobState {
    const fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Completed,
            2 => Self::Failed,
            3 => Self::Cancelled,
            _ => Self::Active,
        }
    }

    #[must_use]
    pub const fn is_finished(self) -> bool {
        !matches!(self, Self::Active)
    }
}

struct Inner {
    name: String,
    token: CancellationToken,
    state: AtomicU8,
    waiters: Mutex<Vec<Waker>>,
}

/// Handle to a task launched in a [`crate::Scope`].
///
/// Cloning the handle does not clone the task. Dropping every handle does not
/// cancel it either; the owning scope does that.
#[derive(Clone)]
pub struct Job {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for Job {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Job")
            .field("name", &self.inner.name)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl Job {
    pub(crate) fn new(name: &str, token: CancellationToken) -> Self {
        Self {
            inner: Arc::new(Inner {
                name: name.to_owned(),
                token,
                state: AtomicU8::new(JobState::Active as u8),
                waiters: Mutex::new(vec![]),
            }),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    #[must_use]
    pub fn state(&self) -> JobState {
        JobState::from_u8(self.inner.state.load(Ordering::Acquire))
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.state() == JobState::Active
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.state().is_finished()
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.state() == JobState::Cancelled
    }

    /// Requests cancellation. The job observes it at its next suspension point.
    pub fn cancel(&self) {
        log::debug!("cancel job: {}", self.inner.name);
        self.inner.token.cancel();
    }

    /// Waits until the job reaches a terminal state.
    pub async fn join(&self) -> JobState {
        std::future::poll_fn(|cx| self.poll_finished(cx)).await
    }

    pub async fn cancel_and_join(&self) -> JobState {
        self.cancel();
        self.join().await
    }

    /// Polls for completion, registering `cx`'s waker if still active.
    pub fn poll_finished(&self, cx: &mut Context<'_>) -> Poll<JobState> {
        let state = self.state();
        if state.is_finished() {
            return Poll::Ready(state);
        }

        {
            let mut waiters = self
                .inner
                .waiters
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            if !waiters.iter().any(|w| w.will_wake(cx.waker())) {
                waiters.push(cx.waker().clone());
            }
        }

        let state = self.state();
        if state.is_finished() {
            Poll::Ready(state)
        } else {
            Poll::Pending
        }
    }

    pub(crate) fn token(&self) -> &CancellationToken {
        &self.inner.token
    }

    fn finish(&self, state: JobState) {
        if self
            .inner
            .state
            .compare_exchange(
                JobState::Active as u8,
                state as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_err()
        {
            return;
        }

        log::trace!("job {} finished: {state:?}", self.inner.name);

        let waiters = std::mem::take(
            &mut *self
                .inner
                .waiters
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        );
        for waiter in waiters {
            waiter.wake();
        }
    }
}

/// Publishes the job's final state when dropped.
///
/// It is the last field of [`JobFuture`], so the user future (and everything it
/// owns, such as a channel sender) is gone before waiters are woken.
struct JobCompletion {
    job: Job,
    outcome: Option<JobState>,
}

impl Drop for JobCompletion {
    fn drop(&mut self) {
        self.job.finish(self.outcome.unwrap_or(JobState::Cancelled));
    }
}

pin_project! {
    /// Drives a job body until it finishes or its token is cancelled.
    pub(crate) struct JobFuture<F> {
        #[pin]
        future: F,
        #[pin]
        cancelled: WaitForCancellationFutureOwned,
        completion: JobCompletion,
    }
}

impl<F> JobFuture<F> {
    pub(crate) fn new(job: Job, future: F) -> Self {
        Self {
            future,
            cancelled: job.token().clone().cancelled_owned(),
            completion: JobCompletion { job, outcome: None },
        }
    }
}

impl<F, E> Future for JobFuture<F>
where
    F: Future<Output = Result<(), E>>,
    E: Display,
{
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.project();

        if this.completion.outcome.is_some() {
            return Poll::Ready(());
        }

        if this.cancelled.poll(cx).is_ready() {
            this.completion.outcome = Some(JobState::Cancelled);
            return Poll::Ready(());
        }

        let future = this.future;
        let poll = match std::panic::catch_unwind(AssertUnwindSafe(|| future.poll(cx))) {
            Ok(poll) => poll,
            Err(panic) => {
                this.completion.outcome = Some(JobState::Failed);
                std::panic::resume_unwind(panic);
            }
        };

        match poll {
            Poll::Ready(Ok(())) => {
                this.completion.outcome = Some(JobState::Completed);
                Poll::Ready(())
            }
            Poll::Ready(Err(e)) => {
                log::error!("job {} failed: {e}", this.completion.job.name());
                this.completion.outcome = Some(JobState::Failed);
                Poll::Ready(())
            }
            Poll::Pending => Poll::Pending,
        }
    }
}
