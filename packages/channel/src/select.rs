//! Waiting on several channel operations at once.
//!
//! A [`Select`] collects clauses and is awaited through [`IntoFuture`]. Every
//! poll tries the clauses starting from a different one each time a select is
//! built, so a clause that is always ready cannot starve the others. When
//! nothing is ready the task registers with every source and re-checks once
//! before suspending.
//!
//! Channel clauses are non-committal: they only complete through `try_send`
//! and `try_receive`. A select that sends and a select that receives on the
//! same rendezvous channel therefore never pair up with each other; one side
//! has to use a plain `send`/`receive`.

use std::{
    cell::Cell,
    future::IntoFuture,
    pin::Pin,
    task::{Context, Poll},
    time::Duration,
};

use switchy_task::{Job, JobState};
use tokio::time::Sleep;

use crate::{ClosedChannel, Receiver, Sender, TryReceiveError, TrySendError, shared::Shared};

thread_local! {
    static NEXT_START: Cell<usize> = const { Cell::new(0) };
}

type Outcome<R> = Option<Result<R, ClosedChannel>>;

trait Clause<R>: Send {
    /// Completes the clause if its source is ready, without suspending.
    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Outcome<R>;

    /// Arranges for `cx` to be woken when the source may have become ready.
    fn register(&mut self, _cx: &mut Context<'_>) {}
}

struct OnReceive<'a, T, F> {
    shared: &'a Shared<T>,
    handler: Option<F>,
}

impl<T, F, R> Clause<R> for OnReceive<'_, T, F>
where
    T: Send,
    F: FnOnce(T) -> R + Send,
{
    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Outcome<R> {
        let result = match self.shared.try_receive() {
            Ok(value) => Ok(value),
            Err(TryReceiveError::Empty) => return None,
            Err(TryReceiveError::Closed(closed)) => Err(closed),
        };
        let handler = self.handler.take()?;
        Some(result.map(handler))
    }

    fn register(&mut self, cx: &mut Context<'_>) {
        self.shared.observe(cx.waker());
    }
}

struct OnReceiveCatching<'a, T, F> {
    shared: &'a Shared<T>,
    handler: Option<F>,
}

impl<T, F, R> Clause<R> for OnReceiveCatching<'_, T, F>
where
    T: Send,
    F: FnOnce(Result<T, ClosedChannel>) -> R + Send,
{
    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Outcome<R> {
        let result = match self.shared.try_receive() {
            Ok(value) => Ok(value),
            Err(TryReceiveError::Empty) => return None,
            Err(TryReceiveError::Closed(closed)) => Err(closed),
        };
        let handler = self.handler.take()?;
        Some(Ok(handler(result)))
    }

    fn register(&mut self, cx: &mut Context<'_>) {
        self.shared.observe(cx.waker());
    }
}

struct OnSend<'a, T, F> {
    shared: &'a Shared<T>,
    pending: Option<(T, F)>,
}

impl<T, F, R> Clause<R> for OnSend<'_, T, F>
where
    T: Send,
    F: FnOnce() -> R + Send,
{
    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Outcome<R> {
        let (value, handler) = self.pending.take()?;
        match self.shared.try_send(value) {
            Ok(()) => Some(Ok(handler())),
            Err(TrySendError::Full(value)) => {
                self.pending = Some((value, handler));
                None
            }
            Err(TrySendError::Closed(e)) => Some(Err(e.into())),
        }
    }

    fn register(&mut self, cx: &mut Context<'_>) {
        self.shared.observe(cx.waker());
    }
}

struct OnJoin<'a, F> {
    job: &'a Job,
    handler: Option<F>,
}

impl<F, R> Clause<R> for OnJoin<'_, F>
where
    F: FnOnce(JobState) -> R + Send,
{
    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Outcome<R> {
        match self.job.poll_finished(cx) {
            Poll::Ready(state) => Some(Ok(self.handler.take()?(state))),
            Poll::Pending => None,
        }
    }
}

struct OnTimeout<F> {
    sleep: Pin<Box<Sleep>>,
    handler: Option<F>,
}

impl<F, R> Clause<R> for OnTimeout<F>
where
    F: FnOnce() -> R + Send,
{
    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Outcome<R> {
        match self.sleep.as_mut().poll(cx) {
            Poll::Ready(()) => Some(Ok(self.handler.take()?())),
            Poll::Pending => None,
        }
    }
}

/// A set of clauses of which exactly one completes.
///
/// Resolves to the winning clause's handler result. A plain receive clause
/// on a closed channel fails the whole select with [`ClosedChannel`]; use
/// [`Select::on_receive_catching`] to handle closure in the handler instead.
///
/// A select with no clauses never completes.
pub struct Select<'a, R> {
    clauses: Vec<Box<dyn Clause<R> + 'a>>,
}

impl<R> std::fmt::Debug for Select<'_, R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Select")
            .field("clauses", &self.clauses.len())
            .finish()
    }
}

impl<R> Default for Select<'_, R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'a, R> Select<'a, R> {
    #[must_use]
    pub fn new() -> Self {
        Self { clauses: vec![] }
    }

    #[must_use]
    pub fn on_receive<T, F>(mut self, receiver: &'a Receiver<T>, handler: F) -> Self
    where
        T: Send + 'a,
        F: FnOnce(T) -> R + Send + 'a,
    {
        self.clauses.push(Box::new(OnReceive {
            shared: receiver.shared(),
            handler: Some(handler),
        }));
        self
    }

    #[must_use]
    pub fn on_receive_catching<T, F>(mut self, receiver: &'a Receiver<T>, handler: F) -> Self
    where
        T: Send + 'a,
        F: FnOnce(Result<T, ClosedChannel>) -> R + Send + 'a,
    {
        self.clauses.push(Box::new(OnReceiveCatching {
            shared: receiver.shared(),
            handler: Some(handler),
        }));
        self
    }

    /// Sends `value` if the channel can accept it without suspending.
    ///
    /// If another clause wins, `value` is dropped with the select.
    ///
    /// On a rendezvous channel this is ready only while a plain
    /// [`Receiver::receive`] is parked. An `on_receive` clause of another
    /// select never parks, so two selects on opposite ends of one rendezvous
    /// channel wait for each other forever.
    #[must_use]
    pub fn on_send<T, F>(mut self, sender: &'a Sender<T>, value: T, handler: F) -> Self
    where
        T: Send + 'a,
        F: FnOnce() -> R + Send + 'a,
    {
        self.clauses.push(Box::new(OnSend {
            shared: sender.shared(),
            pending: Some((value, handler)),
        }));
        self
    }

    #[must_use]
    pub fn on_join<F>(mut self, job: &'a Job, handler: F) -> Self
    where
        F: FnOnce(JobState) -> R + Send + 'a,
    {
        self.clauses.push(Box::new(OnJoin {
            job,
            handler: Some(handler),
        }));
        self
    }

    /// Completes once `duration` has elapsed, measured from this call.
    #[must_use]
    pub fn on_timeout<F>(mut self, duration: Duration, handler: F) -> Self
    where
        F: FnOnce() -> R + Send + 'a,
    {
        self.clauses.push(Box::new(OnTimeout {
            sleep: Box::pin(tokio::time::sleep(duration)),
            handler: Some(handler),
        }));
        self
    }
}

/// Future of an awaited [`Select`].
#[must_use = "futures do nothing unless polled"]
pub struct SelectFuture<'a, R> {
    clauses: Vec<Box<dyn Clause<R> + 'a>>,
    start: usize,
}

impl<R> SelectFuture<'_, R> {
    fn try_clauses(&mut self, cx: &mut Context<'_>) -> Outcome<R> {
        let count = self.clauses.len();
        (0..count).find_map(|offset| self.clauses[(self.start + offset) % count].poll_ready(cx))
    }
}

impl<'a, R> IntoFuture for Select<'a, R> {
    type Output = Result<R, ClosedChannel>;
    type IntoFuture = SelectFuture<'a, R>;

    fn into_future(self) -> Self::IntoFuture {
        let start = NEXT_START.with(|next| {
            let start = next.get();
            next.set(start.wrapping_add(1));
            start
        });

        SelectFuture {
            clauses: self.clauses,
            start,
        }
    }
}

impl<R> Future for SelectFuture<'_, R> {
    type Output = Result<R, ClosedChannel>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = &mut *self;

        if let Some(outcome) = this.try_clauses(cx) {
            return Poll::Ready(outcome);
        }

        for clause in &mut this.clauses {
            clause.register(cx);
        }

        this.try_clauses(cx).map_or(Poll::Pending, Poll::Ready)
    }
}
