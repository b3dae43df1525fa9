use async_trait::async_trait;
use switchy_channel::Sender;

use crate::{FlowError, emitter::FlowEmitter};

/// Receives the elements of a flow, one at a time.
///
/// Returning an error from [`FlowCollector::emit`] stops the collection: the
/// error travels back up through every stage to whoever started collecting.
#[async_trait]
pub trait FlowCollector<T>: Send {
    async fn emit(&mut self, value: T) -> Result<(), FlowError>;
}

/// A link in a flow chain.
///
/// `collect` runs the stage (and everything upstream of it) from the start
/// every time it is called, emitting into `collector`.
#[async_trait]
pub trait Stage<T>: Send + Sync {
    async fn collect(&self, collector: &mut dyn FlowCollector<T>) -> Result<(), FlowError>;
}

/// Feeds elements to an async closure.
pub(crate) struct ForEach<F> {
    pub(crate) action: F,
}

#[async_trait]
impl<T, F, Fut> FlowCollector<T> for ForEach<F>
where
    T: Send + 'static,
    F: FnMut(T) -> Fut + Send,
    Fut: Future<Output = Result<(), FlowError>> + Send,
{
    async fn emit(&mut self, value: T) -> Result<(), FlowError> {
        (self.action)(value).await
    }
}

/// Folds elements into `acc` without suspending.
pub(crate) struct Accumulate<A, F> {
    pub(crate) acc: A,
    pub(crate) step: F,
}

#[async_trait]
impl<T, A, F> FlowCollector<T> for Accumulate<A, F>
where
    T: Send + 'static,
    A: Send,
    F: FnMut(&mut A, T) + Send,
{
    async fn emit(&mut self, value: T) -> Result<(), FlowError> {
        (self.step)(&mut self.acc, value);
        Ok(())
    }
}

/// Writes elements into a channel, suspending while it is full.
pub(crate) struct SendCollector<'a, T> {
    sender: &'a Sender<T>,
}

impl<'a, T> SendCollector<'a, T> {
    pub(crate) const fn new(sender: &'a Sender<T>) -> Self {
        Self { sender }
    }
}

#[async_trait]
impl<T: Send + 'static> FlowCollector<T> for SendCollector<'_, T> {
    async fn emit(&mut self, value: T) -> Result<(), FlowError> {
        self.sender
            .send(value)
            .await
            .map_err(|e| FlowError::Channel(e.into()))
    }
}

/// Forwards elements to the collector behind a [`FlowEmitter`].
pub(crate) struct EmitterCollector<'a, T> {
    pub(crate) emitter: &'a FlowEmitter<T>,
}

#[async_trait]
impl<T: Send + 'static> FlowCollector<T> for EmitterCollector<'_, T> {
    async fn emit(&mut self, value: T) -> Result<(), FlowError> {
        self.emitter.emit(value).await
    }
}
