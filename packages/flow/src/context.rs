//! Stages that move the upstream into its own task and hand elements over
//! through a channel.

use std::sync::Arc;

use async_trait::async_trait;
use switchy_channel::{BufferOverflow, Capacity, Channel, ClosedChannel, Receiver};
use switchy_task::{Dispatcher, TaskGuard};
use tokio::runtime::Handle;

use crate::{
    Flow, FlowError,
    collector::{FlowCollector, SendCollector, Stage},
};

pub(crate) fn current_handle() -> Result<Handle, FlowError> {
    Handle::try_current().map_err(FlowError::upstream)
}

/// Starts collecting `flow` into `channel` on `handle`.
///
/// If the collection fails the channel is closed with the [`FlowError`] as
/// its cause. Dropping the returned guard aborts the collection.
pub(crate) fn spawn_upstream<T: Send + 'static>(
    name: &str,
    flow: &Flow<T>,
    channel: Channel<T>,
    handle: &Handle,
) -> (Receiver<T>, TaskGuard<()>) {
    let (sender, receiver) = channel.split();
    let flow = flow.clone();

    let task = switchy_task::spawn_on(name, handle, async move {
        if let Err(e) = flow.collect_into(&mut SendCollector::new(&sender)).await {
            log::debug!("upstream collection failed: {e}");
            sender.close_with(Arc::new(e));
        }
    });

    (receiver, TaskGuard::new(task))
}

/// The outcome of an upstream task whose channel has closed.
pub(crate) async fn finish_upstream(
    closed: ClosedChannel,
    upstream: TaskGuard<()>,
) -> Result<(), FlowError> {
    if let Some(cause) = closed.into_cause() {
        return Err(FlowError::from_cause(cause));
    }
    match upstream.join().await {
        Ok(()) => Ok(()),
        Err(e) if e.is_cancelled() => Err(FlowError::Cancelled),
        Err(e) => {
            log::error!("upstream task panicked: {e}");
            Err(FlowError::upstream(e))
        }
    }
}

/// Emits everything received from `receiver` until the upstream finishes.
pub(crate) async fn forward_from<T: Send + 'static>(
    receiver: &Receiver<T>,
    upstream: TaskGuard<()>,
    downstream: &mut dyn FlowCollector<T>,
) -> Result<(), FlowError> {
    loop {
        match receiver.receive().await {
            Ok(value) => downstream.emit(value).await?,
            Err(closed) => return finish_upstream(closed, upstream).await,
        }
    }
}

struct Buffered<T> {
    upstream: Flow<T>,
    capacity: Capacity,
    overflow: BufferOverflow,
    dispatcher: Option<Dispatcher>,
}

#[async_trait]
impl<T: Send + 'static> Stage<T> for Buffered<T> {
    async fn collect(&self, collector: &mut dyn FlowCollector<T>) -> Result<(), FlowError> {
        let channel = Channel::with_overflow(self.capacity, self.overflow)?;
        let (name, handle) = match &self.dispatcher {
            Some(dispatcher) => (dispatcher.name(), dispatcher.handle().clone()),
            None => ("buffer", current_handle()?),
        };
        log::trace!("{name}: collecting upstream into {:?}", self.capacity);

        let (receiver, upstream) = spawn_upstream(name, &self.upstream, channel, &handle);
        forward_from(&receiver, upstream, collector).await
    }
}

impl<T: Send + 'static> Flow<T> {
    /// Collects the upstream concurrently, keeping up to `capacity` elements
    /// the collector has not taken yet. The upstream suspends while the
    /// buffer is full.
    #[must_use]
    pub fn buffer(&self, capacity: Capacity) -> Self {
        self.buffer_with_overflow(capacity, BufferOverflow::Suspend)
    }

    /// Like [`Flow::buffer`], with an explicit policy for a full buffer.
    ///
    /// Combinations a channel cannot be built with fail the collection with
    /// [`FlowError::Config`].
    #[must_use]
    pub fn buffer_with_overflow(&self, capacity: Capacity, overflow: BufferOverflow) -> Self {
        Self::from_stage(Buffered {
            upstream: self.clone(),
            capacity,
            overflow,
            dispatcher: None,
        })
    }

    /// Collects the upstream concurrently and hands the collector only the
    /// most recent element, skipping any it was too busy to take.
    #[must_use]
    pub fn conflate(&self) -> Self {
        self.buffer(Capacity::Conflated)
    }

    /// Runs the upstream (everything before this call) on `dispatcher`.
    /// Stages after it keep running where the flow is collected.
    #[must_use]
    pub fn flow_on(&self, dispatcher: &Dispatcher) -> Self {
        Self::from_stage(Buffered {
            upstream: self.clone(),
            capacity: Capacity::Buffered,
            overflow: BufferOverflow::Suspend,
            dispatcher: Some(dispatcher.clone()),
        })
    }

    /// Collects with `action`, cancelling a still-running `action` as soon as
    /// a newer element arrives. `action` always runs to completion for the
    /// last element.
    ///
    /// # Errors
    ///
    /// * If the upstream fails
    /// * If `action` fails for an element it was allowed to finish
    pub async fn collect_latest<F, Fut>(&self, mut action: F) -> Result<(), FlowError>
    where
        F: FnMut(T) -> Fut + Send,
        Fut: Future<Output = Result<(), FlowError>> + Send,
    {
        let handle = current_handle()?;
        let (receiver, upstream) = spawn_upstream(
            "collect_latest",
            self,
            Channel::new(Capacity::Rendezvous),
            &handle,
        );

        let mut next = receiver.receive().await;
        loop {
            let value = match next {
                Ok(value) => value,
                Err(closed) => return finish_upstream(closed, upstream).await,
            };
            let handler = action(value);
            tokio::pin!(handler);

            next = tokio::select! {
                biased;
                newer = receiver.receive() => {
                    if newer.is_ok() {
                        log::trace!("collect_latest: newer element arrived, cancelling handler");
                    } else {
                        handler.await?;
                    }
                    newer
                }
                handled = &mut handler => {
                    handled?;
                    receiver.receive().await
                }
            };
        }
    }
}
