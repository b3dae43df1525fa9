use std::{
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
};

use futures::Stream;

use crate::{
    capacity::{BufferOverflow, Capacity, Policy},
    error::{CloseCause, ClosedChannel, ConfigError, SendError, TryReceiveError, TrySendError},
    shared::{Shared, Ticket},
};

/// Sending half of a channel.
///
/// The channel closes when the last `Sender` (including the ones inside
/// [`Channel`] handles) is dropped.
pub struct Sender<T> {
    shared: Arc<Shared<T>>,
}

/// Receiving half of a channel.
///
/// Every element is delivered to exactly one receiver. Clones compete for
/// elements rather than each seeing all of them. The channel is cancelled
/// when the last `Receiver` is dropped.
pub struct Receiver<T> {
    shared: Arc<Shared<T>>,
    /// Parked receive of the [`Stream`] impl.
    ticket: Option<Ticket>,
}

/// Both halves of a channel.
pub struct Channel<T> {
    sender: Sender<T>,
    receiver: Receiver<T>,
}

impl<T> std::fmt::Debug for Sender<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sender").finish_non_exhaustive()
    }
}

impl<T> std::fmt::Debug for Receiver<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Receiver").finish_non_exhaustive()
    }
}

impl<T> std::fmt::Debug for Channel<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Channel")
            .field("capacity", &self.capacity())
            .field("len", &self.len())
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

/// Creates a channel with [`BufferOverflow::Suspend`].
#[must_use]
pub fn channel<T>(capacity: Capacity) -> Channel<T> {
    Channel::new(capacity)
}

impl<T> Channel<T> {
    /// Creates a channel that suspends senders when full.
    #[must_use]
    pub fn new(capacity: Capacity) -> Self {
        Self::from_policy(Policy::suspending(capacity))
    }

    /// # Errors
    ///
    /// * If `capacity` is [`Capacity::Conflated`] and `overflow` is not
    ///   [`BufferOverflow::Suspend`]
    pub fn with_overflow(capacity: Capacity, overflow: BufferOverflow) -> Result<Self, ConfigError> {
        Ok(Self::from_policy(Policy::new(capacity, overflow)?))
    }

    fn from_policy(policy: Policy) -> Self {
        log::trace!("new channel: {policy:?}");
        let shared = Arc::new(Shared::new(policy));
        Self {
            sender: Sender::from_shared(shared.clone()),
            receiver: Receiver::from_shared(shared),
        }
    }

    #[must_use]
    pub const fn sender(&self) -> &Sender<T> {
        &self.sender
    }

    #[must_use]
    pub const fn receiver(&self) -> &Receiver<T> {
        &self.receiver
    }

    #[must_use]
    pub fn split(self) -> (Sender<T>, Receiver<T>) {
        (self.sender, self.receiver)
    }

    /// See [`Sender::send`].
    ///
    /// # Errors
    ///
    /// * If the channel is closed
    pub fn send(&self, value: T) -> SendFuture<'_, T> {
        self.sender.send(value)
    }

    /// See [`Sender::try_send`].
    ///
    /// # Errors
    ///
    /// * If the buffer is full and the channel suspends on overflow
    /// * If the channel is closed
    pub fn try_send(&self, value: T) -> Result<(), TrySendError<T>> {
        self.sender.try_send(value)
    }

    /// See [`Receiver::receive`].
    ///
    /// # Errors
    ///
    /// * If the channel is closed and drained
    pub fn receive(&self) -> ReceiveFuture<'_, T> {
        self.receiver.receive()
    }

    /// See [`Receiver::try_receive`].
    ///
    /// # Errors
    ///
    /// * If the channel is empty
    /// * If the channel is closed and drained
    pub fn try_receive(&self) -> Result<T, TryReceiveError> {
        self.receiver.try_receive()
    }

    pub fn close(&self) -> bool {
        self.sender.close()
    }

    pub fn close_with(&self, cause: CloseCause) -> bool {
        self.sender.close_with(cause)
    }

    pub fn cancel(&self) -> bool {
        self.receiver.cancel()
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.receiver.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.receiver.is_empty()
    }

    #[must_use]
    pub fn capacity(&self) -> Capacity {
        self.sender.capacity()
    }
}

impl<T> Clone for Channel<T> {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
            receiver: self.receiver.clone(),
        }
    }
}

impl<T> Stream for Channel<T> {
    type Item = T;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<T>> {
        Pin::new(&mut self.receiver).poll_next(cx)
    }
}

impl<T> Sender<T> {
    fn from_shared(shared: Arc<Shared<T>>) -> Self {
        shared.add_sender();
        Self { shared }
    }

    /// Sends `value`, suspending while the channel is full and its overflow
    /// policy is [`BufferOverflow::Suspend`].
    ///
    /// On a rendezvous channel this completes only once a receiver has taken
    /// the value. Sending and then receiving on the same rendezvous channel
    /// from one task therefore suspends that task forever.
    ///
    /// Dropping the returned future before it completes withdraws the value.
    ///
    /// # Errors
    ///
    /// * If the channel is closed, or gets closed while this send is parked.
    ///   The value is returned in the error.
    pub fn send(&self, value: T) -> SendFuture<'_, T> {
        SendFuture {
            shared: &self.shared,
            ticket: None,
            value: Some(value),
        }
    }

    /// # Errors
    ///
    /// * [`TrySendError::Full`] if the buffer is full and the channel suspends
    ///   on overflow
    /// * [`TrySendError::Closed`] if the channel is closed
    pub fn try_send(&self, value: T) -> Result<(), TrySendError<T>> {
        self.shared.try_send(value)
    }

    /// Closes the channel. Receivers drain what is buffered, then observe
    /// [`ClosedChannel`].
    ///
    /// Returns `false` if it was already closed.
    pub fn close(&self) -> bool {
        self.shared.close(None)
    }

    /// Like [`Sender::close`], recording `cause` for receivers to observe.
    pub fn close_with(&self, cause: CloseCause) -> bool {
        self.shared.close(Some(cause))
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.shared.is_closed()
    }

    #[must_use]
    pub fn capacity(&self) -> Capacity {
        self.shared.policy().capacity
    }

    #[must_use]
    pub fn same_channel(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }

    pub(crate) fn shared(&self) -> &Shared<T> {
        &self.shared
    }
}

impl<T> Clone for Sender<T> {
    fn clone(&self) -> Self {
        Self::from_shared(self.shared.clone())
    }
}

impl<T> Drop for Sender<T> {
    fn drop(&mut self) {
        self.shared.remove_sender();
    }
}

impl<T> Receiver<T> {
    fn from_shared(shared: Arc<Shared<T>>) -> Self {
        shared.add_receiver();
        Self {
            shared,
            ticket: None,
        }
    }

    /// Receives the next element, suspending until one is available.
    ///
    /// Waiting receivers are served in arrival order. An element is only
    /// removed from the channel when the returned future completes, so
    /// dropping it never loses one.
    ///
    /// # Errors
    ///
    /// * If the channel is closed and every buffered element has been received
    pub fn receive(&self) -> ReceiveFuture<'_, T> {
        ReceiveFuture {
            shared: &self.shared,
            ticket: None,
        }
    }

    /// # Errors
    ///
    /// * [`TryReceiveError::Empty`] if nothing is available right now
    /// * [`TryReceiveError::Closed`] if the channel is closed and drained
    pub fn try_receive(&self) -> Result<T, TryReceiveError> {
        self.shared.try_receive()
    }

    /// Closes the channel and discards everything buffered.
    pub fn cancel(&self) -> bool {
        self.shared.cancel(None)
    }

    pub fn cancel_with(&self, cause: CloseCause) -> bool {
        self.shared.cancel(Some(cause))
    }

    /// Calls `f` for every element until the channel is closed, then cancels
    /// the channel.
    pub async fn consume_each<F, Fut>(self, mut f: F)
    where
        F: FnMut(T) -> Fut,
        Fut: Future<Output = ()>,
    {
        while let Ok(value) = self.receive().await {
            f(value).await;
        }
        self.cancel();
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.shared.is_closed()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.shared.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn capacity(&self) -> Capacity {
        self.shared.policy().capacity
    }

    pub(crate) fn shared(&self) -> &Shared<T> {
        &self.shared
    }
}

impl<T> Clone for Receiver<T> {
    fn clone(&self) -> Self {
        Self::from_shared(self.shared.clone())
    }
}

impl<T> Drop for Receiver<T> {
    fn drop(&mut self) {
        if let Some(ticket) = self.ticket.take() {
            self.shared.cancel_receive(ticket);
        }
        self.shared.remove_receiver();
    }
}

impl<T> Stream for Receiver<T> {
    type Item = T;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<T>> {
        let this = &mut *self;
        this.shared
            .poll_receive(&mut this.ticket, cx)
            .map(Result::ok)
    }
}

/// Future returned by [`Sender::send`].
#[must_use = "futures do nothing unless polled"]
pub struct SendFuture<'a, T> {
    shared: &'a Shared<T>,
    ticket: Option<Ticket>,
    value: Option<T>,
}

impl<T> Unpin for SendFuture<'_, T> {}

impl<T> Future for SendFuture<'_, T> {
    type Output = Result<(), SendError<T>>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = &mut *self;
        this.shared.poll_send(&mut this.ticket, &mut this.value, cx)
    }
}

impl<T> Drop for SendFuture<'_, T> {
    fn drop(&mut self) {
        if let Some(ticket) = self.ticket.take() {
            self.shared.cancel_send(ticket);
        }
    }
}

/// Future returned by [`Receiver::receive`].
#[must_use = "futures do nothing unless polled"]
pub struct ReceiveFuture<'a, T> {
    shared: &'a Shared<T>,
    ticket: Option<Ticket>,
}

impl<T> Future for ReceiveFuture<'_, T> {
    type Output = Result<T, ClosedChannel>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = &mut *self;
        this.shared.poll_receive(&mut this.ticket, cx)
    }
}

impl<T> Drop for ReceiveFuture<'_, T> {
    fn drop(&mut self) {
        if let Some(ticket) = self.ticket.take() {
            self.shared.cancel_receive(ticket);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use futures::StreamExt as _;
    use pretty_assertions::assert_eq;

    use super::*;

    #[test_log::test(tokio::test)]
    async fn buffered_send_then_receive_in_order() {
        let channel = channel(Capacity::Bounded(3));

        for i in 0..3 {
            channel.send(i).await.unwrap();
        }

        assert_eq!(channel.len(), 3);
        for i in 0..3 {
            assert_eq!(channel.receive().await.unwrap(), i);
        }
    }

    #[test_log::test(tokio::test)]
    async fn receive_after_close_drains_then_fails() {
        let channel = channel(Capacity::Unlimited);
        channel.send("a").await.unwrap();
        channel.send("b").await.unwrap();
        assert!(channel.close());

        assert_eq!(channel.receive().await.unwrap(), "a");
        assert_eq!(channel.receive().await.unwrap(), "b");
        assert!(channel.receive().await.is_err());
    }

    #[test_log::test(tokio::test)]
    async fn send_on_closed_channel_returns_the_value() {
        let channel = channel(Capacity::Unlimited);
        channel.close();

        let err = channel.send(5).await.unwrap_err();

        assert_eq!(err.into_value(), 5);
    }

    #[test_log::test(tokio::test)]
    async fn dropping_the_last_sender_closes_the_channel() {
        let (sender, receiver) = channel::<u8>(Capacity::Rendezvous).split();

        drop(sender);

        assert!(receiver.is_closed());
        assert!(receiver.receive().await.is_err());
    }

    #[test_log::test(tokio::test)]
    async fn dropping_the_last_receiver_fails_senders() {
        let (sender, receiver) = channel::<u8>(Capacity::Bounded(1)).split();
        sender.send(1).await.unwrap();

        drop(receiver);

        assert!(sender.send(2).await.is_err());
    }

    #[test_log::test(tokio::test(start_paused = true))]
    async fn dropped_send_withdraws_its_value() {
        let channel = channel(Capacity::Rendezvous);

        let timed_out = tokio::time::timeout(Duration::from_millis(10), channel.send(1)).await;
        assert!(timed_out.is_err());

        assert!(channel.try_receive().unwrap_err().is_empty());
    }

    #[test_log::test(tokio::test)]
    async fn stream_ends_at_close() {
        let channel = channel(Capacity::Bounded(4));
        for i in 1..=4 {
            channel.send(i).await.unwrap();
        }
        let (sender, receiver) = channel.split();
        drop(sender);

        assert_eq!(receiver.collect::<Vec<_>>().await, vec![1, 2, 3, 4]);
    }

    #[test_log::test(tokio::test)]
    async fn consume_each_cancels_when_done() {
        let channel = channel(Capacity::Unlimited);
        channel.send(1).await.unwrap();
        channel.send(2).await.unwrap();
        let sender = channel.sender().clone();
        sender.close();

        let mut seen = vec![];
        channel
            .receiver()
            .clone()
            .consume_each(|value| {
                seen.push(value);
                async {}
            })
            .await;

        assert_eq!(seen, vec![1, 2]);
        assert!(channel.is_closed());
    }
}
