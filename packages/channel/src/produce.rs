use std::{
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
};

use futures::Stream;
use switchy_task::{Job, Scope};

use crate::{Capacity, Channel, ReceiveFuture, Receiver, Sender, TryReceiveError};

/// The receiving side of a channel fed by a job.
///
/// Returned by [`produce`]. The channel closes when the job finishes; if the
/// job fails, receivers observe the failure as the [`crate::ClosedChannel::cause`].
pub struct Producer<T> {
    receiver: Receiver<T>,
    job: Job,
}

impl<T> std::fmt::Debug for Producer<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Producer")
            .field("job", &self.job)
            .finish_non_exhaustive()
    }
}

/// Launches `body` in `scope` with exclusive use of a new channel's sending
/// side and returns the receiving side.
pub fn produce<T, F, Fut, E>(scope: &Scope, capacity: Capacity, body: F) -> Producer<T>
where
    T: Send + 'static,
    F: FnOnce(Sender<T>) -> Fut,
    Fut: Future<Output = Result<(), E>> + Send + 'static,
    E: std::error::Error + Send + Sync + 'static,
{
    produce_into(scope, Channel::new(capacity), body)
}

/// Like [`produce`], for a channel built by the caller (for example with a
/// non-default overflow policy).
pub fn produce_into<T, F, Fut, E>(scope: &Scope, channel: Channel<T>, body: F) -> Producer<T>
where
    T: Send + 'static,
    F: FnOnce(Sender<T>) -> Fut,
    Fut: Future<Output = Result<(), E>> + Send + 'static,
    E: std::error::Error + Send + Sync + 'static,
{
    let (sender, receiver) = channel.split();
    let closer = sender.clone();
    let body = body(sender);

    let job = scope.launch_fallible("produce", async move {
        match body.await {
            Ok(()) => Ok(()),
            Err(e) => {
                let e = Arc::new(e);
                closer.close_with(e.clone());
                Err(e)
            }
        }
    });

    Producer { receiver, job }
}

impl<T> Producer<T> {
    /// # Errors
    ///
    /// * If the producer finished (or failed) and everything it sent has been
    ///   received
    pub fn receive(&self) -> ReceiveFuture<'_, T> {
        self.receiver.receive()
    }

    /// # Errors
    ///
    /// * [`TryReceiveError::Empty`] if nothing is available right now
    /// * [`TryReceiveError::Closed`] if the producer is done and drained
    pub fn try_receive(&self) -> Result<T, TryReceiveError> {
        self.receiver.try_receive()
    }

    /// Cancels the producing job and the channel.
    ///
    /// Tasks parked in `receive` observe [`crate::ClosedChannel`].
    pub fn cancel(&self) {
        self.job.cancel();
        self.receiver.cancel();
    }

    #[must_use]
    pub const fn job(&self) -> &Job {
        &self.job
    }

    #[must_use]
    pub const fn receiver(&self) -> &Receiver<T> {
        &self.receiver
    }

    #[must_use]
    pub fn into_receiver(self) -> Receiver<T> {
        self.receiver
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.receiver.is_closed()
    }
}

impl<T> Stream for Producer<T> {
    type Item = T;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<T>> {
        Pin::new(&mut self.receiver).poll_next(cx)
    }
}

#[cfg(test)]
mod tests {
    use std::{convert::Infallible, time::Duration};

    use futures::StreamExt as _;
    use pretty_assertions::assert_eq;
    use switchy_task::{JobState, delay};

    use super::*;

    #[derive(Debug, thiserror::Error)]
    #[error("producer failed")]
    struct ProducerFailed;

    #[test_log::test(tokio::test)]
    async fn producer_values_are_received_until_completion() {
        let scope = Scope::new("test").unwrap();

        let squares = produce(&scope, Capacity::Rendezvous, |sender| async move {
            for x in 1..=5 {
                if sender.send(x * x).await.is_err() {
                    break;
                }
            }
            Ok::<_, Infallible>(())
        });

        assert_eq!(squares.collect::<Vec<_>>().await, vec![1, 4, 9, 16, 25]);
    }

    #[test_log::test(tokio::test)]
    async fn failing_producer_closes_with_its_cause() {
        let scope = Scope::new("test").unwrap();

        let producer = produce(&scope, Capacity::Unlimited, |sender| async move {
            sender.send(1).await.ok();
            Err::<(), _>(ProducerFailed)
        });

        assert_eq!(producer.receive().await.unwrap(), 1);
        let closed = producer.receive().await.unwrap_err();
        assert_eq!(closed.cause().unwrap().to_string(), "producer failed");
        assert_eq!(producer.job().join().await, JobState::Failed);
    }

    #[test_log::test(tokio::test(start_paused = true))]
    async fn cancelling_the_producer_wakes_parked_receivers() {
        let scope = Scope::new("test").unwrap();

        let producer = produce(&scope, Capacity::Rendezvous, |sender| async move {
            delay(Duration::from_secs(3600)).await;
            sender.send(1).await.ok();
            Ok::<_, Infallible>(())
        });
        let receiver = producer.receiver().clone();
        let waiting = tokio::spawn(async move { receiver.receive().await });
        tokio::task::yield_now().await;

        producer.cancel();

        assert!(waiting.await.unwrap().is_err());
        assert_eq!(producer.job().join().await, JobState::Cancelled);
    }

    #[test_log::test(tokio::test(start_paused = true))]
    async fn cancelling_the_scope_closes_the_channel() {
        let scope = Scope::new("test").unwrap();

        let producer = produce(&scope, Capacity::Rendezvous, |sender| async move {
            let mut x = 0;
            while sender.send(x).await.is_ok() {
                x += 1;
                delay(Duration::from_millis(10)).await;
            }
            Ok::<_, Infallible>(())
        });

        assert_eq!(producer.receive().await.unwrap(), 0);
        scope.cancel();

        assert!(producer.receive().await.is_err());
        assert!(producer.is_closed());
    }
}
