use async_trait::async_trait;
use switchy_channel::{Capacity, Channel, ClosedChannel, Receiver, Select};
use switchy_task::TaskGuard;

use crate::{
    AbortSignal, Flow, FlowError,
    collector::{FlowCollector, Stage},
    context::{current_handle, finish_upstream, spawn_upstream},
};

struct Zip<A, B, F> {
    first: Flow<A>,
    second: Flow<B>,
    f: F,
}

struct ZipCollector<'a, B, C, F> {
    downstream: &'a mut dyn FlowCollector<C>,
    second: &'a Receiver<B>,
    f: &'a F,
    signal: AbortSignal,
}

#[async_trait]
impl<A, B, C, F> Stage<C> for Zip<A, B, F>
where
    A: Send + 'static,
    B: Send + 'static,
    C: Send + 'static,
    F: Fn(A, B) -> C + Send + Sync,
{
    async fn collect(&self, collector: &mut dyn FlowCollector<C>) -> Result<(), FlowError> {
        let handle = current_handle()?;
        let (second, second_task) = spawn_upstream(
            "zip",
            &self.second,
            Channel::new(Capacity::Rendezvous),
            &handle,
        );

        let signal = AbortSignal::new();
        let result = self
            .first
            .collect_into(&mut ZipCollector {
                downstream: collector,
                second: &second,
                f: &self.f,
                signal,
            })
            .await;

        match result {
            Err(e) if e.is_aborted_by(signal) => {
                log::trace!("zip: second flow ended first");
                finish_upstream(ClosedChannel::default(), second_task).await
            }
            result => result,
        }
    }
}

#[async_trait]
impl<A, B, C, F> FlowCollector<A> for ZipCollector<'_, B, C, F>
where
    A: Send + 'static,
    B: Send + 'static,
    C: Send + 'static,
    F: Fn(A, B) -> C + Send + Sync,
{
    async fn emit(&mut self, value: A) -> Result<(), FlowError> {
        match self.second.receive().await {
            Ok(other) => self.downstream.emit((self.f)(value, other)).await,
            Err(closed) => match closed.into_cause() {
                Some(cause) => Err(FlowError::from_cause(cause)),
                None => Err(FlowError::Aborted(self.signal)),
            },
        }
    }
}

enum Update<A, B> {
    First(Result<A, ClosedChannel>),
    Second(Result<B, ClosedChannel>),
}

struct Combine<A, B, F> {
    first: Flow<A>,
    second: Flow<B>,
    f: F,
}

/// One side of a [`Combine`]: its channel, the task feeding it and the most
/// recent element it produced.
struct Side<T> {
    receiver: Receiver<T>,
    task: Option<TaskGuard<()>>,
    latest: Option<T>,
}

impl<T> Side<T> {
    const fn is_open(&self) -> bool {
        self.task.is_some()
    }

    async fn update(&mut self, received: Result<T, ClosedChannel>) -> Result<(), FlowError> {
        match received {
            Ok(value) => {
                self.latest = Some(value);
                Ok(())
            }
            Err(closed) => match self.task.take() {
                Some(task) => finish_upstream(closed, task).await,
                None => Ok(()),
            },
        }
    }
}

#[async_trait]
impl<A, B, C, F> Stage<C> for Combine<A, B, F>
where
    A: Clone + Send + Sync + 'static,
    B: Clone + Send + Sync + 'static,
    C: Send + 'static,
    F: Fn(A, B) -> C + Send + Sync,
{
    async fn collect(&self, collector: &mut dyn FlowCollector<C>) -> Result<(), FlowError> {
        let handle = current_handle()?;
        let (receiver, task) =
            spawn_upstream("combine", &self.first, Channel::new(Capacity::Rendezvous), &handle);
        let mut first = Side {
            receiver,
            task: Some(task),
            latest: None,
        };
        let (receiver, task) =
            spawn_upstream("combine", &self.second, Channel::new(Capacity::Rendezvous), &handle);
        let mut second = Side {
            receiver,
            task: Some(task),
            latest: None,
        };

        while first.is_open() || second.is_open() {
            let mut select = Select::new();
            if first.is_open() {
                select = select.on_receive_catching(&first.receiver, Update::First);
            }
            if second.is_open() {
                select = select.on_receive_catching(&second.receiver, Update::Second);
            }

            match select.await? {
                Update::First(received) => {
                    let updated = received.is_ok();
                    first.update(received).await?;
                    if !updated {
                        continue;
                    }
                }
                Update::Second(received) => {
                    let updated = received.is_ok();
                    second.update(received).await?;
                    if !updated {
                        continue;
                    }
                }
            }

            if let (Some(a), Some(b)) = (&first.latest, &second.latest) {
                collector.emit((self.f)(a.clone(), b.clone())).await?;
            }
        }
        Ok(())
    }
}

impl<A: Send + 'static> Flow<A> {
    /// Pairs the elements of this flow and `other` in order, combining each
    /// pair with `f`. Completes as soon as either flow does; the other is
    /// cancelled.
    #[must_use]
    pub fn zip<B, C, F>(&self, other: &Flow<B>, f: F) -> Flow<C>
    where
        B: Send + 'static,
        C: Send + 'static,
        F: Fn(A, B) -> C + Send + Sync + 'static,
    {
        Flow::from_stage(Zip {
            first: self.clone(),
            second: other.clone(),
            f,
        })
    }

    /// Emits `f(a, b)` for the most recent elements of both flows whenever
    /// either emits, once both have emitted at least once. Completes when
    /// both flows have.
    #[must_use]
    pub fn combine<B, C, F>(&self, other: &Flow<B>, f: F) -> Flow<C>
    where
        A: Clone + Sync,
        B: Clone + Send + Sync + 'static,
        C: Send + 'static,
        F: Fn(A, B) -> C + Send + Sync + 'static,
    {
        Flow::from_stage(Combine {
            first: self.clone(),
            second: other.clone(),
            f,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use pretty_assertions::assert_eq;
    use switchy_task::delay;

    use super::*;
    use crate::{AsFlow as _, flow};

    fn every<T: Clone + Send + Sync + 'static>(millis: u64, values: Vec<T>) -> Flow<T> {
        values.as_flow().on_each(move |_| async move {
            delay(Duration::from_millis(millis)).await;
            Ok(())
        })
    }

    #[test_log::test(tokio::test)]
    async fn zip_pairs_elements_until_the_shorter_flow_ends() {
        let numbers = (1..=3).as_flow();
        let words = vec!["one", "two", "three", "four"].as_flow();

        let pairs = numbers.zip(&words, |a, b| format!("{a} -> {b}"));

        assert_eq!(
            pairs.to_vec().await.unwrap(),
            vec!["1 -> one", "2 -> two", "3 -> three"]
        );
    }

    #[test_log::test(tokio::test)]
    async fn zip_stops_when_the_second_flow_is_shorter() {
        let numbers = (1..=10).as_flow();
        let words = vec!["one", "two"].as_flow();

        let pairs = numbers.zip(&words, |a, b| (a, b));

        assert_eq!(pairs.to_vec().await.unwrap(), vec![(1, "one"), (2, "two")]);
    }

    #[test_log::test(tokio::test)]
    async fn zip_fails_when_the_second_flow_fails() {
        let numbers = (1..=10).as_flow();
        let broken = flow(|emitter| async move {
            emitter.emit("one").await?;
            Err(FlowError::msg("second flow broke"))
        });

        let error = numbers
            .zip(&broken, |a, b| (a, b))
            .to_vec()
            .await
            .unwrap_err();

        assert_eq!(error.to_string(), "second flow broke");
    }

    #[test_log::test(tokio::test(start_paused = true))]
    async fn zip_waits_for_the_slower_flow() {
        let numbers = every(100, vec![1, 2, 3]);
        let words = every(400, vec!["one", "two", "three"]);

        let start = tokio::time::Instant::now();
        let pairs = numbers
            .zip(&words, |a, b| format!("{a} -> {b}"))
            .to_vec()
            .await
            .unwrap();

        assert_eq!(pairs, vec!["1 -> one", "2 -> two", "3 -> three"]);
        assert!(start.elapsed() >= Duration::from_millis(1200));
    }

    #[test_log::test(tokio::test(start_paused = true))]
    async fn combine_uses_the_latest_element_of_each_flow() {
        let numbers = every(100, vec![1, 2, 3]);
        let words = every(250, vec!["one", "two", "three"]);

        let combined = numbers.combine(&words, |a, b| format!("{a} {b}"));

        assert_eq!(
            combined.to_vec().await.unwrap(),
            vec!["2 one", "3 one", "3 two", "3 three"]
        );
    }

    #[test_log::test(tokio::test)]
    async fn combine_fails_when_either_flow_fails() {
        let numbers = (1..=3).as_flow();
        let broken = flow(|emitter| async move {
            emitter.emit("one").await?;
            Err(FlowError::msg("combined flow broke"))
        });

        let error = numbers
            .combine(&broken, |a, b| (a, b))
            .count()
            .await
            .unwrap_err();

        assert_eq!(error.to_string(), "combined flow broke");
    }
}
