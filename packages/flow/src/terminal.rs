use async_trait::async_trait;
use switchy_channel::{Capacity, Producer, produce};
use switchy_task::{Job, Scope};

use crate::{
    AbortSignal, Flow, FlowError,
    collector::{Accumulate, FlowCollector, ForEach, SendCollector},
};

struct First<T> {
    value: Option<T>,
    signal: AbortSignal,
}

#[async_trait]
impl<T: Send + 'static> FlowCollector<T> for First<T> {
    async fn emit(&mut self, value: T) -> Result<(), FlowError> {
        self.value = Some(value);
        Err(FlowError::Aborted(self.signal))
    }
}

impl<T: Send + 'static> Flow<T> {
    /// Collects every element with `action`.
    ///
    /// # Errors
    ///
    /// * If the flow fails, or `action` fails
    pub async fn collect<F, Fut>(&self, action: F) -> Result<(), FlowError>
    where
        F: FnMut(T) -> Fut + Send,
        Fut: Future<Output = Result<(), FlowError>> + Send,
    {
        self.collect_into(&mut ForEach { action }).await
    }

    /// Runs the flow for its side effects, discarding the elements.
    ///
    /// # Errors
    ///
    /// * If the flow fails
    pub async fn collect_all(&self) -> Result<(), FlowError> {
        self.collect(|_| std::future::ready(Ok(()))).await
    }

    /// # Errors
    ///
    /// * If the flow fails
    pub async fn to_vec(&self) -> Result<Vec<T>, FlowError> {
        self.fold(vec![], |mut values, value| {
            values.push(value);
            values
        })
        .await
    }

    /// The first element; the upstream is stopped as soon as it arrives.
    ///
    /// # Errors
    ///
    /// * [`FlowError::EmptyFlow`] if the flow completes without emitting
    /// * If the flow fails before emitting
    pub async fn first(&self) -> Result<T, FlowError> {
        let signal = AbortSignal::new();
        let mut first = First {
            value: None,
            signal,
        };
        match self.collect_into(&mut first).await {
            Ok(()) => {}
            Err(e) if e.is_aborted_by(signal) => {}
            Err(e) => return Err(e),
        }
        first.value.ok_or(FlowError::EmptyFlow)
    }

    /// Combines the elements pairwise, left to right, starting from the first.
    ///
    /// # Errors
    ///
    /// * [`FlowError::EmptyFlow`] if the flow completes without emitting
    /// * If the flow fails
    pub async fn reduce<F>(&self, mut operation: F) -> Result<T, FlowError>
    where
        F: FnMut(T, T) -> T + Send,
    {
        let mut reduce = Accumulate {
            acc: None,
            step: |acc: &mut Option<T>, value| {
                *acc = Some(match acc.take() {
                    Some(previous) => operation(previous, value),
                    None => value,
                });
            },
        };
        self.collect_into(&mut reduce).await?;
        reduce.acc.ok_or(FlowError::EmptyFlow)
    }

    /// Like [`Flow::reduce`], starting from `initial`. An empty flow folds to
    /// `initial`.
    ///
    /// # Errors
    ///
    /// * If the flow fails
    pub async fn fold<R, F>(&self, initial: R, mut operation: F) -> Result<R, FlowError>
    where
        R: Send,
        F: FnMut(R, T) -> R + Send,
    {
        let mut fold = Accumulate {
            acc: Some(initial),
            step: |acc: &mut Option<R>, value| {
                *acc = acc.take().map(|previous| operation(previous, value));
            },
        };
        self.collect_into(&mut fold).await?;
        fold.acc.ok_or(FlowError::EmptyFlow)
    }

    /// # Errors
    ///
    /// * If the flow fails
    pub async fn count(&self) -> Result<usize, FlowError> {
        self.fold(0, |count, _| count + 1).await
    }

    /// Counts the elements `predicate` accepts.
    ///
    /// # Errors
    ///
    /// * If the flow fails
    pub async fn count_matching<F>(&self, predicate: F) -> Result<usize, FlowError>
    where
        F: Fn(&T) -> bool + Send,
    {
        self.fold(0, move |count, value| count + usize::from(predicate(&value))).await
    }

    /// Collects the flow in a new job of `scope` and returns the job.
    ///
    /// The job fails if the flow does; cancelling it (or the scope) cancels
    /// the collection.
    #[must_use]
    pub fn launch_in(&self, scope: &Scope) -> Job {
        let flow = self.clone();
        scope.launch_fallible("flow", async move { flow.collect_all().await })
    }

    /// Collects the flow in a job of `scope`, sending every element into a
    /// channel of `capacity`. Receivers see the flow's failure as the
    /// channel's close cause.
    #[must_use]
    pub fn produce_in(&self, scope: &Scope, capacity: Capacity) -> Producer<T> {
        let flow = self.clone();
        produce(scope, capacity, move |sender| async move {
            match flow.collect_into(&mut SendCollector::new(&sender)).await {
                Err(FlowError::Channel(_)) if sender.is_closed() => {
                    log::trace!("produce_in: receivers went away, stopping");
                    Ok(())
                }
                result => result,
            }
        })
    }
}
