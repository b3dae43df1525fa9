use async_trait::async_trait;

use crate::{
    Flow, FlowError,
    collector::{FlowCollector, Stage},
    emitter::{FlowEmitter, drive},
};

struct Builder<F> {
    body: F,
}

#[async_trait]
impl<T, F, Fut> Stage<T> for Builder<F>
where
    T: Send + 'static,
    F: Fn(FlowEmitter<T>) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), FlowError>> + Send,
{
    async fn collect(&self, collector: &mut dyn FlowCollector<T>) -> Result<(), FlowError> {
        let (emitter, emissions) = FlowEmitter::new();
        drive((self.body)(emitter), emissions, collector).await
    }
}

/// Builds a flow from an async body that emits values through the
/// [`FlowEmitter`] it is given.
///
/// `body` runs again, from the start, every time the flow is collected.
///
/// ```rust,no_run
/// # use std::time::Duration;
/// let numbers = switchy_flow::flow(|emitter| async move {
///     for x in 1..=3 {
///         switchy_task::delay(Duration::from_millis(100)).await;
///         emitter.emit(x).await?;
///     }
///     Ok(())
/// });
/// ```
pub fn flow<T, F, Fut>(body: F) -> Flow<T>
where
    T: Send + 'static,
    F: Fn(FlowEmitter<T>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), FlowError>> + Send + 'static,
{
    Flow::from_stage(Builder { body })
}

struct Values<T> {
    values: Vec<T>,
}

#[async_trait]
impl<T> Stage<T> for Values<T>
where
    T: Clone + Send + Sync + 'static,
{
    async fn collect(&self, collector: &mut dyn FlowCollector<T>) -> Result<(), FlowError> {
        for value in &self.values {
            collector.emit(value.clone()).await?;
        }
        Ok(())
    }
}

/// A flow emitting `values` in order.
pub fn flow_of<T>(values: impl IntoIterator<Item = T>) -> Flow<T>
where
    T: Clone + Send + Sync + 'static,
{
    Flow::from_stage(Values {
        values: values.into_iter().collect(),
    })
}

struct Empty;

#[async_trait]
impl<T: Send + 'static> Stage<T> for Empty {
    async fn collect(&self, _collector: &mut dyn FlowCollector<T>) -> Result<(), FlowError> {
        Ok(())
    }
}

/// A flow that completes without emitting anything.
#[must_use]
pub fn empty<T: Send + 'static>() -> Flow<T> {
    Flow::from_stage(Empty)
}

/// Converts a finite collection into a flow of its elements.
pub trait AsFlow<T> {
    fn as_flow(self) -> Flow<T>;
}

impl<I> AsFlow<I::Item> for I
where
    I: IntoIterator,
    I::Item: Clone + Send + Sync + 'static,
{
    fn as_flow(self) -> Flow<I::Item> {
        flow_of(self)
    }
}
