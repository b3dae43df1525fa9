use std::sync::{Arc, LazyLock};

use async_trait::async_trait;
use switchy_channel::{Capacity, Channel, Sender, config::positive_env_usize};
use switchy_task::TaskGuard;
use tokio::{sync::Semaphore, task::JoinSet};

use crate::{
    Flow, FlowError,
    collector::{FlowCollector, SendCollector, Stage},
    context::forward_from,
};

/// How many inner flows [`Flow::flat_map_merge_default`] collects at once
/// when not overridden.
pub const DEFAULT_CONCURRENCY: usize = 16;

/// Overrides [`DEFAULT_CONCURRENCY`].
pub const CONCURRENCY_ENV: &str = "SWITCHY_FLOW_CONCURRENCY";

static CONCURRENCY: LazyLock<usize> =
    LazyLock::new(|| positive_env_usize(CONCURRENCY_ENV, DEFAULT_CONCURRENCY));

#[must_use]
pub fn default_concurrency() -> usize {
    *CONCURRENCY
}

/// Collects an inner flow into the stage's channel, closing the channel with
/// the failure if it fails.
async fn collect_inner<U: Send + 'static>(flow: Flow<U>, sender: Sender<U>) {
    if let Err(e) = flow.collect_into(&mut SendCollector::new(&sender)).await {
        log::debug!("inner flow failed: {e}");
        sender.close_with(Arc::new(e));
    }
}

struct FlatMapConcat<T, F> {
    upstream: Flow<T>,
    f: F,
}

struct ConcatCollector<'a, U, F> {
    downstream: &'a mut dyn FlowCollector<U>,
    f: &'a F,
}

#[async_trait]
impl<T, U, F> Stage<U> for FlatMapConcat<T, F>
where
    T: Send + 'static,
    U: Send + 'static,
    F: Fn(T) -> Flow<U> + Send + Sync,
{
    async fn collect(&self, collector: &mut dyn FlowCollector<U>) -> Result<(), FlowError> {
        self.upstream
            .collect_into(&mut ConcatCollector {
                downstream: collector,
                f: &self.f,
            })
            .await
    }
}

#[async_trait]
impl<T, U, F> FlowCollector<T> for ConcatCollector<'_, U, F>
where
    T: Send + 'static,
    U: Send + 'static,
    F: Fn(T) -> Flow<U> + Send + Sync,
{
    async fn emit(&mut self, value: T) -> Result<(), FlowError> {
        (self.f)(value).collect_into(&mut *self.downstream).await
    }
}

struct FlatMapMerge<T, F> {
    upstream: Flow<T>,
    f: Arc<F>,
    concurrency: usize,
}

struct MergeCollector<'a, U, F> {
    f: &'a F,
    sender: &'a Sender<U>,
    permits: &'a Arc<Semaphore>,
    inner: &'a mut JoinSet<()>,
}

#[async_trait]
impl<T, U, F> Stage<U> for FlatMapMerge<T, F>
where
    T: Send + 'static,
    U: Send + 'static,
    F: Fn(T) -> Flow<U> + Send + Sync + 'static,
{
    async fn collect(&self, collector: &mut dyn FlowCollector<U>) -> Result<(), FlowError> {
        let (sender, receiver) = Channel::new(Capacity::Buffered).split();
        let upstream = self.upstream.clone();
        let f = self.f.clone();
        let permits = Arc::new(Semaphore::new(self.concurrency));

        let coordinator = switchy_task::spawn_guarded("flat_map_merge", async move {
            let mut inner = JoinSet::new();
            let result = upstream
                .collect_into(&mut MergeCollector {
                    f: &*f,
                    sender: &sender,
                    permits: &permits,
                    inner: &mut inner,
                })
                .await;
            if let Err(e) = result {
                sender.close_with(Arc::new(e));
                return;
            }
            while let Some(joined) = inner.join_next().await {
                if let Err(e) = joined
                    && e.is_panic()
                {
                    sender.close_with(Arc::new(FlowError::upstream(e)));
                    return;
                }
            }
        });

        forward_from(&receiver, coordinator, collector).await
    }
}

#[async_trait]
impl<T, U, F> FlowCollector<T> for MergeCollector<'_, U, F>
where
    T: Send + 'static,
    U: Send + 'static,
    F: Fn(T) -> Flow<U> + Send + Sync,
{
    async fn emit(&mut self, value: T) -> Result<(), FlowError> {
        let permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(FlowError::upstream)?;
        let flow = (self.f)(value);
        let sender = self.sender.clone();

        log::trace!("flat_map_merge: starting inner flow ({} running)", self.inner.len());
        switchy_task::spawn_in("flat_map_merge: inner", &mut *self.inner, async move {
            collect_inner(flow, sender).await;
            drop(permit);
        });

        while let Some(joined) = self.inner.try_join_next() {
            if let Err(e) = joined
                && e.is_panic()
            {
                return Err(FlowError::upstream(e));
            }
        }
        Ok(())
    }
}

struct FlatMapLatest<T, F> {
    upstream: Flow<T>,
    f: Arc<F>,
}

struct LatestCollector<'a, U, F> {
    f: &'a F,
    sender: &'a Sender<U>,
    current: &'a mut Option<TaskGuard<()>>,
}

#[async_trait]
impl<T, U, F> Stage<U> for FlatMapLatest<T, F>
where
    T: Send + 'static,
    U: Send + 'static,
    F: Fn(T) -> Flow<U> + Send + Sync + 'static,
{
    async fn collect(&self, collector: &mut dyn FlowCollector<U>) -> Result<(), FlowError> {
        let (sender, receiver) = Channel::new(Capacity::Buffered).split();
        let upstream = self.upstream.clone();
        let f = self.f.clone();

        let coordinator = switchy_task::spawn_guarded("flat_map_latest", async move {
            let mut current = None;
            let result = upstream
                .collect_into(&mut LatestCollector {
                    f: &*f,
                    sender: &sender,
                    current: &mut current,
                })
                .await;
            if let Err(e) = result {
                sender.close_with(Arc::new(e));
                return;
            }
            if let Some(last) = current
                && let Err(e) = last.join().await
                && e.is_panic()
            {
                sender.close_with(Arc::new(FlowError::upstream(e)));
            }
        });

        forward_from(&receiver, coordinator, collector).await
    }
}

#[async_trait]
impl<T, U, F> FlowCollector<T> for LatestCollector<'_, U, F>
where
    T: Send + 'static,
    U: Send + 'static,
    F: Fn(T) -> Flow<U> + Send + Sync,
{
    async fn emit(&mut self, value: T) -> Result<(), FlowError> {
        if let Some(previous) = self.current.take() {
            previous.abort();
            if let Err(e) = previous.join().await
                && e.is_panic()
            {
                return Err(FlowError::upstream(e));
            }
            log::trace!("flat_map_latest: cancelled the previous inner flow");
        }

        let flow = (self.f)(value);
        let sender = self.sender.clone();
        *self.current = Some(switchy_task::spawn_guarded(
            "flat_map_latest inner",
            collect_inner(flow, sender),
        ));
        Ok(())
    }
}

impl<T: Send + 'static> Flow<T> {
    /// Maps every element to a flow and emits the inner flows one after the
    /// other, each collected to completion before the next element is taken.
    #[must_use]
    pub fn flat_map_concat<U, F>(&self, f: F) -> Flow<U>
    where
        U: Send + 'static,
        F: Fn(T) -> Flow<U> + Send + Sync + 'static,
    {
        Flow::from_stage(FlatMapConcat {
            upstream: self.clone(),
            f,
        })
    }

    /// Maps every element to a flow and collects up to `concurrency` inner
    /// flows at once, emitting their elements as they arrive.
    ///
    /// A `concurrency` of 0 is treated as 1. The upstream suspends while
    /// `concurrency` inner flows are running.
    #[must_use]
    pub fn flat_map_merge<U, F>(&self, concurrency: usize, f: F) -> Flow<U>
    where
        U: Send + 'static,
        F: Fn(T) -> Flow<U> + Send + Sync + 'static,
    {
        Flow::from_stage(FlatMapMerge {
            upstream: self.clone(),
            f: Arc::new(f),
            concurrency: concurrency.max(1),
        })
    }

    /// [`Flow::flat_map_merge`] with [`default_concurrency`].
    #[must_use]
    pub fn flat_map_merge_default<U, F>(&self, f: F) -> Flow<U>
    where
        U: Send + 'static,
        F: Fn(T) -> Flow<U> + Send + Sync + 'static,
    {
        self.flat_map_merge(default_concurrency(), f)
    }

    /// Maps every element to a flow, cancelling the inner flow of the previous
    /// element as soon as a new element arrives.
    #[must_use]
    pub fn flat_map_latest<U, F>(&self, f: F) -> Flow<U>
    where
        U: Send + 'static,
        F: Fn(T) -> Flow<U> + Send + Sync + 'static,
    {
        Flow::from_stage(FlatMapLatest {
            upstream: self.clone(),
            f: Arc::new(f),
        })
    }
}
