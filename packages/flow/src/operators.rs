use std::marker::PhantomData;

use async_trait::async_trait;

use crate::{
    AbortSignal, Flow, FlowError,
    collector::{FlowCollector, Stage},
    emitter::{FlowEmitter, drive},
};

struct Map<T, F> {
    upstream: Flow<T>,
    f: F,
}

struct MapCollector<'a, U, F> {
    downstream: &'a mut dyn FlowCollector<U>,
    f: &'a F,
}

#[async_trait]
impl<T, U, F, Fut> Stage<U> for Map<T, F>
where
    T: Send + 'static,
    U: Send + 'static,
    F: Fn(T) -> Fut + Send + Sync,
    Fut: Future<Output = Result<U, FlowError>> + Send,
{
    async fn collect(&self, collector: &mut dyn FlowCollector<U>) -> Result<(), FlowError> {
        self.upstream
            .collect_into(&mut MapCollector {
                downstream: collector,
                f: &self.f,
            })
            .await
    }
}

#[async_trait]
impl<T, U, F, Fut> FlowCollector<T> for MapCollector<'_, U, F>
where
    T: Send + 'static,
    U: Send + 'static,
    F: Fn(T) -> Fut + Send + Sync,
    Fut: Future<Output = Result<U, FlowError>> + Send,
{
    async fn emit(&mut self, value: T) -> Result<(), FlowError> {
        let mapped = (self.f)(value).await?;
        self.downstream.emit(mapped).await
    }
}

struct Filter<T, F> {
    upstream: Flow<T>,
    predicate: F,
}

struct FilterCollector<'a, T, F> {
    downstream: &'a mut dyn FlowCollector<T>,
    predicate: &'a F,
}

#[async_trait]
impl<T, F> Stage<T> for Filter<T, F>
where
    T: Send + 'static,
    F: Fn(&T) -> bool + Send + Sync,
{
    async fn collect(&self, collector: &mut dyn FlowCollector<T>) -> Result<(), FlowError> {
        self.upstream
            .collect_into(&mut FilterCollector {
                downstream: collector,
                predicate: &self.predicate,
            })
            .await
    }
}

#[async_trait]
impl<T, F> FlowCollector<T> for FilterCollector<'_, T, F>
where
    T: Send + 'static,
    F: Fn(&T) -> bool + Send + Sync,
{
    async fn emit(&mut self, value: T) -> Result<(), FlowError> {
        if (self.predicate)(&value) {
            self.downstream.emit(value).await
        } else {
            Ok(())
        }
    }
}

struct Transform<T, U, F> {
    upstream: Flow<T>,
    f: F,
    _output: PhantomData<fn() -> U>,
}

struct TransformCollector<'a, U, F> {
    downstream: &'a mut dyn FlowCollector<U>,
    f: &'a F,
}

#[async_trait]
impl<T, U, F, Fut> Stage<U> for Transform<T, U, F>
where
    T: Send + 'static,
    U: Send + 'static,
    F: Fn(T, FlowEmitter<U>) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), FlowError>> + Send,
{
    async fn collect(&self, collector: &mut dyn FlowCollector<U>) -> Result<(), FlowError> {
        self.upstream
            .collect_into(&mut TransformCollector {
                downstream: collector,
                f: &self.f,
            })
            .await
    }
}

#[async_trait]
impl<T, U, F, Fut> FlowCollector<T> for TransformCollector<'_, U, F>
where
    T: Send + 'static,
    U: Send + 'static,
    F: Fn(T, FlowEmitter<U>) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), FlowError>> + Send,
{
    async fn emit(&mut self, value: T) -> Result<(), FlowError> {
        let (emitter, emissions) = FlowEmitter::new();
        drive((self.f)(value, emitter), emissions, &mut *self.downstream).await
    }
}

struct Take<T> {
    upstream: Flow<T>,
    count: usize,
}

struct TakeCollector<'a, T> {
    downstream: &'a mut dyn FlowCollector<T>,
    remaining: usize,
    signal: AbortSignal,
}

#[async_trait]
impl<T: Send + 'static> Stage<T> for Take<T> {
    async fn collect(&self, collector: &mut dyn FlowCollector<T>) -> Result<(), FlowError> {
        if self.count == 0 {
            return Ok(());
        }
        let signal = AbortSignal::new();
        let result = self
            .upstream
            .collect_into(&mut TakeCollector {
                downstream: collector,
                remaining: self.count,
                signal,
            })
            .await;

        match result {
            Err(e) if e.is_aborted_by(signal) => Ok(()),
            result => result,
        }
    }
}

#[async_trait]
impl<T: Send + 'static> FlowCollector<T> for TakeCollector<'_, T> {
    async fn emit(&mut self, value: T) -> Result<(), FlowError> {
        // An upstream that ignored the abort keeps emitting.
        if self.remaining == 0 {
            return Err(FlowError::Aborted(self.signal));
        }
        self.downstream.emit(value).await?;
        self.remaining -= 1;
        if self.remaining == 0 {
            log::trace!("take: limit reached, stopping upstream");
            return Err(FlowError::Aborted(self.signal));
        }
        Ok(())
    }
}

struct TakeWhile<T, F> {
    upstream: Flow<T>,
    predicate: F,
}

struct TakeWhileCollector<'a, T, F> {
    downstream: &'a mut dyn FlowCollector<T>,
    predicate: &'a F,
    signal: AbortSignal,
}

#[async_trait]
impl<T, F> Stage<T> for TakeWhile<T, F>
where
    T: Send + 'static,
    F: Fn(&T) -> bool + Send + Sync,
{
    async fn collect(&self, collector: &mut dyn FlowCollector<T>) -> Result<(), FlowError> {
        let signal = AbortSignal::new();
        let result = self
            .upstream
            .collect_into(&mut TakeWhileCollector {
                downstream: collector,
                predicate: &self.predicate,
                signal,
            })
            .await;

        match result {
            Err(e) if e.is_aborted_by(signal) => Ok(()),
            result => result,
        }
    }
}

#[async_trait]
impl<T, F> FlowCollector<T> for TakeWhileCollector<'_, T, F>
where
    T: Send + 'static,
    F: Fn(&T) -> bool + Send + Sync,
{
    async fn emit(&mut self, value: T) -> Result<(), FlowError> {
        if !(self.predicate)(&value) {
            return Err(FlowError::Aborted(self.signal));
        }
        self.downstream.emit(value).await
    }
}

struct DropFirst<T> {
    upstream: Flow<T>,
    count: usize,
}

struct DropFirstCollector<'a, T> {
    downstream: &'a mut dyn FlowCollector<T>,
    remaining: usize,
}

#[async_trait]
impl<T: Send + 'static> Stage<T> for DropFirst<T> {
    async fn collect(&self, collector: &mut dyn FlowCollector<T>) -> Result<(), FlowError> {
        self.upstream
            .collect_into(&mut DropFirstCollector {
                downstream: collector,
                remaining: self.count,
            })
            .await
    }
}

#[async_trait]
impl<T: Send + 'static> FlowCollector<T> for DropFirstCollector<'_, T> {
    async fn emit(&mut self, value: T) -> Result<(), FlowError> {
        if self.remaining > 0 {
            self.remaining -= 1;
            return Ok(());
        }
        self.downstream.emit(value).await
    }
}

impl<T: Send + 'static> Flow<T> {
    /// Applies `f` to every element.
    #[must_use]
    pub fn map<U, F>(&self, f: F) -> Flow<U>
    where
        U: Send + 'static,
        F: Fn(T) -> U + Send + Sync + 'static,
    {
        self.try_map(move |value| Ok(f(value)))
    }

    /// Applies a fallible `f` to every element; the first error fails the
    /// collection.
    #[must_use]
    pub fn try_map<U, F>(&self, f: F) -> Flow<U>
    where
        U: Send + 'static,
        F: Fn(T) -> Result<U, FlowError> + Send + Sync + 'static,
    {
        Flow::from_stage(Map {
            upstream: self.clone(),
            f: move |value| std::future::ready(f(value)),
        })
    }

    /// Applies an async `f` to every element, one at a time.
    #[must_use]
    pub fn map_async<U, F, Fut>(&self, f: F) -> Flow<U>
    where
        U: Send + 'static,
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = U> + Send + 'static,
    {
        Flow::from_stage(Map {
            upstream: self.clone(),
            f: move |value| {
                let mapped = f(value);
                async move { Ok::<_, FlowError>(mapped.await) }
            },
        })
    }

    /// Runs `action` on every element before passing it on unchanged.
    #[must_use]
    pub fn on_each<F, Fut>(&self, action: F) -> Self
    where
        T: Clone,
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), FlowError>> + Send + 'static,
    {
        Flow::from_stage(Map {
            upstream: self.clone(),
            f: move |value: T| {
                let done = action(value.clone());
                async move {
                    done.await?;
                    Ok::<_, FlowError>(value)
                }
            },
        })
    }

    /// Passes on only the elements `predicate` accepts.
    #[must_use]
    pub fn filter<F>(&self, predicate: F) -> Self
    where
        F: Fn(&T) -> bool + Send + Sync + 'static,
    {
        Self::from_stage(Filter {
            upstream: self.clone(),
            predicate,
        })
    }

    /// Runs `f` for every element; `f` may emit any number of values
    /// downstream through the emitter it is given.
    #[must_use]
    pub fn transform<U, F, Fut>(&self, f: F) -> Flow<U>
    where
        U: Send + 'static,
        F: Fn(T, FlowEmitter<U>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), FlowError>> + Send + 'static,
    {
        Flow::from_stage(Transform {
            upstream: self.clone(),
            f,
            _output: PhantomData,
        })
    }

    /// Stops the upstream once `count` elements have been passed on.
    ///
    /// `take(0)` completes without collecting the upstream at all.
    #[must_use]
    pub fn take(&self, count: usize) -> Self {
        Self::from_stage(Take {
            upstream: self.clone(),
            count,
        })
    }

    /// Passes elements on until `predicate` first rejects one, then stops the
    /// upstream. The rejected element is not emitted.
    #[must_use]
    pub fn take_while<F>(&self, predicate: F) -> Self
    where
        F: Fn(&T) -> bool + Send + Sync + 'static,
    {
        Self::from_stage(TakeWhile {
            upstream: self.clone(),
            predicate,
        })
    }

    /// Skips the first `count` elements.
    #[must_use]
    pub fn drop(&self, count: usize) -> Self {
        Self::from_stage(DropFirst {
            upstream: self.clone(),
            count,
        })
    }
}
