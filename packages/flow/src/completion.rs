use std::sync::Arc;

use async_trait::async_trait;

use crate::{
    Flow, FlowError, FlowState,
    collector::{FlowCollector, Stage},
    context::current_handle,
    emitter::{FlowEmitter, drive},
};

struct Catch<T, F> {
    upstream: Flow<T>,
    handler: F,
}

/// Passes elements through, remembering whether the downstream failed so
/// that its errors are never mistaken for upstream ones.
struct Watch<'a, T> {
    downstream: &'a mut dyn FlowCollector<T>,
    downstream_failed: bool,
}

#[async_trait]
impl<T: Send + 'static> FlowCollector<T> for Watch<'_, T> {
    async fn emit(&mut self, value: T) -> Result<(), FlowError> {
        let result = self.downstream.emit(value).await;
        self.downstream_failed = result.is_err();
        result
    }
}

#[async_trait]
impl<T, F, Fut> Stage<T> for Catch<T, F>
where
    T: Send + 'static,
    F: Fn(FlowError, FlowEmitter<T>) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), FlowError>> + Send,
{
    async fn collect(&self, collector: &mut dyn FlowCollector<T>) -> Result<(), FlowError> {
        let mut watch = Watch {
            downstream: collector,
            downstream_failed: false,
        };
        let error = match self.upstream.collect_into(&mut watch).await {
            Ok(()) => return Ok(()),
            Err(e) if watch.downstream_failed || e.is_aborted() || e.is_cancelled() => {
                return Err(e);
            }
            Err(e) => e,
        };

        log::debug!("catch: handling upstream failure: {error}");
        let (emitter, emissions) = FlowEmitter::new();
        drive((self.handler)(error, emitter), emissions, watch.downstream).await
    }
}

/// Runs a closure when dropped unless disarmed first.
struct OnDrop(Option<Box<dyn FnOnce() + Send>>);

impl OnDrop {
    fn disarm(mut self) {
        self.0 = None;
    }
}

impl Drop for OnDrop {
    fn drop(&mut self) {
        if let Some(action) = self.0.take() {
            action();
        }
    }
}

struct OnCompletion<T, F> {
    upstream: Flow<T>,
    action: Arc<F>,
}

#[async_trait]
impl<T, F, Fut> Stage<T> for OnCompletion<T, F>
where
    T: Send + 'static,
    F: Fn(Option<FlowError>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    async fn collect(&self, collector: &mut dyn FlowCollector<T>) -> Result<(), FlowError> {
        let on_cancel = {
            let action = self.action.clone();
            let handle = current_handle().ok();
            OnDrop(Some(Box::new(move || {
                log::debug!("on_completion: collection cancelled");
                if let Some(handle) = handle {
                    switchy_task::spawn_on(
                        "on_completion",
                        &handle,
                        action(Some(FlowError::Cancelled)),
                    );
                }
            })))
        };

        let result = self.upstream.collect_into(collector).await;
        on_cancel.disarm();

        log::trace!("on_completion: {:?}", FlowState::of(&result));
        let cause = match &result {
            Ok(()) | Err(FlowError::Aborted(_)) => None,
            Err(e) => Some(e.clone()),
        };
        (self.action)(cause).await;
        result
    }
}

impl<T: Send + 'static> Flow<T> {
    /// Handles upstream failures with `handler`, which may emit replacement
    /// values through the emitter it is given and then complete normally, or
    /// return an error to fail the collection.
    ///
    /// Only failures of stages before this call are handled. Failures of the
    /// downstream collector, cancellation and early stops pass through
    /// untouched.
    #[must_use]
    pub fn catch<F, Fut>(&self, handler: F) -> Self
    where
        F: Fn(FlowError, FlowEmitter<T>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), FlowError>> + Send + 'static,
    {
        Self::from_stage(Catch {
            upstream: self.clone(),
            handler,
        })
    }

    /// Runs `action` once the collection ends, with the failure if there was
    /// one. Cancellation is reported as [`FlowError::Cancelled`]; a stop
    /// requested downstream (for example by `take`) counts as completion.
    ///
    /// `action` only observes: the outcome of the collection is unchanged.
    #[must_use]
    pub fn on_completion<F, Fut>(&self, action: F) -> Self
    where
        F: Fn(Option<FlowError>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        Self::from_stage(OnCompletion {
            upstream: self.clone(),
            action: Arc::new(action),
        })
    }
}
