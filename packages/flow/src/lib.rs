#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

//! Cold asynchronous flows.
//!
//! A [`Flow`] describes how to produce a sequence of values; nothing runs
//! until it is collected, and every collection runs the whole chain again
//! from the start. Intermediate operators such as [`Flow::map`] and
//! [`Flow::filter`] return new flows, and terminal operators such as
//! [`Flow::collect`] and [`Flow::fold`] drive the chain to completion.
//!
//! Unless a stage introduces concurrency ([`Flow::buffer`], [`Flow::conflate`],
//! [`Flow::flow_on`], the `flat_map_*` family, [`Flow::zip`] and
//! [`Flow::combine`]), an emitter waits for its collector to finish with each
//! element before producing the next one. Concurrent stages run their
//! upstream in tasks that are cancelled together with the collection.
//!
//! ```rust,no_run
//! # async fn run() -> Result<(), switchy_flow::FlowError> {
//! use switchy_flow::AsFlow as _;
//!
//! let total = (1..=10)
//!     .as_flow()
//!     .filter(|x| x % 2 == 0)
//!     .map(|x| x * x)
//!     .fold(0, |acc, x| acc + x)
//!     .await?;
//! assert_eq!(total, 220);
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

mod builder;
mod collector;
mod combine;
mod completion;
mod context;
mod emitter;
mod error;
mod flatten;
mod operators;
mod terminal;

pub use builder::{AsFlow, empty, flow, flow_of};
pub use collector::{FlowCollector, Stage};
pub use emitter::FlowEmitter;
pub use error::{AbortSignal, FailureMessage, FlowError, FlowState};
pub use flatten::{CONCURRENCY_ENV, DEFAULT_CONCURRENCY, default_concurrency};

/// A cold asynchronous sequence of `T`.
///
/// Cloning a flow is cheap and shares the chain; both clones collect
/// independently.
pub struct Flow<T> {
    stage: Arc<dyn Stage<T>>,
}

impl<T> Clone for Flow<T> {
    fn clone(&self) -> Self {
        Self {
            stage: self.stage.clone(),
        }
    }
}

impl<T> std::fmt::Debug for Flow<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Flow").finish_non_exhaustive()
    }
}

impl<T: Send + 'static> Flow<T> {
    /// Wraps a custom [`Stage`].
    pub fn from_stage(stage: impl Stage<T> + 'static) -> Self {
        Self {
            stage: Arc::new(stage),
        }
    }

    /// Runs the chain once, emitting into `collector`.
    ///
    /// # Errors
    ///
    /// * If any stage of the chain, or `collector` itself, fails
    pub async fn collect_into(
        &self,
        collector: &mut dyn FlowCollector<T>,
    ) -> Result<(), FlowError> {
        self.stage.collect(collector).await
    }
}
