use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

use switchy_channel::{CloseCause, ClosedChannel, ConfigError};
use switchy_task::JobState;
use thiserror::Error;

/// Identifies the stage that stopped a collection early.
///
/// A stage that has seen enough (for example `take`) fails the collection
/// with its own signal and turns exactly that signal back into a normal
/// completion. Signals raised by other stages pass through untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AbortSignal(u64);

static NEXT_SIGNAL: AtomicU64 = AtomicU64::new(0);

impl AbortSignal {
    pub(crate) fn new() -> Self {
        Self(NEXT_SIGNAL.fetch_add(1, Ordering::Relaxed))
    }
}

#[derive(Debug, Error)]
#[error("{0}")]
pub struct FailureMessage(String);

#[derive(Debug, Clone, Error)]
pub enum FlowError {
    /// A terminal that needs at least one element (`reduce`, `first`) saw none.
    #[error("flow was empty")]
    EmptyFlow,
    #[error(transparent)]
    Upstream(Arc<dyn std::error::Error + Send + Sync>),
    #[error("flow collection was cancelled")]
    Cancelled,
    #[error(transparent)]
    Channel(#[from] ClosedChannel),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("flow collection was aborted by a downstream stage")]
    Aborted(AbortSignal),
}

impl FlowError {
    pub fn upstream(error: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Upstream(Arc::new(error))
    }

    pub fn msg(message: impl Into<String>) -> Self {
        Self::upstream(FailureMessage(message.into()))
    }

    /// Recovers the error a failed upstream task closed its channel with.
    pub(crate) fn from_cause(cause: CloseCause) -> Self {
        match cause.downcast_ref::<Self>() {
            Some(error) => error.clone(),
            None => Self::Upstream(cause),
        }
    }

    #[must_use]
    pub const fn is_empty_flow(&self) -> bool {
        matches!(self, Self::EmptyFlow)
    }

    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    #[must_use]
    pub const fn is_aborted(&self) -> bool {
        matches!(self, Self::Aborted(_))
    }

    pub(crate) fn is_aborted_by(&self, signal: AbortSignal) -> bool {
        matches!(self, Self::Aborted(raised) if *raised == signal)
    }
}

/// Where a flow collection is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowState {
    Created,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl FlowState {
    /// The terminal state a finished collection ended in.
    #[must_use]
    pub const fn of(result: &Result<(), FlowError>) -> Self {
        match result {
            Ok(()) | Err(FlowError::Aborted(_)) => Self::Completed,
            Err(FlowError::Cancelled) => Self::Cancelled,
            Err(_) => Self::Failed,
        }
    }

    #[must_use]
    pub const fn is_finished(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

impl From<JobState> for FlowState {
    fn from(value: JobState) -> Self {
        match value {
            JobState::Active => Self::Running,
            JobState::Completed => Self::Completed,
            JobState::Failed => Self::Failed,
            JobState::Cancelled => Self::Cancelled,
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test_log::test]
    fn flow_errors_survive_a_round_trip_through_a_close_cause() {
        let cause: CloseCause = Arc::new(FlowError::EmptyFlow);

        assert!(FlowError::from_cause(cause).is_empty_flow());
    }

    #[test_log::test]
    fn foreign_close_causes_become_upstream_failures() {
        let cause: CloseCause = Arc::new(FailureMessage("disk on fire".to_owned()));

        let error = FlowError::from_cause(cause);

        assert!(matches!(error, FlowError::Upstream(_)));
        assert_eq!(error.to_string(), "disk on fire");
    }

    #[test_log::test]
    fn abort_signals_only_match_their_own_stage() {
        let mine = AbortSignal::new();
        let theirs = AbortSignal::new();

        assert!(FlowError::Aborted(mine).is_aborted_by(mine));
        assert!(!FlowError::Aborted(theirs).is_aborted_by(mine));
        assert!(!FlowError::Cancelled.is_aborted_by(mine));
    }

    #[test_log::test]
    fn state_of_a_finished_collection() {
        assert_eq!(FlowState::of(&Ok(())), FlowState::Completed);
        assert_eq!(
            FlowState::of(&Err(FlowError::Aborted(AbortSignal::new()))),
            FlowState::Completed
        );
        assert_eq!(FlowState::of(&Err(FlowError::Cancelled)), FlowState::Cancelled);
        assert_eq!(FlowState::of(&Err(FlowError::msg("boom"))), FlowState::Failed);
        assert_eq!(FlowState::from(JobState::Active), FlowState::Running);
        assert!(!FlowState::Created.is_finished());
    }
}
