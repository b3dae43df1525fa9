use std::sync::Arc;

use thiserror::Error;

use crate::{BufferOverflow, Capacity};

/// The failure a channel was closed with, if any.
pub type CloseCause = Arc<dyn std::error::Error + Send + Sync>;

/// Returned by operations on a channel that is closed (and, for receives,
/// drained).
#[derive(Debug, Clone, Default, Error)]
#[error("channel was closed")]
pub struct ClosedChannel {
    #[source]
    cause: Option<CloseCause>,
}

impl ClosedChannel {
    #[must_use]
    pub const fn new(cause: Option<CloseCause>) -> Self {
        Self { cause }
    }

    /// The error passed to `close_with`/`cancel_with`, if any.
    #[must_use]
    pub const fn cause(&self) -> Option<&CloseCause> {
        self.cause.as_ref()
    }

    #[must_use]
    pub fn into_cause(self) -> Option<CloseCause> {
        self.cause
    }
}

/// A send on a closed channel. Gives the value back.
#[derive(Error)]
#[error("sending on a closed channel")]
pub struct SendError<T> {
    value: T,
    #[source]
    closed: ClosedChannel,
}

impl<T> std::fmt::Debug for SendError<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SendError")
            .field("closed", &self.closed)
            .finish_non_exhaustive()
    }
}

impl<T> SendError<T> {
    pub(crate) const fn new(value: T, closed: ClosedChannel) -> Self {
        Self { value, closed }
    }

    pub const fn value(&self) -> &T {
        &self.value
    }

    pub fn into_value(self) -> T {
        self.value
    }

    pub const fn closed(&self) -> &ClosedChannel {
        &self.closed
    }

    pub fn into_parts(self) -> (T, ClosedChannel) {
        (self.value, self.closed)
    }
}

impl<T> From<SendError<T>> for ClosedChannel {
    fn from(e: SendError<T>) -> Self {
        e.closed
    }
}

#[derive(Error)]
pub enum TrySendError<T> {
    /// The buffer is full and the overflow policy is to suspend.
    #[error("channel is full")]
    Full(T),
    #[error(transparent)]
    Closed(#[from] SendError<T>),
}

impl<T> std::fmt::Debug for TrySendError<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Full(_t) => f.debug_tuple("TrySendError::Full").finish_non_exhaustive(),
            Self::Closed(e) => f.debug_tuple("TrySendError::Closed").field(e).finish(),
        }
    }
}

impl<T> TrySendError<T> {
    pub fn into_value(self) -> T {
        match self {
            Self::Full(value) => value,
            Self::Closed(e) => e.into_value(),
        }
    }

    pub const fn is_full(&self) -> bool {
        matches!(self, Self::Full(_))
    }

    pub const fn is_closed(&self) -> bool {
        matches!(self, Self::Closed(_))
    }
}

#[derive(Debug, Clone, Error)]
pub enum TryReceiveError {
    #[error("channel is empty")]
    Empty,
    #[error(transparent)]
    Closed(#[from] ClosedChannel),
}

impl TryReceiveError {
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        matches!(self, Self::Empty)
    }

    #[must_use]
    pub const fn is_closed(&self) -> bool {
        matches!(self, Self::Closed(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("{capacity:?} capacity cannot be combined with {overflow:?} overflow")]
    Unsupported {
        capacity: Capacity,
        overflow: BufferOverflow,
    },
}
