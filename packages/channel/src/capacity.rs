use crate::{config, error::ConfigError};

/// How many elements a channel buffers before senders are affected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capacity {
    /// No buffer: a send completes only when a receiver takes the value.
    Rendezvous,
    /// A buffer of the configured default size (see [`config::buffered_capacity`]).
    Buffered,
    Bounded(usize),
    Unlimited,
    /// Keeps only the most recently sent value.
    Conflated,
}

impl From<usize> for Capacity {
    fn from(value: usize) -> Self {
        if value == 0 {
            Self::Rendezvous
        } else {
            Self::Bounded(value)
        }
    }
}

/// What a send does when the buffer is full.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferOverflow {
    /// Suspend the sender until there is room.
    #[default]
    Suspend,
    /// Evict the oldest buffered value to make room.
    DropOldest,
    /// Discard the value being sent.
    DropLatest,
}

/// A capacity and overflow pairing resolved to a concrete buffer limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Policy {
    pub capacity: Capacity,
    /// `None` is unbounded.
    pub limit: Option<usize>,
    pub overflow: BufferOverflow,
}

impl Policy {
    pub fn new(capacity: Capacity, overflow: BufferOverflow) -> Result<Self, ConfigError> {
        if capacity == Capacity::Conflated && overflow != BufferOverflow::Suspend {
            return Err(ConfigError::Unsupported { capacity, overflow });
        }
        Ok(Self::resolve(capacity, overflow))
    }

    /// Every capacity accepts [`BufferOverflow::Suspend`].
    pub fn suspending(capacity: Capacity) -> Self {
        Self::resolve(capacity, BufferOverflow::Suspend)
    }

    fn resolve(capacity: Capacity, overflow: BufferOverflow) -> Self {
        let dropping = overflow != BufferOverflow::Suspend;

        let (limit, overflow) = match capacity {
            Capacity::Rendezvous | Capacity::Bounded(0) => (Some(usize::from(dropping)), overflow),
            Capacity::Bounded(n) => (Some(n), overflow),
            Capacity::Buffered if dropping => (Some(1), overflow),
            Capacity::Buffered => (Some(config::buffered_capacity()), overflow),
            Capacity::Unlimited => (None, BufferOverflow::Suspend),
            Capacity::Conflated => (Some(1), BufferOverflow::DropOldest),
        };

        Self {
            capacity,
            limit,
            overflow,
        }
    }

    pub fn has_room(&self, len: usize) -> bool {
        self.limit.is_none_or(|limit| len < limit)
    }

    /// Whether elements only ever pass straight from a sender to a receiver.
    pub const fn is_rendezvous(&self) -> bool {
        matches!(self.limit, Some(0))
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test_log::test]
    fn rendezvous_has_no_buffer() {
        let policy = Policy::new(Capacity::Rendezvous, BufferOverflow::Suspend).unwrap();

        assert_eq!(policy.limit, Some(0));
        assert!(!policy.has_room(0));
        assert!(policy.is_rendezvous());
    }

    #[test_log::test]
    fn rendezvous_with_dropping_overflow_buffers_one() {
        let policy = Policy::new(Capacity::Rendezvous, BufferOverflow::DropLatest).unwrap();

        assert_eq!(policy.limit, Some(1));
        assert_eq!(policy.overflow, BufferOverflow::DropLatest);
    }

    #[test_log::test]
    fn buffered_uses_configured_default() {
        let policy = Policy::new(Capacity::Buffered, BufferOverflow::Suspend).unwrap();

        assert_eq!(policy.limit, Some(config::buffered_capacity()));
    }

    #[test_log::test]
    fn conflated_is_one_slot_drop_oldest() {
        let policy = Policy::new(Capacity::Conflated, BufferOverflow::Suspend).unwrap();

        assert_eq!(policy.limit, Some(1));
        assert_eq!(policy.overflow, BufferOverflow::DropOldest);
    }

    #[test_log::test]
    fn conflated_rejects_explicit_overflow() {
        let err = Policy::new(Capacity::Conflated, BufferOverflow::DropLatest).unwrap_err();

        assert!(matches!(err, ConfigError::Unsupported { .. }));
    }

    #[test_log::test]
    fn unlimited_ignores_overflow() {
        let policy = Policy::new(Capacity::Unlimited, BufferOverflow::DropOldest).unwrap();

        assert_eq!(policy.limit, None);
        assert!(policy.has_room(usize::MAX - 1));
    }

    #[test_log::test]
    fn zero_converts_to_rendezvous() {
        assert_eq!(Capacity::from(0), Capacity::Rendezvous);
        assert_eq!(Capacity::from(3), Capacity::Bounded(3));
    }
}
