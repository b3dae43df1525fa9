#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

//! Channels for handing values between tasks.
//!
//! A channel is created with a [`Capacity`] and, optionally, a
//! [`BufferOverflow`] policy:
//!
//! * [`Capacity::Rendezvous`]: no buffer, each send waits for a receiver
//! * [`Capacity::Bounded`]/[`Capacity::Buffered`]: a FIFO buffer; what happens
//!   when it is full depends on the overflow policy
//! * [`Capacity::Unlimited`]: sends never wait
//! * [`Capacity::Conflated`]: only the latest value is kept
//!
//! Waiting senders and receivers are served first come, first served. Closing
//! a channel fails waiting senders; receivers first drain what is buffered.
//!
//! [`produce`] turns a task that writes into a handle that reads, and
//! [`Select`] waits on several channel operations, jobs and timers at once.
//!
//! Sending and then receiving on the same rendezvous channel from one task
//! suspends that task forever: the send waits for a receiver that can only
//! arrive after the send completes.

mod capacity;
mod channel;
pub mod config;
mod error;
mod produce;
mod select;
mod shared;

pub use capacity::{BufferOverflow, Capacity};
pub use channel::{Channel, ReceiveFuture, Receiver, SendFuture, Sender, channel};
pub use error::{CloseCause, ClosedChannel, ConfigError, SendError, TryReceiveError, TrySendError};
pub use produce::{Producer, produce, produce_into};
pub use select::{Select, SelectFuture};
