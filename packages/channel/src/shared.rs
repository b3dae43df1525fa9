//! The state every handle of one channel points at.
//!
//! All mutation goes through [`Shared::update`], which holds the lock for the
//! duration of the closure and wakes tasks (and drops discarded values) only
//! after releasing it.

use std::{
    collections::{HashMap, HashSet, VecDeque},
    sync::{Mutex, MutexGuard, PoisonError},
    task::{Context, Poll, Waker},
};

use crate::{
    capacity::{BufferOverflow, Policy},
    error::{CloseCause, ClosedChannel, SendError, TryReceiveError, TrySendError},
};

pub(crate) type Ticket = u64;

struct ReceiveWaiter {
    ticket: Ticket,
    waker: Waker,
}

/// A value waiting to be taken by a receiver.
///
/// `waker` is `None` for a rendezvous `try_send` that already succeeded: no
/// future waits on it, and the value stays deliverable after `close`.
struct SendWaiter<T> {
    ticket: Ticket,
    value: T,
    waker: Option<Waker>,
}

enum Offer<T> {
    Accepted,
    Full(T),
    Closed(T),
}

pub(crate) struct State<T> {
    buffer: VecDeque<T>,
    /// Parked receivers that have not been woken for a value yet.
    receivers: VecDeque<ReceiveWaiter>,
    /// Receivers woken for a value they have not taken yet.
    woken: HashSet<Ticket>,
    /// Parked senders. Only non-empty while the buffer is full.
    senders: VecDeque<SendWaiter<T>>,
    /// Parked sends whose value has been taken.
    delivered: HashSet<Ticket>,
    /// Parked sends failed by `close`, with their value.
    rejected: HashMap<Ticket, T>,
    /// Non-committal waiters (select clauses) woken on any change.
    observers: Vec<Waker>,
    closed: Option<ClosedChannel>,
    next_ticket: Ticket,
    sender_count: usize,
    receiver_count: usize,
    wakers: Vec<Waker>,
    garbage: Vec<T>,
}

impl<T> State<T> {
    fn new() -> Self {
        Self {
            buffer: VecDeque::new(),
            receivers: VecDeque::new(),
            woken: HashSet::new(),
            senders: VecDeque::new(),
            delivered: HashSet::new(),
            rejected: HashMap::new(),
            observers: vec![],
            closed: None,
            next_ticket: 0,
            sender_count: 0,
            receiver_count: 0,
            wakers: vec![],
            garbage: vec![],
        }
    }

    fn ticket(&mut self) -> Ticket {
        self.next_ticket += 1;
        self.next_ticket
    }

    fn notify(&mut self) {
        self.wakers.append(&mut self.observers);
    }

    fn closed_error(&self) -> ClosedChannel {
        self.closed.clone().unwrap_or_default()
    }

    /// Wakes parked receivers, in arrival order, until every value waiting
    /// in the channel has a woken receiver on its way to take it.
    fn dispatch(&mut self) {
        let available = self.buffer.len() + self.senders.len();
        while self.woken.len() < available {
            let Some(receiver) = self.receivers.pop_front() else {
                break;
            };
            self.woken.insert(receiver.ticket);
            self.wakers.push(receiver.waker);
        }
    }

    fn offer(&mut self, value: T, policy: &Policy) -> Offer<T> {
        if self.closed.is_some() {
            return Offer::Closed(value);
        }

        if policy.has_room(self.buffer.len()) {
            self.buffer.push_back(value);
        } else {
            match policy.overflow {
                BufferOverflow::Suspend => return Offer::Full(value),
                BufferOverflow::DropOldest => {
                    if let Some(oldest) = self.buffer.pop_front() {
                        self.garbage.push(oldest);
                    }
                    self.buffer.push_back(value);
                }
                BufferOverflow::DropLatest => {
                    log::trace!("channel full, dropping latest value");
                    self.garbage.push(value);
                }
            }
        }

        self.dispatch();
        self.notify();
        Offer::Accepted
    }

    fn park_sender(&mut self, value: T, waker: Option<Waker>) -> Ticket {
        let ticket = self.ticket();
        self.senders.push_back(SendWaiter {
            ticket,
            value,
            waker,
        });
        self.dispatch();
        self.notify();
        ticket
    }

    fn release(&mut self, sender: SendWaiter<T>) -> T {
        if let Some(waker) = sender.waker {
            self.delivered.insert(sender.ticket);
            self.wakers.push(waker);
        }
        sender.value
    }

    fn take(&mut self, policy: &Policy) -> Option<T> {
        let value = if let Some(value) = self.buffer.pop_front() {
            if policy.has_room(self.buffer.len())
                && let Some(sender) = self.senders.pop_front()
            {
                let refill = self.release(sender);
                self.buffer.push_back(refill);
            }
            value
        } else {
            let sender = self.senders.pop_front()?;
            self.release(sender)
        };

        self.notify();
        Some(value)
    }

    fn close(&mut self, cause: Option<CloseCause>) -> bool {
        if self.closed.is_some() {
            return false;
        }

        log::debug!("closing channel (cause: {})", cause.is_some());
        self.closed = Some(ClosedChannel::new(cause));

        self.wakers
            .extend(self.receivers.drain(..).map(|receiver| receiver.waker));
        let (accepted, parked): (VecDeque<_>, VecDeque<_>) = self
            .senders
            .drain(..)
            .partition(|sender| sender.waker.is_none());
        self.senders = accepted;
        for sender in parked {
            if let Some(waker) = sender.waker {
                self.rejected.insert(sender.ticket, sender.value);
                self.wakers.push(waker);
            }
        }

        self.notify();
        true
    }

    fn cancel(&mut self, cause: Option<CloseCause>) -> bool {
        let closed = self.close(cause);
        let pending = self.buffer.len() + self.senders.len();
        if pending > 0 {
            log::debug!("cancelling channel, discarding {pending} values");
        }
        self.garbage.extend(self.buffer.drain(..));
        self.garbage
            .extend(self.senders.drain(..).map(|sender| sender.value));
        closed
    }
}

pub(crate) struct Shared<T> {
    state: Mutex<State<T>>,
    policy: Policy,
}

impl<T> Shared<T> {
    pub fn new(policy: Policy) -> Self {
        Self {
            state: Mutex::new(State::new()),
            policy,
        }
    }

    pub const fn policy(&self) -> &Policy {
        &self.policy
    }

    fn lock(&self) -> MutexGuard<'_, State<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn update<R>(&self, f: impl FnOnce(&mut State<T>, &Policy) -> R) -> R {
        let (result, wakers, garbage) = {
            let mut state = self.lock();
            let result = f(&mut state, &self.policy);
            (
                result,
                std::mem::take(&mut state.wakers),
                std::mem::take(&mut state.garbage),
            )
        };

        drop(garbage);
        for waker in wakers {
            waker.wake();
        }

        result
    }

    pub fn poll_send(
        &self,
        ticket: &mut Option<Ticket>,
        slot: &mut Option<T>,
        cx: &Context<'_>,
    ) -> Poll<Result<(), SendError<T>>> {
        self.update(|state, policy| {
            if let Some(parked) = *ticket {
                if state.delivered.remove(&parked) {
                    *ticket = None;
                    return Poll::Ready(Ok(()));
                }
                if let Some(value) = state.rejected.remove(&parked) {
                    *ticket = None;
                    return Poll::Ready(Err(SendError::new(value, state.closed_error())));
                }
                if let Some(waiter) = state.senders.iter_mut().find(|w| w.ticket == parked) {
                    waiter.waker = Some(cx.waker().clone());
                }
                return Poll::Pending;
            }

            // Polled after completion.
            let Some(value) = slot.take() else {
                return Poll::Pending;
            };

            match state.offer(value, policy) {
                Offer::Accepted => Poll::Ready(Ok(())),
                Offer::Closed(value) => Poll::Ready(Err(SendError::new(value, state.closed_error()))),
                Offer::Full(value) => {
                    *ticket = Some(state.park_sender(value, Some(cx.waker().clone())));
                    Poll::Pending
                }
            }
        })
    }

    /// Withdraws a parked send whose future was dropped.
    pub fn cancel_send(&self, ticket: Ticket) {
        self.update(|state, _| {
            if let Some(index) = state.senders.iter().position(|w| w.ticket == ticket) {
                if let Some(waiter) = state.senders.remove(index) {
                    state.garbage.push(waiter.value);
                }
            } else if !state.delivered.remove(&ticket)
                && let Some(value) = state.rejected.remove(&ticket)
            {
                state.garbage.push(value);
            }
        });
    }

    /// On a rendezvous channel this succeeds only while a receiver is
    /// parked. The value then waits in line for it like a parked send would.
    pub fn try_send(&self, value: T) -> Result<(), TrySendError<T>> {
        self.update(|state, policy| match state.offer(value, policy) {
            Offer::Accepted => Ok(()),
            Offer::Full(value) if policy.is_rendezvous() && !state.receivers.is_empty() => {
                state.park_sender(value, None);
                Ok(())
            }
            Offer::Full(value) => Err(TrySendError::Full(value)),
            Offer::Closed(value) => Err(SendError::new(value, state.closed_error()).into()),
        })
    }

    pub fn poll_receive(
        &self,
        ticket: &mut Option<Ticket>,
        cx: &Context<'_>,
    ) -> Poll<Result<T, ClosedChannel>> {
        self.update(|state, policy| {
            let mut was_woken = false;
            if let Some(parked) = ticket.take() {
                if let Some(waiter) = state.receivers.iter_mut().find(|w| w.ticket == parked) {
                    waiter.waker.clone_from(cx.waker());
                    *ticket = Some(parked);
                    return Poll::Pending;
                }
                // Woken for a value, or by close.
                was_woken = state.woken.remove(&parked);
            }

            // Values already promised to woken receivers are not for newcomers.
            let available = state.buffer.len() + state.senders.len();
            let promised =
                !was_woken && state.closed.is_none() && available <= state.woken.len();

            if !promised && let Some(value) = state.take(policy) {
                return Poll::Ready(Ok(value));
            }

            if let Some(closed) = &state.closed {
                return Poll::Ready(Err(closed.clone()));
            }

            let parked = state.ticket();
            let waiter = ReceiveWaiter {
                ticket: parked,
                waker: cx.waker().clone(),
            };
            // Someone else took the value it was woken for: keep its turn.
            if was_woken {
                state.receivers.push_front(waiter);
            } else {
                state.receivers.push_back(waiter);
            }
            state.notify();
            *ticket = Some(parked);
            Poll::Pending
        })
    }

    /// Withdraws a parked receive whose future was dropped. If it had been
    /// woken for a value, the next parked receiver is woken instead.
    pub fn cancel_receive(&self, ticket: Ticket) {
        self.update(|state, _| {
            if let Some(index) = state.receivers.iter().position(|w| w.ticket == ticket) {
                state.receivers.remove(index);
            } else if state.woken.remove(&ticket) {
                state.dispatch();
            }
        });
    }

    pub fn try_receive(&self) -> Result<T, TryReceiveError> {
        self.update(|state, policy| {
            state.take(policy).ok_or_else(|| {
                state
                    .closed
                    .clone()
                    .map_or(TryReceiveError::Empty, TryReceiveError::Closed)
            })
        })
    }

    /// Registers a waker to be woken on the next change of any kind.
    pub fn observe(&self, waker: &Waker) {
        let mut state = self.lock();
        if !state.observers.iter().any(|w| w.will_wake(waker)) {
            state.observers.push(waker.clone());
        }
    }

    pub fn close(&self, cause: Option<CloseCause>) -> bool {
        self.update(|state, _| state.close(cause))
    }

    pub fn cancel(&self, cause: Option<CloseCause>) -> bool {
        self.update(|state, _| state.cancel(cause))
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed.is_some()
    }

    pub fn len(&self) -> usize {
        self.lock().buffer.len()
    }

    pub fn add_sender(&self) {
        self.lock().sender_count += 1;
    }

    pub fn remove_sender(&self) {
        self.update(|state, _| {
            state.sender_count = state.sender_count.saturating_sub(1);
            if state.sender_count == 0 {
                state.close(None);
            }
        });
    }

    pub fn add_receiver(&self) {
        self.lock().receiver_count += 1;
    }

    pub fn remove_receiver(&self) {
        self.update(|state, _| {
            state.receiver_count = state.receiver_count.saturating_sub(1);
            if state.receiver_count == 0 {
                state.cancel(None);
            }
        });
    }
}
