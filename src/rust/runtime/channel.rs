// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Channels are the synchronization primitive of coroutines.
//!
//! A channel holds up to `capacity` buffered values. Receivers that find nothing register themselves and block; a
//! sender hands its value straight to the first registration whose [Trigger] it manages to fire, so a selector that
//! already completed another case refuses it. Senders that find no taker and no free slot park their value as an
//! offer and block until a receiver takes it. Only the coroutine holding the turn token touches a channel, so the lock
//! below never contends between coroutines; it only keeps the host driver honest when it uses a channel between two
//! dispatcher calls.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::runtime::scheduler::{
    context::Context,
    waker::Trigger,
};
use ::parking_lot::Mutex;
use ::std::{
    collections::VecDeque,
    fmt,
    sync::Arc,
};

//======================================================================================================================
// Structures
//======================================================================================================================

/// Failure of [Channel::send_async]. The value is handed back.
#[derive(PartialEq, Eq)]
pub enum TrySendError<T> {
    /// The buffer is full and no receiver is waiting.
    Full(T),
    /// The channel is closed.
    Closed(T),
}

/// Failure of [Channel::recv_async].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TryRecvError {
    /// Nothing to receive right now.
    Empty,
    /// The channel is closed and drained.
    Closed,
}

/// Value of a blocked send operation. The send completes when whoever takes the value fires `owner` for `case`.
struct Offer<T> {
    value: T,
    owner: Arc<Trigger>,
    case: usize,
}

/// A blocked receive operation, registered as `case` of `trigger`.
struct Registration<T> {
    id: u64,
    trigger: Arc<Trigger>,
    case: usize,
    /// Value handed over by a sender after firing `trigger`.
    delivered: Option<T>,
}

struct ChannelState<T> {
    name: String,
    capacity: usize,
    buffer: VecDeque<T>,
    offers: VecDeque<Offer<T>>,
    /// Registered receivers, in registration order.
    receivers: Vec<Registration<T>>,
    closed: bool,
    next_registration: u64,
}

/// A channel of values of type `T`. Clones refer to the same channel.
pub struct Channel<T> {
    state: Arc<Mutex<ChannelState<T>>>,
}

/// Receiver registration of a blocked operation. Dropping it unregisters, so a coroutine that unwinds while blocked
/// stops counting as a receiver.
pub(crate) struct Listener<T> {
    channel: Channel<T>,
    id: Option<u64>,
}

/// Offers of a blocked operation. Dropping it withdraws whatever no receiver took yet.
pub(crate) struct Pending<T> {
    channel: Channel<T>,
    owner: Arc<Trigger>,
}

//======================================================================================================================
// Associate Functions
//======================================================================================================================

impl<T> ChannelState<T> {
    /// Takes the oldest offer not owned by `exclude`. Offers whose owner already completed through another channel are
    /// stale and get discarded on the way.
    fn take_offer(&mut self, exclude: Option<&Arc<Trigger>>) -> Option<T> {
        let mut i: usize = 0;
        while i < self.offers.len() {
            if exclude.map_or(false, |trigger| Arc::ptr_eq(&self.offers[i].owner, trigger)) {
                i += 1;
                continue;
            }
            let offer: Offer<T> = self.offers.remove(i)?;
            if offer.owner.try_fire(offer.case) {
                return Some(offer.value);
            }
        }
        None
    }

    /// Moves offers into free buffer slots, completing their senders.
    fn refill(&mut self, exclude: Option<&Arc<Trigger>>) {
        while self.buffer.len() < self.capacity {
            match self.take_offer(exclude) {
                Some(value) => self.buffer.push_back(value),
                None => break,
            }
        }
    }

    fn take(&mut self, exclude: Option<&Arc<Trigger>>) -> Option<T> {
        match self.buffer.pop_front() {
            Some(value) => {
                self.refill(exclude);
                Some(value)
            },
            None => self.take_offer(exclude),
        }
    }

    /// Hands `value` to the first registered receiver that commits to it, else buffers it if there is a free slot.
    fn try_put(&mut self, value: T) -> Result<(), T> {
        for registration in self.receivers.iter_mut() {
            if registration.delivered.is_none() && registration.trigger.try_fire(registration.case) {
                registration.delivered = Some(value);
                return Ok(());
            }
        }
        if self.buffer.len() < self.capacity {
            self.buffer.push_back(value);
            return Ok(());
        }
        Err(value)
    }

    fn park(&mut self, value: T, owner: Arc<Trigger>, case: usize) {
        self.offers.push_back(Offer { value, owner, case });
    }

    fn register(&mut self, trigger: Arc<Trigger>, case: usize) -> u64 {
        let id: u64 = self.next_registration;
        self.next_registration += 1;
        self.receivers.push(Registration {
            id,
            trigger,
            case,
            delivered: None,
        });
        id
    }

    /// Removes a registration, returning the value handed to it, if any.
    fn unregister(&mut self, id: u64) -> Option<T> {
        let index: usize = self.receivers.iter().position(|registration| registration.id == id)?;
        self.receivers.remove(index).delivered
    }
}

impl<T> Channel<T> {
    pub(crate) fn new(name: String, capacity: usize) -> Self {
        trace!("new(): name={:?}, capacity={:?}", name, capacity);
        Self {
            state: Arc::new(Mutex::new(ChannelState {
                name,
                capacity,
                buffer: VecDeque::with_capacity(capacity),
                offers: VecDeque::new(),
                receivers: Vec::new(),
                closed: false,
                next_registration: 0,
            })),
        }
    }

    pub fn name(&self) -> String {
        self.state.lock().name.clone()
    }

    pub fn capacity(&self) -> usize {
        self.state.lock().capacity
    }

    /// Number of values sitting in the buffer.
    pub fn len(&self) -> usize {
        self.state.lock().buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Receives a value, blocking the calling coroutine until one is available. Returns `None` once the channel is
    /// closed and drained.
    pub fn recv(&self, ctx: &Context) -> Option<T> {
        loop {
            let reason: String = {
                let mut state = self.state.lock();
                if let Some(value) = state.take(None) {
                    return Some(value);
                }
                if state.closed {
                    return None;
                }
                format!("blocked on {}.Recv", state.name)
            };
            let trigger: Arc<Trigger> = Trigger::new(ctx.waker());
            let listener: Listener<T> = self.listen(trigger.clone(), 0);
            while trigger.fired().is_none() {
                ctx.block(reason.clone());
            }
            // Fired without a value when the channel got closed.
            if let Some(value) = listener.finish() {
                return Some(value);
            }
        }
    }

    /// Receives a value if one is available right now.
    pub fn recv_async(&self) -> Result<T, TryRecvError> {
        let mut state = self.state.lock();
        match state.take(None) {
            Some(value) => Ok(value),
            None if state.closed => Err(TryRecvError::Closed),
            None => Err(TryRecvError::Empty),
        }
    }

    /// Sends a value, blocking the calling coroutine until a receiver or a buffer slot takes it.
    ///
    /// Panics if the channel is closed, including when it gets closed while the value is still pending.
    pub fn send(&self, ctx: &Context, value: T) {
        let value: T = match self.poll_send(value) {
            Ok(()) => return,
            Err(value) => value,
        };
        let trigger: Arc<Trigger> = Trigger::new(ctx.waker());
        let reason: String = format!("blocked on {}.Send", self.name());
        let _pending: Pending<T> = self.park(value, trigger.clone(), 0);
        loop {
            ctx.block(reason.clone());
            if trigger.fired().is_some() {
                return;
            }
            if self.is_closed() {
                panic!("send on closed channel {}", self.name());
            }
        }
    }

    /// Sends a value if the channel can accept it right now. Never blocks and never panics.
    pub fn send_async(&self, value: T) -> Result<(), TrySendError<T>> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(TrySendError::Closed(value));
        }
        state.try_put(value).map_err(TrySendError::Full)
    }

    /// Closes the channel. Buffered values stay receivable, blocked receivers wake up and pending senders panic when
    /// they resume.
    ///
    /// Panics if the channel is already closed.
    pub fn close(&self) {
        let discarded: Vec<T> = {
            let mut state = self.state.lock();
            if state.closed {
                let name: String = state.name.clone();
                drop(state);
                panic!("close of closed channel {}", name);
            }
            debug!("close(): name={:?}", state.name);
            state.closed = true;
            for registration in &state.receivers {
                if registration.delivered.is_none() {
                    registration.trigger.try_fire(registration.case);
                }
            }
            let discarded: Vec<T> = state
                .offers
                .drain(..)
                .map(|offer: Offer<T>| {
                    offer.owner.nudge();
                    offer.value
                })
                .collect();
            discarded
        };
        drop(discarded);
    }

    /// Puts a value without blocking, panicking if the channel is closed.
    pub(crate) fn poll_send(&self, value: T) -> Result<(), T> {
        let mut state = self.state.lock();
        if state.closed {
            let name: String = state.name.clone();
            drop(state);
            panic!("send on closed channel {}", name);
        }
        state.try_put(value)
    }

    /// Selector support: takes a value, or reports that the channel is closed and drained with `Some(None)`.
    pub(crate) fn poll_recv(&self, exclude: Option<&Arc<Trigger>>) -> Option<Option<T>> {
        let mut state = self.state.lock();
        match state.take(exclude) {
            Some(value) => Some(Some(value)),
            None if state.closed => Some(None),
            None => None,
        }
    }

    /// Registers a receiver as `case` of `trigger`. Senders fire the trigger before handing over a value.
    pub(crate) fn listen(&self, trigger: Arc<Trigger>, case: usize) -> Listener<T> {
        let id: u64 = self.state.lock().register(trigger, case);
        Listener {
            channel: self.clone(),
            id: Some(id),
        }
    }

    /// Parks a value as `case` of `owner` until a receiver takes it.
    pub(crate) fn park(&self, value: T, owner: Arc<Trigger>, case: usize) -> Pending<T> {
        self.state.lock().park(value, owner.clone(), case);
        Pending {
            channel: self.clone(),
            owner,
        }
    }

    /// Drops the offers parked by `owner`.
    fn withdraw(&self, owner: &Arc<Trigger>) {
        let withdrawn: Vec<Offer<T>> = {
            let mut state = self.state.lock();
            let (withdrawn, kept): (Vec<Offer<T>>, Vec<Offer<T>>) = ::std::mem::take(&mut state.offers)
                .into_iter()
                .partition(|offer: &Offer<T>| Arc::ptr_eq(&offer.owner, owner));
            state.offers = kept.into();
            withdrawn
        };
        drop(withdrawn);
    }
}

impl<T> Listener<T> {
    /// Unregisters, returning the value a sender handed over, if any.
    pub(crate) fn finish(mut self) -> Option<T> {
        let id: u64 = self.id.take()?;
        let delivered: Option<T> = self.channel.state.lock().unregister(id);
        delivered
    }
}

//======================================================================================================================
// Trait Implementations
//======================================================================================================================

impl<T> Drop for Listener<T> {
    fn drop(&mut self) {
        if let Some(id) = self.id.take() {
            let delivered: Option<T> = self.channel.state.lock().unregister(id);
            drop(delivered);
        }
    }
}

impl<T> Drop for Pending<T> {
    fn drop(&mut self) {
        self.channel.withdraw(&self.owner);
    }
}

impl<T> Clone for Channel<T> {
    fn clone(&self) -> Self {
        Self {
            state: self.state.clone(),
        }
    }
}

impl<T> fmt::Debug for Channel<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("Channel")
            .field("name", &state.name)
            .field("capacity", &state.capacity)
            .field("len", &state.buffer.len())
            .field("closed", &state.closed)
            .finish()
    }
}

impl<T> fmt::Debug for TrySendError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrySendError::Full(_) => f.write_str("Full(..)"),
            TrySendError::Closed(_) => f.write_str("Closed(..)"),
        }
    }
}

impl<T> fmt::Display for TrySendError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrySendError::Full(_) => f.write_str("sending on a full channel"),
            TrySendError::Closed(_) => f.write_str("sending on a closed channel"),
        }
    }
}

impl fmt::Display for TryRecvError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TryRecvError::Empty => f.write_str("receiving on an empty channel"),
            TryRecvError::Closed => f.write_str("receiving on a closed channel"),
        }
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================
