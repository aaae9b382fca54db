// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Deterministic multi-way wait over channel operations.
//!
//! Cases are evaluated in registration order and the first one that can complete wins. A selector that has to block
//! registers every case at once: receive cases listen on their channel, send cases park their value as an offer. All
//! registrations share one [Trigger], so whichever case another coroutine completes first wins and the others refuse
//! later senders and receivers. Registrations live in the cases, so they are withdrawn even if the selector unwinds.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::runtime::{
    channel::{
        Channel,
        Listener,
        Pending,
    },
    scheduler::{
        context::Context,
        waker::Trigger,
    },
};
use ::std::sync::Arc;

//======================================================================================================================
// Traits
//======================================================================================================================

/// One operation of a selector.
trait SelectCase {
    /// Completes the operation if it can be done without blocking. Offers parked by `exclude` are not taken.
    fn poll(&mut self, exclude: Option<&Arc<Trigger>>) -> bool;

    /// Registers the operation on its channel, as case `index` of `trigger`.
    fn register(&mut self, trigger: &Arc<Trigger>, index: usize);

    /// Withdraws whatever [SelectCase::register] left on the channel, keeping a value handed to the case.
    fn unregister(&mut self);

    /// Invokes the callback of a completed operation.
    fn fire(self: Box<Self>);
}

//======================================================================================================================
// Structures
//======================================================================================================================

struct RecvCase<T, F> {
    channel: Channel<T>,
    callback: F,
    /// Received value, `Some(None)` meaning closed and drained.
    result: Option<Option<T>>,
    listener: Option<Listener<T>>,
}

struct SendCase<T, F> {
    channel: Channel<T>,
    /// Value to send, until it is either accepted or parked.
    value: Option<T>,
    callback: F,
    pending: Option<Pending<T>>,
}

/// Builder of a select operation. A selector is used for a single [Selector::select] call.
pub struct Selector<'a> {
    name: String,
    cases: Vec<Box<dyn SelectCase + 'a>>,
    default: Option<Box<dyn FnOnce() + 'a>>,
}

//======================================================================================================================
// Associate Functions
//======================================================================================================================

impl<'a> Selector<'a> {
    pub(crate) fn new(name: String) -> Self {
        Self {
            name,
            cases: Vec::new(),
            default: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Adds a receive case. The callback gets `None` if the channel is closed and drained.
    pub fn add_recv<T, F>(mut self, channel: &Channel<T>, f: F) -> Self
    where
        T: 'a,
        F: FnOnce(Option<T>) + 'a,
    {
        self.cases.push(Box::new(RecvCase {
            channel: channel.clone(),
            callback: f,
            result: None,
            listener: None,
        }));
        self
    }

    /// Adds a send case. Selecting it on a closed channel panics.
    pub fn add_send<T, F>(mut self, channel: &Channel<T>, value: T, f: F) -> Self
    where
        T: 'a,
        F: FnOnce() + 'a,
    {
        self.cases.push(Box::new(SendCase {
            channel: channel.clone(),
            value: Some(value),
            callback: f,
            pending: None,
        }));
        self
    }

    /// Adds the case that fires when no other case can complete right away. Panics if there is one already.
    pub fn add_default<F>(mut self, f: F) -> Self
    where
        F: FnOnce() + 'a,
    {
        if self.default.is_some() {
            panic!("selector {} has multiple default cases", self.name);
        }
        self.default = Some(Box::new(f));
        self
    }

    /// Performs exactly one case, or the default, and invokes its callback. Blocks the calling coroutine if no case can
    /// complete and there is no default.
    pub fn select(self, ctx: &Context) {
        let Selector {
            name,
            mut cases,
            default,
        } = self;

        if let Some(index) = cases.iter_mut().position(|case| case.poll(None)) {
            cases.swap_remove(index).fire();
            return;
        }
        if let Some(default) = default {
            trace!("select(): {} took the default case", name);
            default();
            return;
        }

        let trigger: Arc<Trigger> = Trigger::new(ctx.waker());
        for (index, case) in cases.iter_mut().enumerate() {
            case.register(&trigger, index);
        }
        let reason: String = format!("blocked on {}.Select", name);
        let winner: usize = loop {
            ctx.block(reason.clone());
            // Completed by another coroutine: a value handed to a receive case or a parked send taken.
            if let Some(index) = trigger.fired() {
                break index;
            }
            // Nudged because the channel of a parked send got closed.
            if let Some(index) = cases.iter_mut().position(|case| case.poll(Some(&trigger))) {
                break index;
            }
        };
        trace!("select(): {} woke up on case {}", name, winner);
        for case in cases.iter_mut() {
            case.unregister();
        }
        cases.swap_remove(winner).fire();
    }
}

//======================================================================================================================
// Trait Implementations
//======================================================================================================================

impl<T, F: FnOnce(Option<T>)> SelectCase for RecvCase<T, F> {
    fn poll(&mut self, exclude: Option<&Arc<Trigger>>) -> bool {
        self.result = self.channel.poll_recv(exclude);
        self.result.is_some()
    }

    fn register(&mut self, trigger: &Arc<Trigger>, index: usize) {
        self.listener = Some(self.channel.listen(trigger.clone(), index));
    }

    fn unregister(&mut self) {
        if let Some(listener) = self.listener.take() {
            if let Some(value) = listener.finish() {
                self.result = Some(Some(value));
            }
        }
    }

    fn fire(self: Box<Self>) {
        let this: Self = *self;
        (this.callback)(this.result.flatten())
    }
}

impl<T, F: FnOnce()> SelectCase for SendCase<T, F> {
    fn poll(&mut self, _exclude: Option<&Arc<Trigger>>) -> bool {
        match self.value.take() {
            Some(value) => match self.channel.poll_send(value) {
                Ok(()) => true,
                Err(value) => {
                    self.value = Some(value);
                    false
                },
            },
            // Parked. It can only complete through the trigger.
            None => {
                if self.channel.is_closed() {
                    panic!("send on closed channel {}", self.channel.name());
                }
                false
            },
        }
    }

    fn register(&mut self, trigger: &Arc<Trigger>, index: usize) {
        if let Some(value) = self.value.take() {
            self.pending = Some(self.channel.park(value, trigger.clone(), index));
        }
    }

    fn unregister(&mut self) {
        self.pending = None;
    }

    fn fire(self: Box<Self>) {
        let this: Self = *self;
        (this.callback)()
    }
}
