// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::runtime::{
    channel::Channel,
    scheduler::{
        coroutine::{
            CoroutineFn,
            CoroutineId,
        },
        dispatcher::{
            Shared,
            Suspension,
        },
        panic::Abandoned,
        waker::Waker,
        yielder::{
            Grant,
            Release,
            Yielder,
        },
    },
    selector::Selector,
};
use ::std::{
    backtrace::{
        Backtrace,
        BacktraceStatus,
    },
    marker::PhantomData,
    panic,
    sync::Arc,
};

//======================================================================================================================
// Structures
//======================================================================================================================

/// Capability handed to every coroutine body. It ties the coroutine to its dispatcher: channels, selectors and nested
/// coroutines are created through it, and blocking operations suspend through it.
///
/// A context never leaves the thread of its coroutine.
pub struct Context {
    dispatcher: Arc<Shared>,
    id: CoroutineId,
    name: String,
    yielder: Yielder,
    capture_stack_traces: bool,
    _not_send: PhantomData<*const ()>,
}

//======================================================================================================================
// Associate Functions
//======================================================================================================================

impl Context {
    pub(crate) fn new(
        dispatcher: Arc<Shared>,
        id: CoroutineId,
        name: String,
        yielder: Yielder,
        capture_stack_traces: bool,
    ) -> Self {
        Self {
            dispatcher,
            id,
            name,
            yielder,
            capture_stack_traces,
            _not_send: PhantomData,
        }
    }

    /// Identifier of the coroutine this context belongs to.
    pub fn coroutine_id(&self) -> CoroutineId {
        self.id
    }

    /// Name of the coroutine this context belongs to.
    pub fn coroutine_name(&self) -> &str {
        &self.name
    }

    /// Creates an unbuffered channel.
    pub fn new_channel<T: Send + 'static>(&self) -> Channel<T> {
        Channel::new(self.dispatcher.next_channel_name(), 0)
    }

    pub fn new_named_channel<T: Send + 'static>(&self, name: &str) -> Channel<T> {
        Channel::new(name.to_string(), 0)
    }

    /// Creates a channel that buffers up to `capacity` values.
    pub fn new_buffered_channel<T: Send + 'static>(&self, capacity: usize) -> Channel<T> {
        Channel::new(self.dispatcher.next_channel_name(), capacity)
    }

    pub fn new_named_buffered_channel<T: Send + 'static>(&self, name: &str, capacity: usize) -> Channel<T> {
        Channel::new(name.to_string(), capacity)
    }

    pub fn new_selector<'a>(&self) -> Selector<'a> {
        Selector::new(self.dispatcher.next_selector_name())
    }

    pub fn new_named_selector<'a>(&self, name: &str) -> Selector<'a> {
        Selector::new(name.to_string())
    }

    /// Creates a coroutine. It gets its first turn after every coroutine that is already in the ready sequence.
    pub fn new_coroutine<F>(&self, f: F) -> CoroutineId
    where
        F: FnOnce(&Context) + Send + 'static,
    {
        self.spawn(None, Box::new(f))
    }

    pub fn new_named_coroutine<F>(&self, name: &str, f: F) -> CoroutineId
    where
        F: FnOnce(&Context) + Send + 'static,
    {
        self.spawn(Some(name), Box::new(f))
    }

    fn spawn(&self, name: Option<&str>, body: CoroutineFn) -> CoroutineId {
        match self.dispatcher.spawn(name, body) {
            Ok(id) => id,
            // Failing to start a thread is a failure of the calling coroutine.
            Err(e) => panic!("cannot create coroutine: {}", e.cause),
        }
    }

    /// Waker that makes this coroutine runnable again.
    pub(crate) fn waker(&self) -> Waker {
        Waker::new(&self.dispatcher, self.id)
    }

    /// Gives the turn token back and parks until the dispatcher grants it again. The caller must have registered a
    /// waker somewhere beforehand, otherwise the coroutine stays blocked forever.
    pub(crate) fn block(&self, reason: String) {
        let stack: Option<Backtrace> = suspension_stack(self.capture_stack_traces);
        if let Suspension::Closed = self.dispatcher.suspend(self.id, reason, stack) {
            panic::resume_unwind(Box::new(Abandoned));
        }
        match self.yielder.yield_turn(Release::Blocked) {
            Grant::Run => {},
            Grant::Abandon => panic::resume_unwind(Box::new(Abandoned)),
        }
    }

    /// Gives the turn token back for good.
    pub(crate) fn release(&self, release: Release) {
        self.yielder.release(release);
    }
}

//======================================================================================================================
// Standalone Functions
//======================================================================================================================

/// Backtrace recorded when a coroutine blocks. Suspensions are frequent, so this honours `RUST_LIB_BACKTRACE` and
/// `RUST_BACKTRACE` instead of forcing a capture; panics always capture.
fn suspension_stack(enabled: bool) -> Option<Backtrace> {
    if !enabled {
        return None;
    }
    let stack: Backtrace = Backtrace::capture();
    match stack.status() {
        BacktraceStatus::Captured => Some(stack),
        _ => None,
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================
