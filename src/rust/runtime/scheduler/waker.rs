// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::runtime::scheduler::{
    coroutine::CoroutineId,
    dispatcher::Shared,
};
use ::parking_lot::Mutex;
use ::std::sync::{
    Arc,
    Weak,
};

//======================================================================================================================
// Structures
//======================================================================================================================

/// Makes one blocked coroutine runnable again. Waking a coroutine that is not blocked has no effect.
#[derive(Clone)]
pub struct Waker {
    dispatcher: Weak<Shared>,
    coroutine: CoroutineId,
}

/// Completion point shared by the channel registrations of one blocking operation. Whoever fires it first decides
/// which case of the operation completed; later attempts fail, so a sender or receiver that loses has to look
/// elsewhere.
pub struct Trigger {
    fired: Mutex<Option<usize>>,
    waker: Waker,
}

//======================================================================================================================
// Associate Functions
//======================================================================================================================

impl Waker {
    pub fn new(dispatcher: &Arc<Shared>, coroutine: CoroutineId) -> Self {
        Self {
            dispatcher: Arc::downgrade(dispatcher),
            coroutine,
        }
    }

    pub fn wake(&self) {
        if let Some(dispatcher) = self.dispatcher.upgrade() {
            dispatcher.wake(self.coroutine);
        }
    }
}

impl Trigger {
    pub fn new(waker: Waker) -> Arc<Self> {
        Arc::new(Self {
            fired: Mutex::new(None),
            waker,
        })
    }

    /// Completes `case` and wakes the owner. Returns false if another case already completed.
    pub fn try_fire(&self, case: usize) -> bool {
        {
            let mut fired = self.fired.lock();
            if fired.is_some() {
                return false;
            }
            *fired = Some(case);
        }
        self.waker.wake();
        true
    }

    /// The case that completed, if any.
    pub fn fired(&self) -> Option<usize> {
        *self.fired.lock()
    }

    /// Wakes the owner without completing anything, so it re-examines the state it waits on.
    pub fn nudge(&self) {
        self.waker.wake();
    }
}
