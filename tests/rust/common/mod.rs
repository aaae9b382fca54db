// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

#![allow(dead_code)]

//==============================================================================
// Imports
//==============================================================================

use ::anyhow::Result;
use ::detcoro::{
    runtime::logging,
    Dispatcher,
    PanicError,
};
use ::parking_lot::Mutex;
use ::std::sync::Arc;

//==============================================================================
// Structures
//==============================================================================

/// Ordered record of what coroutines did, shared between them and the test.
#[derive(Clone, Default)]
pub struct Trace(Arc<Mutex<Vec<String>>>);

//==============================================================================
// Associate Functions
//==============================================================================

impl Trace {
    pub fn push<S: Into<String>>(&self, event: S) {
        self.0.lock().push(event.into());
    }

    pub fn events(&self) -> Vec<String> {
        self.0.lock().clone()
    }
}

//==============================================================================
// Standalone Functions
//==============================================================================

pub fn setup() {
    logging::initialize();
}

/// Runs the dispatcher to quiescence, turning a coroutine panic into a test failure.
pub fn execute(dispatcher: &mut Dispatcher) -> Result<()> {
    match dispatcher.execute_until_all_blocked() {
        Ok(()) => Ok(()),
        Err(e) => anyhow::bail!("unexpected panic: {}\n{}", e, e.stack_trace()),
    }
}

/// Runs the dispatcher to quiescence, expecting a coroutine panic.
pub fn execute_expecting_panic(dispatcher: &mut Dispatcher) -> Result<PanicError> {
    match dispatcher.execute_until_all_blocked() {
        Ok(()) => anyhow::bail!("a coroutine should have panicked"),
        Err(e) => Ok(e),
    }
}

pub fn strings(events: &[&str]) -> Vec<String> {
    events.iter().map(|event| event.to_string()).collect()
}
