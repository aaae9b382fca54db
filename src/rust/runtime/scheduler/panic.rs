// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Capture of coroutine panics.
//!
//! Panics raised on a coroutine thread never reach the default hook. Instead the hook records where the panic
//! happened, and the coroutine thread turns the caught payload into a [PanicError].

//======================================================================================================================
// Imports
//======================================================================================================================

use ::std::{
    any::Any,
    backtrace::Backtrace,
    cell::{
        Cell,
        RefCell,
    },
    error,
    fmt,
    panic,
    sync::Once,
};

//======================================================================================================================
// Structures
//======================================================================================================================

/// Payload used to unwind a coroutine that was abandoned by a closed dispatcher.
pub(crate) struct Abandoned;

/// Information about a panicked coroutine.
pub struct PanicError {
    /// Name of the coroutine that panicked.
    coroutine: String,
    /// Value passed to the panic.
    value: Box<dyn Any + Send>,
    /// Printable rendition of the value.
    message: String,
    /// Stack trace of the panicked coroutine.
    stack_trace: String,
}

//======================================================================================================================
// Static Variables
//======================================================================================================================

/// Guardian to the hook installation.
static INSTALL_HOOK: Once = Once::new();

thread_local! {
    /// Set on coroutine threads. The flag tells whether a full backtrace is captured.
    static CAPTURE: Cell<Option<bool>> = const { Cell::new(None) };
    /// Where the last panic on this thread happened.
    static LAST_PANIC: RefCell<Option<String>> = const { RefCell::new(None) };
}

//======================================================================================================================
// Associate Functions
//======================================================================================================================

impl PanicError {
    pub(crate) fn new(coroutine: &str, value: Box<dyn Any + Send>, trace: &str) -> Self {
        let message: String = payload_message(value.as_ref());
        Self {
            coroutine: coroutine.to_string(),
            value,
            message,
            stack_trace: format!("coroutine {} [panic]:\n{}", coroutine, trace),
        }
    }

    /// Value passed to the panic. Panics raised with a literal carry a `&'static str`, formatted panics a `String`.
    pub fn value(&self) -> &(dyn Any + Send) {
        self.value.as_ref()
    }

    /// Takes the value passed to the panic, so that it can be re-raised with [std::panic::resume_unwind].
    pub fn into_value(self) -> Box<dyn Any + Send> {
        self.value
    }

    /// Printable rendition of the panic value.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Name of the coroutine that panicked.
    pub fn coroutine(&self) -> &str {
        &self.coroutine
    }

    /// Stack trace of the panicked coroutine, headed by its name.
    pub fn stack_trace(&self) -> &str {
        &self.stack_trace
    }
}

//======================================================================================================================
// Standalone Functions
//======================================================================================================================

/// Installs the process-wide panic hook. Threads that are not coroutines keep the hook that was installed before.
pub(crate) fn install_hook() {
    INSTALL_HOOK.call_once(|| {
        let previous = panic::take_hook();
        panic::set_hook(Box::new(move |info| match CAPTURE.with(Cell::get) {
            Some(capture) => {
                let location: String = match info.location() {
                    Some(location) => location.to_string(),
                    None => "<unknown>".to_string(),
                };
                let trace: String = if capture {
                    format!("panicked at {}\n{}", location, Backtrace::force_capture())
                } else {
                    format!("panicked at {}", location)
                };
                LAST_PANIC.with(|last| *last.borrow_mut() = Some(trace));
            },
            None => previous(info),
        }));
    });
}

/// Marks the calling thread as a coroutine thread.
pub(crate) fn enter_coroutine(capture_stack_traces: bool) {
    CAPTURE.with(|capture| capture.set(Some(capture_stack_traces)));
}

/// Takes what the hook recorded about the last panic on the calling thread.
pub(crate) fn take_last_panic() -> Option<String> {
    LAST_PANIC.with(|last| last.borrow_mut().take())
}

/// Renders a panic payload.
pub(crate) fn payload_message(value: &(dyn Any + Send)) -> String {
    if let Some(s) = value.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = value.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

//======================================================================================================================
// Trait Implementations
//======================================================================================================================

impl fmt::Display for PanicError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "coroutine {} panicked: {}", self.coroutine, self.message)
    }
}

impl fmt::Debug for PanicError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PanicError")
            .field("coroutine", &self.coroutine)
            .field("message", &self.message)
            .finish()
    }
}

impl error::Error for PanicError {}

//======================================================================================================================
// Unit Tests
//======================================================================================================================
