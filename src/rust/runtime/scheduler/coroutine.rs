// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::runtime::{
    fail::Fail,
    scheduler::{
        context::Context,
        dispatcher::{
            Settings,
            Shared,
        },
        panic::{
            self,
            Abandoned,
            PanicError,
        },
        yielder::{
            self,
            Grant,
            Release,
            Yielder,
            YielderHandle,
        },
    },
};
use ::std::{
    backtrace::Backtrace,
    fmt,
    panic::AssertUnwindSafe,
    sync::Arc,
    thread::{
        self,
        JoinHandle,
    },
};

//======================================================================================================================
// Structures
//======================================================================================================================

/// Externally visible coroutine identifier. Identifiers follow creation order.
#[derive(Clone, Copy, Hash, PartialEq, Eq, PartialOrd, Ord, Debug)]
pub struct CoroutineId(pub u64);

/// Lifecycle of a coroutine.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum CoroutineStatus {
    /// Waiting in the ready sequence for its turn.
    Runnable,
    /// Holding the turn token.
    Running,
    /// Suspended inside a channel or selector operation.
    Blocked,
    /// Returned normally.
    Done,
    /// Panicked. Takes no further turns.
    Panicked,
}

/// Snapshot of a coroutine, for diagnostics.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CoroutineInfo {
    pub id: CoroutineId,
    pub name: String,
    pub status: CoroutineStatus,
    /// Operation the coroutine last suspended on, while it has not been resumed.
    pub blocked_on: Option<String>,
}

/// Body of a coroutine.
pub type CoroutineFn = Box<dyn FnOnce(&Context) + Send + 'static>;

/// Dispatcher-side record of a coroutine. The coroutine itself runs on its own thread, parked unless it holds the
/// turn token.
pub struct Coroutine {
    id: CoroutineId,
    name: String,
    status: CoroutineStatus,
    blocked_on: Option<String>,
    /// Stack at the last suspension point.
    stack: Option<Backtrace>,
    /// Stack at the time of the panic.
    panic_trace: Option<String>,
    handle: YielderHandle,
    thread: Option<JoinHandle<()>>,
}

//======================================================================================================================
// Associate Functions
//======================================================================================================================

impl Coroutine {
    /// Starts the thread of a new coroutine. The thread stays parked until it is granted its first turn.
    pub fn spawn(
        dispatcher: &Arc<Shared>,
        id: CoroutineId,
        name: String,
        settings: &Settings,
        body: CoroutineFn,
    ) -> Result<Self, Fail> {
        let (handle, yielder): (YielderHandle, Yielder) = yielder::turn_token();
        let mut builder: thread::Builder =
            thread::Builder::new().name(format!("{}{}", settings.thread_name_prefix, name).replace('\0', ""));
        if let Some(stack_size) = settings.stack_size {
            builder = builder.stack_size(stack_size);
        }

        let dispatcher: Arc<Shared> = dispatcher.clone();
        let thread_name: String = name.clone();
        let capture_stack_traces: bool = settings.capture_stack_traces;
        let thread: JoinHandle<()> = match builder
            .spawn(move || Self::run(dispatcher, id, thread_name, yielder, capture_stack_traces, body))
        {
            Ok(thread) => thread,
            Err(e) => {
                let cause: String = format!("cannot spawn coroutine thread (name={:?}): {}", name, e);
                error!("spawn(): {}", cause);
                return Err(Fail::new(libc::EAGAIN, &cause));
            },
        };
        trace!("spawn(): id={:?}, name={:?}", id, name);

        Ok(Self {
            id,
            name,
            status: CoroutineStatus::Runnable,
            blocked_on: None,
            stack: None,
            panic_trace: None,
            handle,
            thread: Some(thread),
        })
    }

    /// Main function of a coroutine thread.
    fn run(
        dispatcher: Arc<Shared>,
        id: CoroutineId,
        name: String,
        yielder: Yielder,
        capture_stack_traces: bool,
        body: CoroutineFn,
    ) {
        if yielder.wait_for_turn() == Grant::Abandon {
            yielder.release(Release::Abandoned);
            return;
        }

        panic::enter_coroutine(capture_stack_traces);
        let ctx: Context = Context::new(dispatcher, id, name, yielder, capture_stack_traces);
        let release: Release = match ::std::panic::catch_unwind(AssertUnwindSafe(|| body(&ctx))) {
            Ok(()) => Release::Done,
            Err(value) if value.is::<Abandoned>() => Release::Abandoned,
            Err(value) => {
                let trace: String = panic::take_last_panic().unwrap_or_else(|| "panicked at <unknown>".to_string());
                Release::Panicked(PanicError::new(ctx.coroutine_name(), value, &trace))
            },
        };
        ctx.release(release);
    }

    pub fn id(&self) -> CoroutineId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn status(&self) -> CoroutineStatus {
        self.status
    }

    pub fn handle(&self) -> YielderHandle {
        self.handle.clone()
    }

    /// Whether the coroutine thread may still run user code.
    pub fn is_live(&self) -> bool {
        !matches!(self.status, CoroutineStatus::Done | CoroutineStatus::Panicked)
    }

    /// The coroutine was granted the turn token.
    pub fn start_turn(&mut self) {
        self.status = CoroutineStatus::Running;
        self.blocked_on = None;
        self.stack = None;
    }

    /// The coroutine suspended on `reason`.
    pub fn suspend(&mut self, reason: String, stack: Option<Backtrace>) {
        self.status = CoroutineStatus::Blocked;
        self.blocked_on = Some(reason);
        self.stack = stack;
    }

    /// Moves a blocked coroutine back to the ready sequence. Returns false if the coroutine was not blocked.
    pub fn make_runnable(&mut self) -> bool {
        if self.status != CoroutineStatus::Blocked {
            return false;
        }
        self.status = CoroutineStatus::Runnable;
        true
    }

    pub fn complete(&mut self) {
        self.status = CoroutineStatus::Done;
        self.blocked_on = None;
        self.stack = None;
    }

    pub fn fail(&mut self, error: &PanicError) {
        self.status = CoroutineStatus::Panicked;
        self.blocked_on = None;
        self.stack = None;
        self.panic_trace = Some(error.stack_trace().to_string());
    }

    /// Takes the thread handle, so that the thread can be joined without holding the dispatcher lock.
    pub fn take_thread(&mut self) -> Option<JoinHandle<()>> {
        self.thread.take()
    }

    pub fn info(&self) -> CoroutineInfo {
        CoroutineInfo {
            id: self.id,
            name: self.name.clone(),
            status: self.status,
            blocked_on: self.blocked_on.clone(),
        }
    }

    /// Stack trace section of this coroutine.
    pub fn describe(&self) -> String {
        if let Some(trace) = self.panic_trace.as_ref() {
            return format!("{}\n", trace);
        }
        let state: String = match (self.status, self.blocked_on.as_ref()) {
            (CoroutineStatus::Blocked, Some(reason)) => reason.clone(),
            (status, _) => status.to_string(),
        };
        let stack: String = match (self.stack.as_ref(), self.blocked_on.is_some()) {
            (Some(stack), _) => stack.to_string(),
            (None, true) => "(no stack captured)\n".to_string(),
            (None, false) if self.status == CoroutineStatus::Running => "(running)\n".to_string(),
            (None, false) => "(not started)\n".to_string(),
        };
        format!("coroutine {} [{}]:\n{}\n", self.name, state, stack)
    }
}

//======================================================================================================================
// Trait Implementations
//======================================================================================================================

impl fmt::Display for CoroutineStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label: &str = match self {
            CoroutineStatus::Runnable => "runnable",
            CoroutineStatus::Running => "running",
            CoroutineStatus::Blocked => "blocked",
            CoroutineStatus::Done => "done",
            CoroutineStatus::Panicked => "panicked",
        };
        f.write_str(label)
    }
}
