// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Implementation of our deterministic coroutine dispatcher.
//!
//! Every coroutine runs on a thread of its own, but a coroutine only executes while it holds its turn token, and the
//! dispatcher hands out one token at a time. Coroutines get their turns in the order of the ready sequence: coroutines
//! enter it when they are created and when a channel operation unblocks them, so the interleaving is a function of the
//! program alone.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::runtime::{
    config::Config,
    fail::Fail,
    scheduler::{
        context::Context,
        coroutine::{
            Coroutine,
            CoroutineFn,
            CoroutineId,
            CoroutineInfo,
            CoroutineStatus,
        },
        panic::{
            self,
            PanicError,
        },
        yielder::{
            Grant,
            Release,
            YielderHandle,
        },
    },
};
use ::parking_lot::Mutex;
use ::slab::Slab;
use ::std::{
    backtrace::Backtrace,
    collections::VecDeque,
    sync::Arc,
    thread::JoinHandle,
};

//======================================================================================================================
// Constants
//======================================================================================================================

/// Name of the coroutine a dispatcher is created with.
const ROOT_NAME: &str = "root";

//======================================================================================================================
// Structures
//======================================================================================================================

/// Dispatcher options, resolved from a [Config].
#[derive(Clone, Debug)]
pub struct Settings {
    pub thread_name_prefix: String,
    pub stack_size: Option<usize>,
    pub capture_stack_traces: bool,
}

struct DispatcherState {
    /// All coroutines ever created, indexed by their identifiers. Coroutines are never removed, so iteration follows
    /// creation order.
    coroutines: Slab<Coroutine>,
    /// Coroutines waiting for their turn, in the order they will get it.
    ready: VecDeque<CoroutineId>,
    /// The coroutine holding the turn token, if any.
    running: Option<CoroutineId>,
    // Sequence numbers for default names.
    coroutine_sequence: u64,
    channel_sequence: u64,
    selector_sequence: u64,
    closed: bool,
}

/// State shared between the dispatcher, its coroutines and the wakers registered on channels.
pub struct Shared {
    state: Mutex<DispatcherState>,
    settings: Settings,
}

/// Container of a set of coroutines.
///
/// Driver code calls [Dispatcher::execute_until_all_blocked] in a loop, typically once per external event, until
/// [Dispatcher::is_done] holds. Dropping the dispatcher closes it.
pub struct Dispatcher {
    shared: Arc<Shared>,
}

/// Outcome of the blocking bookkeeping of [Shared::suspend].
pub enum Suspension {
    Suspended,
    Closed,
}

//======================================================================================================================
// Associate Functions
//======================================================================================================================

impl Settings {
    pub fn new(config: &Config) -> Result<Self, Fail> {
        Ok(Self {
            thread_name_prefix: config.thread_name_prefix()?,
            stack_size: config.stack_size()?,
            capture_stack_traces: config.capture_stack_traces()?,
        })
    }
}

impl Shared {
    /// Creates a coroutine and appends it to the ready sequence. Unnamed coroutines get a sequence-numbered name.
    pub fn spawn(self: &Arc<Self>, name: Option<&str>, body: CoroutineFn) -> Result<CoroutineId, Fail> {
        let mut state = self.state.lock();
        if state.closed {
            let cause: &str = "dispatcher is closed";
            warn!("spawn(): {}", cause);
            return Err(Fail::new(libc::EBADF, cause));
        }
        let name: String = match name {
            Some(name) => name.to_string(),
            None => {
                state.coroutine_sequence += 1;
                format!("coroutine-{}", state.coroutine_sequence)
            },
        };
        let entry = state.coroutines.vacant_entry();
        let id: CoroutineId = CoroutineId(entry.key() as u64);
        let coroutine: Coroutine = Coroutine::spawn(self, id, name, &self.settings, body)?;
        entry.insert(coroutine);
        state.ready.push_back(id);
        Ok(id)
    }

    /// Appends a blocked coroutine to the ready sequence.
    pub fn wake(&self, id: CoroutineId) {
        let mut state = self.state.lock();
        if state.closed {
            return;
        }
        let woken: bool = match state.coroutines.get_mut(id.0 as usize) {
            Some(coroutine) => coroutine.make_runnable(),
            None => false,
        };
        if woken {
            trace!("wake(): id={:?}", id);
            state.ready.push_back(id);
        }
    }

    /// Records that the running coroutine `id` suspends on `reason`.
    pub fn suspend(&self, id: CoroutineId, reason: String, stack: Option<Backtrace>) -> Suspension {
        let mut state = self.state.lock();
        if state.closed {
            return Suspension::Closed;
        }
        if state.running != Some(id) {
            let running: Option<CoroutineId> = state.running;
            drop(state);
            panic!(
                "coroutine {:?} blocked on {} outside of its turn (running={:?})",
                id, reason, running
            );
        }
        trace!("suspend(): id={:?}, reason={:?}", id, reason);
        state.running = None;
        if let Some(coroutine) = state.coroutines.get_mut(id.0 as usize) {
            coroutine.suspend(reason, stack);
        }
        Suspension::Suspended
    }

    pub fn next_channel_name(&self) -> String {
        let mut state = self.state.lock();
        state.channel_sequence += 1;
        format!("chan-{}", state.channel_sequence)
    }

    pub fn next_selector_name(&self) -> String {
        let mut state = self.state.lock();
        state.selector_sequence += 1;
        format!("selector-{}", state.selector_sequence)
    }

    pub fn capture_stack_traces(&self) -> bool {
        self.settings.capture_stack_traces
    }

    /// Pops the head of the ready sequence and hands it the turn token bookkeeping-wise.
    fn next_runnable(&self) -> Option<(CoroutineId, YielderHandle)> {
        let mut state = self.state.lock();
        while let Some(id) = state.ready.pop_front() {
            if let Some(coroutine) = state.coroutines.get_mut(id.0 as usize) {
                if coroutine.status() != CoroutineStatus::Runnable {
                    continue;
                }
                coroutine.start_turn();
                let handle: YielderHandle = coroutine.handle();
                state.running = Some(id);
                return Some((id, handle));
            }
        }
        None
    }

    /// Accounts for the way coroutine `id` gave its turn back. Returns the panic it raised, if any.
    fn finish_turn(&self, id: CoroutineId, release: Result<Release, Fail>) -> Option<PanicError> {
        let (panic, thread): (Option<PanicError>, Option<JoinHandle<()>>) = {
            let mut state = self.state.lock();
            state.running = None;
            let coroutine: &mut Coroutine = state.coroutines.get_mut(id.0 as usize)?;
            match release {
                Ok(Release::Blocked) => (None, None),
                Ok(Release::Done) => {
                    debug!("finish_turn(): coroutine {:?} completed", coroutine.name());
                    coroutine.complete();
                    (None, coroutine.take_thread())
                },
                Ok(Release::Panicked(error)) => {
                    debug!("finish_turn(): coroutine {:?} panicked: {}", coroutine.name(), error.message());
                    coroutine.fail(&error);
                    (Some(error), coroutine.take_thread())
                },
                Ok(Release::Abandoned) => {
                    warn!("finish_turn(): coroutine {:?} unwound during a turn", coroutine.name());
                    coroutine.complete();
                    (None, coroutine.take_thread())
                },
                Err(e) => {
                    let error: PanicError = PanicError::new(
                        coroutine.name(),
                        Box::new(e.cause.clone()),
                        "coroutine thread terminated unexpectedly",
                    );
                    error!("finish_turn(): {}", error);
                    coroutine.fail(&error);
                    (Some(error), coroutine.take_thread())
                },
            }
        };
        if let Some(thread) = thread {
            if thread.join().is_err() {
                warn!("finish_turn(): coroutine thread {:?} did not exit cleanly", id);
            }
        }
        panic
    }
}

impl Dispatcher {
    /// Creates a new dispatcher with a root coroutine.
    pub fn new<F>(root: F) -> Result<Self, Fail>
    where
        F: FnOnce(&Context) + Send + 'static,
    {
        Self::with_config(&Config::default(), root)
    }

    /// Creates a new dispatcher with a root coroutine, using `config` for coroutine threads.
    pub fn with_config<F>(config: &Config, root: F) -> Result<Self, Fail>
    where
        F: FnOnce(&Context) + Send + 'static,
    {
        panic::install_hook();
        let shared: Arc<Shared> = Arc::new(Shared {
            state: Mutex::new(DispatcherState {
                coroutines: Slab::new(),
                ready: VecDeque::new(),
                running: None,
                coroutine_sequence: 0,
                channel_sequence: 0,
                selector_sequence: 0,
                closed: false,
            }),
            settings: Settings::new(config)?,
        });
        shared.spawn(Some(ROOT_NAME), Box::new(root))?;
        Ok(Self { shared })
    }

    /// Executes coroutines one by one in deterministic order until all of them are completed or blocked on a channel
    /// or a selector.
    ///
    /// If coroutines panicked along the way, the first panic is returned. Later panics of the same call are logged and
    /// dropped; their coroutines still show up as panicked in [Dispatcher::stack_trace]. Panics do not stop the other
    /// coroutines. Once the dispatcher is closed, this does nothing.
    pub fn execute_until_all_blocked(&mut self) -> Result<(), PanicError> {
        if self.shared.state.lock().closed {
            warn!("execute_until_all_blocked(): dispatcher is closed");
            return Ok(());
        }

        let mut first_panic: Option<PanicError> = None;
        while let Some((id, handle)) = self.shared.next_runnable() {
            trace!("execute_until_all_blocked(): granting turn to {:?}", id);
            let release: Result<Release, Fail> = handle.run_turn(Grant::Run);
            if let Some(error) = self.shared.finish_turn(id, release) {
                match first_panic {
                    None => first_panic = Some(error),
                    Some(_) => warn!("execute_until_all_blocked(): dropping subsequent panic: {}", error),
                }
            }
        }

        match first_panic {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    /// Returns true when every coroutine has either completed or panicked.
    pub fn is_done(&self) -> bool {
        let state = self.shared.state.lock();
        state.coroutines.iter().all(|(_, coroutine)| !coroutine.is_live())
    }

    /// Destroys all coroutines without waiting for their completion. Each live coroutine unwinds from its current
    /// suspension point without running further user code, and its thread is joined before this returns.
    pub fn close(&mut self) {
        let abandoned: Vec<(CoroutineId, YielderHandle, Option<JoinHandle<()>>)> = {
            let mut state = self.shared.state.lock();
            if state.closed {
                return;
            }
            state.closed = true;
            state.ready.clear();
            state
                .coroutines
                .iter_mut()
                .filter(|(_, coroutine)| coroutine.is_live())
                .map(|(_, coroutine)| (coroutine.id(), coroutine.handle(), coroutine.take_thread()))
                .collect()
        };

        for (id, handle, thread) in abandoned {
            debug!("close(): abandoning coroutine {:?}", id);
            if let Err(e) = handle.run_turn(Grant::Abandon) {
                warn!("close(): coroutine {:?} could not be abandoned: {:?}", id, e);
            }
            if let Some(thread) = thread {
                if thread.join().is_err() {
                    warn!("close(): coroutine thread {:?} did not exit cleanly", id);
                }
            }
        }
    }

    /// Stack traces of all coroutines that have not completed, in creation order.
    pub fn stack_trace(&self) -> String {
        let state = self.shared.state.lock();
        state
            .coroutines
            .iter()
            .filter(|(_, coroutine)| coroutine.status() != CoroutineStatus::Done)
            .map(|(_, coroutine)| coroutine.describe())
            .collect::<Vec<String>>()
            .join("\n")
    }

    /// Snapshots of all coroutines, in creation order.
    pub fn coroutines(&self) -> Vec<CoroutineInfo> {
        let state = self.shared.state.lock();
        state.coroutines.iter().map(|(_, coroutine)| coroutine.info()).collect()
    }
}

//======================================================================================================================
// Trait Implementations
//======================================================================================================================

impl Drop for Dispatcher {
    fn drop(&mut self) {
        self.close();
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================
