// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::runtime::{
    fail::Fail,
    scheduler::panic::PanicError,
};
use ::crossbeam_channel::{
    self,
    Receiver,
    Sender,
};

//======================================================================================================================
// Structures
//======================================================================================================================

/// What the dispatcher hands to a coroutine along with the turn token.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Grant {
    /// Run user code until the next suspension point.
    Run,
    /// The dispatcher was closed. Unwind without running any further user code.
    Abandon,
}

/// Why a coroutine handed the turn token back to the dispatcher.
pub enum Release {
    /// Suspended inside a channel or selector operation.
    Blocked,
    /// The coroutine function returned.
    Done,
    /// The coroutine function panicked.
    Panicked(PanicError),
    /// The coroutine unwound after being abandoned.
    Abandoned,
}

/// Yielder lets a single coroutine give the turn token back to the dispatcher and park its thread until the token is
/// granted again. Only the thread of the coroutine owns it.
pub struct Yielder {
    grants: Receiver<Grant>,
    releases: Sender<Release>,
}

/// Yield Handle
///
/// This is the dispatcher end of a coroutine's turn token. Running a turn means granting the token and blocking until
/// the coroutine releases it.
#[derive(Clone)]
pub struct YielderHandle {
    grants: Sender<Grant>,
    releases: Receiver<Release>,
}

//======================================================================================================================
// Standalone Functions
//======================================================================================================================

/// Creates both ends of a turn token. The token starts out held by the dispatcher.
pub fn turn_token() -> (YielderHandle, Yielder) {
    let (grant_tx, grant_rx): (Sender<Grant>, Receiver<Grant>) = crossbeam_channel::bounded(1);
    let (release_tx, release_rx): (Sender<Release>, Receiver<Release>) = crossbeam_channel::bounded(1);
    (
        YielderHandle {
            grants: grant_tx,
            releases: release_rx,
        },
        Yielder {
            grants: grant_rx,
            releases: release_tx,
        },
    )
}

//======================================================================================================================
// Associate Functions
//======================================================================================================================

impl YielderHandle {
    /// Grants the turn token and waits for the coroutine to give it back. Fails if the coroutine thread is gone.
    pub fn run_turn(&self, grant: Grant) -> Result<Release, Fail> {
        if self.grants.send(grant).is_err() {
            let cause: &str = "coroutine thread is gone";
            warn!("run_turn(): {} (grant={:?})", cause, grant);
            return Err(Fail::new(libc::ECHILD, cause));
        }
        match self.releases.recv() {
            Ok(release) => Ok(release),
            Err(_) => {
                let cause: &str = "coroutine thread exited without releasing its turn";
                warn!("run_turn(): {} (grant={:?})", cause, grant);
                Err(Fail::new(libc::ECHILD, cause))
            },
        }
    }
}

impl Yielder {
    /// Parks the calling thread until the dispatcher grants the turn token. A vanished dispatcher counts as an
    /// abandonment.
    pub fn wait_for_turn(&self) -> Grant {
        self.grants.recv().unwrap_or(Grant::Abandon)
    }

    /// Gives the turn token back to the dispatcher.
    pub fn release(&self, release: Release) {
        if self.releases.send(release).is_err() {
            debug!("release(): dispatcher is gone");
        }
    }

    /// Gives the turn token back and parks until it is granted again.
    pub fn yield_turn(&self, release: Release) -> Grant {
        self.release(release);
        self.wait_for_turn()
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================
