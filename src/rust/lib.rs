// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Deterministic cooperative coroutines.
//!
//! A [Dispatcher] owns a set of coroutines and runs them one at a time until every one of them is either blocked on a
//! [Channel] or a [Selector], or finished. Each coroutine rides on its own thread, but only the coroutine holding the
//! turn token executes, so the interleaving depends only on the program itself and never on host scheduling.

#![cfg_attr(feature = "strict", deny(warnings))]
#![deny(clippy::all)]

#[macro_use]
extern crate log;

pub mod runtime;

pub use self::runtime::{
    channel::{
        Channel,
        TryRecvError,
        TrySendError,
    },
    config::Config,
    fail::Fail,
    scheduler::{
        context::Context,
        coroutine::{
            CoroutineId,
            CoroutineInfo,
            CoroutineStatus,
        },
        dispatcher::Dispatcher,
        panic::PanicError,
    },
    selector::Selector,
};

//======================================================================================================================
// Macros
//======================================================================================================================

/// Ensures that two expressions are equal, bailing out of an [anyhow::Result] returning function otherwise.
#[macro_export]
macro_rules! ensure_eq {
    ($left:expr, $right:expr $(,)?) => {{
        match (&$left, &$right) {
            (left_val, right_val) => {
                if !(*left_val == *right_val) {
                    anyhow::bail!(
                        "ensure failed: `(left == right)` left: `{:?}`, right: `{:?}` at {}:{}",
                        left_val,
                        right_val,
                        file!(),
                        line!()
                    );
                }
            },
        }
    }};
}

/// Ensures that two expressions are not equal, bailing out of an [anyhow::Result] returning function otherwise.
#[macro_export]
macro_rules! ensure_neq {
    ($left:expr, $right:expr $(,)?) => {{
        match (&$left, &$right) {
            (left_val, right_val) => {
                if *left_val == *right_val {
                    anyhow::bail!(
                        "ensure failed: `(left != right)` left: `{:?}`, right: `{:?}` at {}:{}",
                        left_val,
                        right_val,
                        file!(),
                        line!()
                    );
                }
            },
        }
    }};
}
