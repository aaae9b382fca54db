// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

pub(crate) mod waker;
pub(crate) mod yielder;

//==============================================================================
// Exports
//==============================================================================

pub mod context;
pub mod coroutine;
pub mod dispatcher;
pub mod panic;
