// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Exports
//======================================================================================================================

pub mod channel;
pub mod config;
pub mod fail;
pub mod logging;
pub mod scheduler;
pub mod selector;
