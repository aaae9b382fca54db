// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//==============================================================================
// Imports
//==============================================================================

use ::flexi_logger::{
    Logger,
    LoggerHandle,
};
use ::parking_lot::{
    const_mutex,
    Mutex,
};
use ::std::sync::Once;

//==============================================================================
// Static Variables
//==============================================================================

/// Guardian to the logging initialize function.
static INIT_LOG: Once = Once::new();

/// Keeps the logger alive for the lifetime of the process.
static LOGGER: Mutex<Option<LoggerHandle>> = const_mutex(None);

//==============================================================================
// Standalone Functions
//==============================================================================

/// Initializes logging features. The log specification is taken from the `RUST_LOG` environment variable.
pub fn initialize() {
    INIT_LOG.call_once(|| match Logger::try_with_env_or_str("").and_then(|logger| logger.start()) {
        Ok(handle) => *LOGGER.lock() = Some(handle),
        Err(e) => eprintln!("initialize(): failed to start logger ({:?})", e),
    });
}
