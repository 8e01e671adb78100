// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Contract-violation termination.
//!
//! A violated internal invariant on shared memory leaves counters that other
//! processes depend on in an unknown state. Those paths log a diagnostic and
//! abort instead of returning an error.

use std::fmt;
use std::time::Duration;

/// Delay before aborting so the diagnostic reaches the log sink.
pub const LOG_FLUSH_DELAY: Duration = Duration::from_millis(50);

/// Log a contract violation and abort the process.
#[cold]
#[inline(never)]
pub fn terminate(file: &str, line: u32, condition: Option<&str>, message: fmt::Arguments<'_>) -> ! {
    tracing::error!(
        condition = condition.unwrap_or("<none>"),
        file,
        line,
        "Contract violation: {}",
        message
    );
    std::thread::sleep(LOG_FLUSH_DELAY);
    std::process::abort()
}

/// Abort unconditionally with a formatted diagnostic.
#[macro_export]
macro_rules! contract_violation {
    ($($arg:tt)+) => {
        $crate::fatal::terminate(file!(), line!(), None, format_args!($($arg)+))
    };
}

/// Abort with a formatted diagnostic unless `cond` holds.
#[macro_export]
macro_rules! ensure_contract {
    ($cond:expr, $($arg:tt)+) => {
        if !($cond) {
            $crate::fatal::terminate(
                file!(),
                line!(),
                Some(stringify!($cond)),
                format_args!($($arg)+),
            )
        }
    };
}
