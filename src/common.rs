// Licensed under the Apache-2.0 license

//! Shared driver plumbing.

use core::fmt;

/// Sink for driver diagnostics.
///
/// Bus controllers carry a logger as a type parameter so production builds
/// can route messages to a UART or drop them without paying for formatting.
pub trait Logger {
    /// Records one formatted message.
    fn log(&mut self, args: fmt::Arguments<'_>);
}

/// Logger that discards everything.
#[derive(Copy, Clone, Debug, Default)]
pub struct NoOpLogger;

impl Logger for NoOpLogger {
    fn log(&mut self, _args: fmt::Arguments<'_>) {}
}
