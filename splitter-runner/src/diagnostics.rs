// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

/// Controls how much diagnostic detail is emitted while splitting and running tests.
///
/// This is passed explicitly to the components that log requests and commands, rather than
/// being read from process-wide state.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Diagnostics {
    debug: bool,
}

impl Diagnostics {
    /// Creates a new `Diagnostics`.
    pub fn new(debug: bool) -> Self {
        Self { debug }
    }

    /// Diagnostics with debug output turned off.
    pub fn disabled() -> Self {
        Self::default()
    }

    /// Returns true if request bodies, response bodies and full commands should be logged.
    pub fn is_debug(self) -> bool {
        self.debug
    }
}
