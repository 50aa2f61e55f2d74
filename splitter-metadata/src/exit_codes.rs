// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

/// Documented exit codes for `test-splitter` failures.
///
/// If the test framework itself fails and the failure isn't recovered by retries, its exit code
/// is propagated verbatim instead. The codes here are only produced by `test-splitter` itself.
pub enum SplitterExitCode {}

impl SplitterExitCode {
    /// No errors occurred, or all failing tests passed on retry.
    pub const OK: i32 = 0;

    /// An error internal to test-splitter occurred.
    ///
    /// This covers invalid configuration, command templates that could not be rendered, test
    /// processes that could not be started or were terminated by a signal, and plans that
    /// don't contain an entry for this worker.
    pub const INTERNAL_ERROR: i32 = 16;
}
