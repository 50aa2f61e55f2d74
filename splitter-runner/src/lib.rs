// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

#![warn(missing_docs)]

//! Core functionality for [test-splitter](https://crates.io/crates/test-splitter).
//!
//! A run goes through these steps:
//!
//! 1. The [`adapter`] for the configured test framework finds the test files.
//! 2. [`plan::PlanClient`] fetches or creates a plan assigning files to workers, falling back
//!    to [`partition::create_fallback_plan`] if the plan service can't help.
//! 3. [`supervisor::ExecutionSupervisor`] runs this worker's share of the tests, forwarding
//!    signals to the test process and retrying failures.
//! 4. A [`report::MetadataReport`] with the run's [`timeline`] is sent back to the service.

pub mod adapter;
pub mod api;
pub mod diagnostics;
pub mod errors;
pub mod partition;
pub mod plan;
pub mod report;
pub mod signal;
pub mod supervisor;
pub mod test_command;
pub mod timeline;
