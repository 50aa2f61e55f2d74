// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Splits a test suite across parallel CI workers and runs this worker's share.
//!
//! See the README for the configuration options and exit codes. The moving parts live in
//! [`splitter_runner`]; this crate wires them to the command line.

#![warn(missing_docs)]

mod dispatch;
mod errors;
mod orchestrator;
mod output;
mod version;

#[doc(hidden)]
pub use dispatch::TestSplitterApp;
#[doc(hidden)]
pub use errors::ExpectedError;
#[doc(hidden)]
pub use output::{OutputContext, StderrStyles};

pub(crate) use errors::Result;
