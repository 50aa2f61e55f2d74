// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

#![warn(missing_docs)]

//! Wire types for [test-splitter](https://crates.io/crates/test-splitter) test plans.
//!
//! The types in this crate are exchanged with the test plan service as JSON. They are kept in a
//! separate crate so that tools which only want to read or produce plans don't need to depend on
//! the full runner.

mod errors;
mod exit_codes;
mod plan;

pub use errors::*;
pub use exit_codes::*;
pub use plan::*;
