// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Runs the test-splitter binary against a mock plan service.
//!
//! The test commands are shell scripts written into a temporary project, so these tests only
//! run on Unix.

#![cfg(unix)]
