// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use std::{error, fmt};

/// An error returned by [`TestPlan::validate`](crate::TestPlan::validate).
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum PlanValidationError {
    /// The plan has no tasks at all.
    ///
    /// This is how the plan service signals that it could not compute an assignment.
    Sentinel,

    /// The task keys don't cover exactly `0..parallelism`.
    NodeMismatch {
        /// The expected number of workers.
        parallelism: usize,

        /// The task keys present in the plan, in sorted order.
        keys: Vec<String>,
    },

    /// A test case in the plan has an empty path.
    EmptyPath {
        /// The task key the test case belongs to.
        node: String,
    },
}

impl fmt::Display for PlanValidationError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Sentinel => write!(f, "test plan has no tasks"),
            Self::NodeMismatch { parallelism, keys } => {
                write!(
                    f,
                    "test plan tasks [{}] don't match parallelism {parallelism}",
                    keys.join(", ")
                )
            }
            Self::EmptyPath { node } => {
                write!(f, "task for node {node} contains a test case with an empty path")
            }
        }
    }
}

impl error::Error for PlanValidationError {}
