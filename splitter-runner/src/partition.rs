// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Local partitioning of test cases, used when the plan service can't provide a plan.
//!
//! Every worker computes the fallback plan independently, so the result must depend only on the
//! list of test cases and the number of workers. Test file discovery returns files in sorted
//! order, which makes the input identical across workers that share a checkout.

use splitter_metadata::{Task, TestCase, TestPlan};
use std::num::NonZeroUsize;

/// Distributes `test_cases` across `parallelism` workers, round-robin.
///
/// The test case at index `i` is assigned to worker `i % parallelism`, so bucket sizes differ by
/// at most one. The plan always contains exactly `parallelism` tasks, some of which may be empty
/// if there are fewer test cases than workers.
pub fn create_fallback_plan(test_cases: &[TestCase], parallelism: NonZeroUsize) -> TestPlan {
    let parallelism = parallelism.get();
    let mut tasks: Vec<Task> = (0..parallelism)
        .map(|node_number| Task {
            node_number,
            tests: Vec::with_capacity(test_cases.len() / parallelism + 1),
        })
        .collect();

    for (index, test_case) in test_cases.iter().enumerate() {
        tasks[index % parallelism].tests.push(test_case.clone());
    }

    TestPlan {
        tasks: tasks
            .into_iter()
            .map(|task| (task.node_number.to_string(), task))
            .collect(),
    }
}
