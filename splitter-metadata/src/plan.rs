// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::PlanValidationError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A single unit of work: either a whole test file, or one example inside a file.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Deserialize, Serialize)]
pub struct TestCase {
    /// The path (or runner-specific identifier) passed to the test framework.
    ///
    /// For example-level test cases this is usually a location such as
    /// `./spec/models/user_spec.rb[1:2]`.
    pub path: String,

    /// The fine-grained name of the example, if this test case is an example.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl TestCase {
    /// Creates a new file-level test case.
    pub fn file(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            name: None,
        }
    }

    /// Creates a new example-level test case.
    pub fn example(path: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            name: Some(name.into()),
        }
    }
}

/// The set of test cases assigned to one worker.
#[derive(Clone, Debug, Default, Eq, PartialEq, Deserialize, Serialize)]
pub struct Task {
    /// The zero-based index of the worker this task is for.
    #[serde(default)]
    pub node_number: usize,

    /// The test cases to run, in order.
    #[serde(default)]
    pub tests: Vec<TestCase>,
}

impl Task {
    /// Returns the paths of all test cases in this task, in order.
    pub fn paths(&self) -> Vec<String> {
        self.tests.iter().map(|test| test.path.clone()).collect()
    }
}

/// A full distribution of test cases across workers.
///
/// Keys are worker indexes formatted as decimal strings (`"0"` through `"N-1"`). A plan with no
/// tasks at all is the plan service's way of saying that it could not compute an assignment: it
/// is never a real assignment of zero work.
#[derive(Clone, Debug, Default, Eq, PartialEq, Deserialize, Serialize)]
pub struct TestPlan {
    /// Tasks keyed by worker index.
    #[serde(default)]
    pub tasks: BTreeMap<String, Task>,
}

impl TestPlan {
    /// Returns true if this is the empty sentinel plan.
    pub fn is_sentinel(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Returns the task for the given worker index, if the plan contains one.
    pub fn task_for(&self, node_index: usize) -> Option<&Task> {
        self.tasks.get(&node_index.to_string())
    }

    /// Returns the total number of test cases across all tasks.
    pub fn test_count(&self) -> usize {
        self.tasks.values().map(|task| task.tests.len()).sum()
    }

    /// Checks that this plan is a usable assignment for `parallelism` workers.
    pub fn validate(&self, parallelism: usize) -> Result<(), PlanValidationError> {
        if self.is_sentinel() {
            return Err(PlanValidationError::Sentinel);
        }

        let keys_match = self.tasks.len() == parallelism
            && (0..parallelism).all(|node| self.tasks.contains_key(&node.to_string()));
        if !keys_match {
            return Err(PlanValidationError::NodeMismatch {
                parallelism,
                keys: self.tasks.keys().cloned().collect(),
            });
        }

        for (node, task) in &self.tasks {
            if task.tests.iter().any(|test| test.path.is_empty()) {
                return Err(PlanValidationError::EmptyPath { node: node.clone() });
            }
        }

        Ok(())
    }
}

/// Parameters sent to the plan service to create a new test plan.
#[derive(Clone, Debug, Eq, PartialEq, Deserialize, Serialize)]
pub struct TestPlanParams {
    /// The suite the plan is for.
    pub suite_slug: String,

    /// The planning mode, e.g. `static`.
    pub mode: String,

    /// Identifies the build (and step) the plan is for.
    pub identifier: String,

    /// The number of workers to split across.
    pub parallelism: usize,

    /// The tests to split.
    pub tests: TestPlanParamsTests,
}

/// The tests included in [`TestPlanParams`].
#[derive(Clone, Debug, Default, Eq, PartialEq, Deserialize, Serialize)]
pub struct TestPlanParamsTests {
    /// File-level test cases.
    #[serde(default)]
    pub files: Vec<TestCase>,

    /// Example-level test cases, produced by splitting slow files.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub examples: Vec<TestCase>,
}
