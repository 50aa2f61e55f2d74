// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use camino::Utf8Path;
use serde_json::{Value, json};
use splitter_metadata::TestCase;
use splitter_runner::{
    adapter::RunnerAdapter,
    api::{ApiClient, ApiClientConfig, RequestTiming},
    diagnostics::Diagnostics,
    errors::{DiscoverFilesError, ListExamplesError, ResultFileError},
    test_command::TestCommand,
};
use std::{sync::Mutex, time::Duration};
use wiremock::MockServer;

pub(crate) const ORG: &str = "acme";
pub(crate) const SUITE: &str = "web";
pub(crate) const TOKEN: &str = "test-token";
pub(crate) const IDENTIFIER: &str = "build-1/step-1";

pub(crate) const PLAN_PATH: &str = "/v2/analytics/organizations/acme/suites/web/test_plan";
pub(crate) const TIMINGS_PATH: &str = "/v2/analytics/organizations/acme/suites/web/test_files";
pub(crate) const METADATA_PATH: &str =
    "/v2/analytics/organizations/acme/suites/web/test_plan_metadata";
pub(crate) const CREATE_PATH: &str = "/test-splitting/plan";

/// Timing that keeps retry tests fast while still exercising every attempt.
pub(crate) fn fast_timing() -> RequestTiming {
    RequestTiming {
        max_attempts: 5,
        initial_delay: Duration::from_millis(1),
        max_delay: Some(Duration::from_millis(4)),
        jitter: false,
        attempt_timeout: Duration::from_secs(5),
        phase_timeout: Duration::from_secs(30),
    }
}

pub(crate) fn client_with_timing(server: &MockServer, timing: RequestTiming) -> ApiClient {
    ApiClient::new(
        ApiClientConfig {
            server_base_url: server.uri(),
            access_token: TOKEN.to_owned(),
            organization_slug: ORG.to_owned(),
            timing,
        },
        Diagnostics::new(true),
    )
    .expect("client builds")
}

pub(crate) fn client(server: &MockServer) -> ApiClient {
    client_with_timing(server, fast_timing())
}

pub(crate) fn files(names: &[&str]) -> Vec<String> {
    names.iter().map(|name| name.to_string()).collect()
}

/// A plan body in the service's format, one entry per worker.
pub(crate) fn plan_json(tasks: &[&[&str]]) -> Value {
    let tasks: serde_json::Map<String, Value> = tasks
        .iter()
        .enumerate()
        .map(|(node, paths)| {
            let tests: Vec<Value> = paths.iter().map(|path| json!({ "path": path })).collect();
            (
                node.to_string(),
                json!({ "node_number": node, "tests": tests }),
            )
        })
        .collect();
    json!({ "tasks": tasks })
}

/// An adapter that lists canned examples and never runs anything.
pub(crate) struct ListingAdapter {
    examples: Result<Vec<TestCase>, ()>,
    listed: Mutex<Vec<Vec<String>>>,
}

impl ListingAdapter {
    pub(crate) fn new(examples: Vec<TestCase>) -> Self {
        Self {
            examples: Ok(examples),
            listed: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn unsupported() -> Self {
        Self {
            examples: Err(()),
            listed: Mutex::new(Vec::new()),
        }
    }

    /// The file lists passed to `get_examples`, in order.
    pub(crate) fn listed(&self) -> Vec<Vec<String>> {
        self.listed.lock().expect("lock is not poisoned").clone()
    }
}

impl RunnerAdapter for ListingAdapter {
    fn name(&self) -> &'static str {
        "listing"
    }

    fn result_path(&self) -> &Utf8Path {
        Utf8Path::new("listing-result.json")
    }

    fn get_files(&self) -> Result<Vec<String>, DiscoverFilesError> {
        Ok(Vec::new())
    }

    async fn get_examples(&self, files: &[String]) -> Result<Vec<TestCase>, ListExamplesError> {
        self.listed
            .lock()
            .expect("lock is not poisoned")
            .push(files.to_vec());
        self.examples
            .clone()
            .map_err(|()| ListExamplesError::Unsupported { runner: "listing" })
    }

    fn command(&self, test_cases: &[String]) -> TestCommand {
        TestCommand::new("true", test_cases.to_vec())
    }

    fn retry_command(&self, failed_names: &[String]) -> TestCommand {
        TestCommand::new("true", failed_names.to_vec())
    }

    fn failed_tests(&self) -> Result<Vec<String>, ResultFileError> {
        Ok(Vec::new())
    }
}
