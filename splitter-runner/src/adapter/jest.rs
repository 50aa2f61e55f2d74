// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use super::{RunnerAdapter, RunnerConfig, RunnerDefaults, RunnerSettings, dedup_names};
use crate::{
    errors::{DiscoverFilesError, ListExamplesError, ResultFileError, RunnerConfigError},
    test_command::TestCommand,
};
use camino::Utf8Path;
use serde::Deserialize;
use splitter_metadata::TestCase;

/// Adapter for [Jest](https://jestjs.io).
///
/// Jest has no way to list the tests in a file without running them, so Jest test files are
/// always split at file granularity.
#[derive(Clone, Debug)]
pub struct Jest {
    settings: RunnerSettings,
}

impl Jest {
    /// The name of this framework in configuration.
    pub const NAME: &'static str = "jest";

    /// The defaults used for fields that aren't configured.
    pub const DEFAULTS: RunnerDefaults = RunnerDefaults {
        test_command: "yarn test {{testExamples}} --json --testLocationInResults --outputFile {{outputFile}}",
        retry_test_command: "yarn test --testNamePattern '{{testNamePattern}}' --json --testLocationInResults --outputFile {{outputFile}}",
        test_file_pattern: "**/{__tests__/**/*,*.spec,*.test}.{ts,js,tsx,jsx}",
        test_file_exclude_pattern: Some("node_modules"),
        result_path: "jest-result.json",
    };

    /// Creates a new adapter, validating the command templates and file patterns.
    pub fn new(config: RunnerConfig) -> Result<Self, RunnerConfigError> {
        let settings = RunnerSettings::new(Self::NAME, config, &Self::DEFAULTS)?;
        Ok(Self { settings })
    }
}

impl RunnerAdapter for Jest {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn result_path(&self) -> &Utf8Path {
        self.settings.result_path()
    }

    fn get_files(&self) -> Result<Vec<String>, DiscoverFilesError> {
        self.settings.discover_files(Utf8Path::new("."))
    }

    async fn get_examples(&self, _files: &[String]) -> Result<Vec<TestCase>, ListExamplesError> {
        Err(ListExamplesError::Unsupported { runner: Self::NAME })
    }

    fn command(&self, test_cases: &[String]) -> TestCommand {
        self.settings.command(test_cases)
    }

    fn retry_command(&self, failed_names: &[String]) -> TestCommand {
        self.settings.retry_command(failed_names)
    }

    fn failed_tests(&self) -> Result<Vec<String>, ResultFileError> {
        let path = self.settings.result_path();
        let report: JestReport = super::read_result_file(path)?;
        report.failed_tests(path)
    }
}

/// The subset of Jest's `--json` output that's used here.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JestReport {
    #[serde(default)]
    num_runtime_error_test_suites: usize,
    #[serde(default)]
    test_results: Vec<JestSuiteResult>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JestSuiteResult {
    #[serde(default)]
    status: String,
    #[serde(default)]
    assertion_results: Vec<JestAssertionResult>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JestAssertionResult {
    full_name: String,
    status: String,
}

impl JestReport {
    fn failed_tests(self, path: &Utf8Path) -> Result<Vec<String>, ResultFileError> {
        // A suite that failed without any failing assertions couldn't be loaded or run.
        let broken_suites = self
            .test_results
            .iter()
            .filter(|suite| {
                suite.status == "failed"
                    && !suite
                        .assertion_results
                        .iter()
                        .any(|assertion| assertion.status == "failed")
            })
            .count();
        let count = broken_suites.max(self.num_runtime_error_test_suites);
        if count > 0 {
            return Err(ResultFileError::SuiteErrors {
                path: path.to_owned(),
                count,
            });
        }

        Ok(dedup_names(
            self.test_results
                .into_iter()
                .flat_map(|suite| suite.assertion_results)
                .filter(|assertion| assertion.status == "failed")
                .map(|assertion| assertion.full_name),
        ))
    }
}
