// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use super::{RunnerAdapter, RunnerConfig, RunnerDefaults, RunnerSettings, dedup_names};
use crate::{
    errors::{DiscoverFilesError, ListExamplesError, ResultFileError, RunnerConfigError},
    test_command::{OUTPUT_FILE_PLACEHOLDER, TestCommand},
};
use camino::Utf8Path;
use serde::Deserialize;
use splitter_metadata::TestCase;
use std::process::Stdio;
use tracing::debug;

/// Adapter for [RSpec](https://rspec.info).
#[derive(Clone, Debug)]
pub struct Rspec {
    settings: RunnerSettings,
}

impl Rspec {
    /// The name of this framework in configuration.
    pub const NAME: &'static str = "rspec";

    /// The defaults used for fields that aren't configured.
    pub const DEFAULTS: RunnerDefaults = RunnerDefaults {
        test_command: "bundle exec rspec --format progress --format json --out {{outputFile}} {{testExamples}}",
        retry_test_command: "bundle exec rspec --format progress --format json --out {{outputFile}} --example-matches '{{testNamePattern}}'",
        test_file_pattern: "spec/**/*_spec.rb",
        test_file_exclude_pattern: None,
        result_path: "rspec-result.json",
    };

    /// Creates a new adapter, validating the command templates and file patterns.
    pub fn new(config: RunnerConfig) -> Result<Self, RunnerConfigError> {
        let settings = RunnerSettings::new(Self::NAME, config, &Self::DEFAULTS)?;
        Ok(Self { settings })
    }

    /// Builds the dry-run command that lists the examples in `files` as JSON at `output`.
    fn list_command(&self, files: &[String], output: &Utf8Path) -> TestCommand {
        let template = self.settings.test_command();
        let mut command = template.render(files, output.as_str());
        if !template.contains(OUTPUT_FILE_PLACEHOLDER) {
            command.push_args(["--format", "json", "--out", output.as_str()]);
        }
        command.push_args(["--dry-run"]);
        command
    }
}

impl RunnerAdapter for Rspec {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn result_path(&self) -> &Utf8Path {
        self.settings.result_path()
    }

    fn get_files(&self) -> Result<Vec<String>, DiscoverFilesError> {
        self.settings.discover_files(Utf8Path::new("."))
    }

    async fn get_examples(&self, files: &[String]) -> Result<Vec<TestCase>, ListExamplesError> {
        if files.is_empty() {
            return Ok(Vec::new());
        }

        let output = camino_tempfile::Builder::new()
            .prefix("rspec-examples-")
            .suffix(".json")
            .tempfile()
            .map_err(ListExamplesError::TempFile)?;
        let command = self.list_command(files, output.path());
        debug!(%command, "listing examples");

        let mut cmd = command.to_command();
        cmd.stdout(Stdio::null());
        let status = cmd.status().await.map_err(|err| ListExamplesError::Exec {
            command: command.to_string(),
            err,
        })?;
        if !status.success() {
            return Err(ListExamplesError::CommandFailed {
                command: command.to_string(),
                exit_code: status.code(),
            });
        }

        let report: RspecReport = super::read_result_file(output.path())?;
        Ok(report
            .examples
            .into_iter()
            .map(|example| TestCase::example(example.id, example.full_description))
            .collect())
    }

    fn command(&self, test_cases: &[String]) -> TestCommand {
        self.settings.command(test_cases)
    }

    fn retry_command(&self, failed_names: &[String]) -> TestCommand {
        self.settings.retry_command(failed_names)
    }

    fn failed_tests(&self) -> Result<Vec<String>, ResultFileError> {
        let path = self.settings.result_path();
        let report: RspecReport = super::read_result_file(path)?;

        let errors = report
            .summary
            .map_or(0, |summary| summary.errors_outside_of_examples_count);
        if errors > 0 {
            return Err(ResultFileError::SuiteErrors {
                path: path.to_owned(),
                count: errors,
            });
        }

        Ok(dedup_names(
            report
                .examples
                .into_iter()
                .filter(|example| example.status == "failed")
                .map(|example| example.full_description),
        ))
    }
}

/// The subset of RSpec's JSON formatter output that's used here.
#[derive(Debug, Deserialize)]
struct RspecReport {
    #[serde(default)]
    examples: Vec<RspecExample>,
    #[serde(default)]
    summary: Option<RspecSummary>,
}

#[derive(Debug, Deserialize)]
struct RspecExample {
    #[serde(default)]
    id: String,
    full_description: String,
    #[serde(default)]
    status: String,
}

#[derive(Debug, Deserialize)]
struct RspecSummary {
    #[serde(default)]
    errors_outside_of_examples_count: usize,
}
