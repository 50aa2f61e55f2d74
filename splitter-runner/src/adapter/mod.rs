// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Test framework adapters.
//!
//! Each supported framework implements [`RunnerAdapter`]. The framework is chosen once, from
//! configuration, and the rest of the run is generic over the adapter type.

mod jest;
mod rspec;

pub use jest::Jest;
pub use rspec::Rspec;

use crate::{
    errors::{
        DiscoverFilesError, ListExamplesError, ResultFileError, RunError, RunnerConfigError,
        UnknownRunnerError,
    },
    test_command::{CommandTemplate, RetryCommandTemplate, TestCommand},
};
use camino::{Utf8Path, Utf8PathBuf};
use globset::{GlobBuilder, GlobMatcher};
use serde::de::DeserializeOwned;
use splitter_metadata::TestCase;
use std::{fmt, future::Future, str::FromStr};
use walkdir::WalkDir;

/// A test framework that test-splitter knows how to drive.
pub trait RunnerAdapter {
    /// Returns the name of the framework, for messages.
    fn name(&self) -> &'static str;

    /// Returns the path the framework writes its structured results to.
    fn result_path(&self) -> &Utf8Path;

    /// Finds the test files in the current directory.
    fn get_files(&self) -> Result<Vec<String>, DiscoverFilesError>;

    /// Lists the individual examples in `files`, using the framework's own dry-run facility.
    fn get_examples(
        &self,
        files: &[String],
    ) -> impl Future<Output = Result<Vec<TestCase>, ListExamplesError>> + Send;

    /// Builds the command that runs `test_cases`.
    fn command(&self, test_cases: &[String]) -> TestCommand;

    /// Builds the command that re-runs the tests named `failed_names`.
    fn retry_command(&self, failed_names: &[String]) -> TestCommand;

    /// Reads the names of failed tests from the result file written by the last run.
    fn failed_tests(&self) -> Result<Vec<String>, ResultFileError>;

    /// Classifies how a test process ended.
    ///
    /// The result file is only consulted if the process exited unsuccessfully.
    fn classify(&self, exit: ProcessExit) -> RunResult {
        match exit {
            ProcessExit::Exited(0) => RunResult::Passed,
            ProcessExit::Signaled(signal) => RunResult::Error(RunError::Signaled { signal }),
            ProcessExit::Exited(exit_code) => match self.failed_tests() {
                Ok(failed_tests) => RunResult::Failed {
                    exit_code,
                    failed_tests,
                },
                Err(err) => RunResult::Error(RunError::ResultFile { exit_code, err }),
            },
        }
    }
}

/// The supported test frameworks.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum RunnerKind {
    /// RSpec, for Ruby.
    Rspec,

    /// Jest, for JavaScript and TypeScript.
    Jest,
}

impl RunnerKind {
    /// All supported frameworks.
    pub const ALL: &'static [Self] = &[Self::Rspec, Self::Jest];

    /// Returns the name of the framework as used in configuration.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Rspec => Rspec::NAME,
            Self::Jest => Jest::NAME,
        }
    }
}

impl fmt::Display for RunnerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunnerKind {
    type Err = UnknownRunnerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| UnknownRunnerError {
                name: s.to_owned(),
            })
    }
}

/// How a test process ended.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ProcessExit {
    /// The process exited with this code.
    Exited(i32),

    /// The process was terminated by this signal.
    Signaled(i32),
}

impl ProcessExit {
    /// Converts an exit status from the standard library.
    pub fn from_status(status: std::process::ExitStatus) -> Self {
        if let Some(code) = status.code() {
            return Self::Exited(code);
        }

        cfg_if::cfg_if! {
            if #[cfg(unix)] {
                use std::os::unix::process::ExitStatusExt;
                match status.signal() {
                    Some(signal) => Self::Signaled(signal),
                    // A stopped or continued process isn't reported by `wait`.
                    None => Self::Exited(1),
                }
            } else {
                Self::Exited(1)
            }
        }
    }
}

/// The outcome of one test process.
#[derive(Debug)]
pub enum RunResult {
    /// Every test passed.
    Passed,

    /// Some tests failed.
    Failed {
        /// The exit code of the framework.
        exit_code: i32,

        /// The names of the failed tests, as reported in the result file.
        failed_tests: Vec<String>,
    },

    /// No usable result was produced.
    Error(RunError),
}

/// Overrides for a framework's default commands, patterns and result path.
///
/// Fields left as `None` use the framework's defaults.
#[derive(Clone, Debug, Default)]
pub struct RunnerConfig {
    /// The command template used to run tests.
    pub test_command: Option<String>,

    /// The command template used to retry failed tests.
    pub retry_test_command: Option<String>,

    /// The glob matching test files.
    pub test_file_pattern: Option<String>,

    /// The glob matching files and directories to skip.
    pub test_file_exclude_pattern: Option<String>,

    /// The path the framework writes structured results to.
    pub result_path: Option<Utf8PathBuf>,
}

/// A framework's default configuration.
#[derive(Clone, Copy, Debug)]
pub struct RunnerDefaults {
    /// The default command template.
    pub test_command: &'static str,

    /// The default retry command template.
    pub retry_test_command: &'static str,

    /// The default test file glob.
    pub test_file_pattern: &'static str,

    /// The default exclusion glob, if any.
    pub test_file_exclude_pattern: Option<&'static str>,

    /// The default result file path.
    pub result_path: &'static str,
}

/// A validated [`RunnerConfig`], shared by every adapter.
#[derive(Clone, Debug)]
pub(crate) struct RunnerSettings {
    test_command: CommandTemplate,
    retry_command: RetryCommandTemplate,
    include: GlobMatcher,
    exclude: Option<GlobMatcher>,
    result_path: Utf8PathBuf,
}

impl RunnerSettings {
    pub(crate) fn new(
        runner: &'static str,
        config: RunnerConfig,
        defaults: &RunnerDefaults,
    ) -> Result<Self, RunnerConfigError> {
        let test_command = CommandTemplate::parse(
            config
                .test_command
                .as_deref()
                .unwrap_or(defaults.test_command),
        )
        .map_err(|err| RunnerConfigError::TestCommand { runner, err })?;

        let retry_command = RetryCommandTemplate::parse(
            config
                .retry_test_command
                .as_deref()
                .unwrap_or(defaults.retry_test_command),
        )
        .map_err(|err| RunnerConfigError::RetryCommand { runner, err })?;

        let include = compile_glob(
            config
                .test_file_pattern
                .as_deref()
                .unwrap_or(defaults.test_file_pattern),
        )?;
        let exclude = config
            .test_file_exclude_pattern
            .as_deref()
            .or(defaults.test_file_exclude_pattern)
            .filter(|pattern| !pattern.is_empty())
            .map(compile_glob)
            .transpose()?;

        Ok(Self {
            test_command,
            retry_command,
            include,
            exclude,
            result_path: config
                .result_path
                .unwrap_or_else(|| Utf8PathBuf::from(defaults.result_path)),
        })
    }

    pub(crate) fn test_command(&self) -> &CommandTemplate {
        &self.test_command
    }

    pub(crate) fn result_path(&self) -> &Utf8Path {
        &self.result_path
    }

    pub(crate) fn command(&self, test_cases: &[String]) -> TestCommand {
        self.test_command.render(test_cases, self.result_path.as_str())
    }

    pub(crate) fn retry_command(&self, failed_names: &[String]) -> TestCommand {
        self.retry_command
            .render(failed_names, self.result_path.as_str())
    }

    /// Returns the files under `root` that match the include pattern and aren't excluded, as
    /// paths relative to `root`, in sorted order.
    ///
    /// An excluded directory is not descended into.
    pub(crate) fn discover_files(&self, root: &Utf8Path) -> Result<Vec<String>, DiscoverFilesError> {
        let walker = WalkDir::new(root)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|entry| match (&self.exclude, entry.path().strip_prefix(root)) {
                (Some(exclude), Ok(relative)) => {
                    relative.as_os_str().is_empty() || !exclude.is_match(relative)
                }
                _ => true,
            });

        let mut files = Vec::new();
        for entry in walker {
            let entry = entry.map_err(|err| DiscoverFilesError::Walk {
                root: root.to_owned(),
                err,
            })?;
            if !entry.file_type().is_file() {
                continue;
            }

            let relative = entry.path().strip_prefix(root).unwrap_or(entry.path());
            let Some(relative) = relative.to_str() else {
                return Err(DiscoverFilesError::NonUtf8Path {
                    path: entry.path().to_owned(),
                });
            };
            if self.include.is_match(relative) {
                files.push(relative.to_owned());
            }
        }

        Ok(files)
    }
}

fn compile_glob(pattern: &str) -> Result<GlobMatcher, RunnerConfigError> {
    let glob = GlobBuilder::new(pattern)
        .literal_separator(true)
        .build()
        .map_err(|err| RunnerConfigError::Glob {
            pattern: pattern.to_owned(),
            err,
        })?;
    Ok(glob.compile_matcher())
}

/// Reads and parses a JSON result file.
pub(crate) fn read_result_file<T: DeserializeOwned>(path: &Utf8Path) -> Result<T, ResultFileError> {
    let contents = std::fs::read(path).map_err(|err| ResultFileError::Read {
        path: path.to_owned(),
        err,
    })?;
    serde_json::from_slice(&contents).map_err(|err| ResultFileError::Parse {
        path: path.to_owned(),
        err,
    })
}

/// Keeps the first occurrence of each name.
pub(crate) fn dedup_names(names: impl IntoIterator<Item = String>) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    names
        .into_iter()
        .filter(|name| seen.insert(name.clone()))
        .collect()
}
