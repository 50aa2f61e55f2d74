// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Errors produced by test-splitter.

use camino::Utf8PathBuf;
use reqwest::StatusCode;
use std::{path::PathBuf, time::Duration};
use thiserror::Error;

/// An error that occurred while constructing an [`ApiClient`](crate::api::ApiClient).
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ApiClientBuildError {
    /// The base URL of the plan service could not be parsed.
    #[error("invalid server base URL `{url}`")]
    InvalidBaseUrl {
        /// The URL that was provided.
        url: String,

        /// The underlying parse error.
        #[source]
        err: url::ParseError,
    },

    /// The HTTP client could not be created.
    #[error("failed to create HTTP client")]
    Client(#[source] reqwest::Error),
}

/// An error that occurred during a single request to the plan service.
///
/// Whether an error is retried is determined by [`ApiError::is_retryable`].
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ApiError {
    /// The server rejected the request with a 4xx status.
    #[error("request to `{url}` was invalid (server responded with {status})")]
    InvalidRequest {
        /// The request URL.
        url: String,

        /// The status code returned.
        status: StatusCode,
    },

    /// The server failed with a 5xx status.
    #[error("server error from `{url}` ({status})")]
    Server {
        /// The request URL.
        url: String,

        /// The status code returned.
        status: StatusCode,
    },

    /// The server responded with a status that is neither a success nor an error.
    #[error("unexpected response from `{url}` ({status})")]
    UnexpectedStatus {
        /// The request URL.
        url: String,

        /// The status code returned.
        status: StatusCode,
    },

    /// The request could not be sent, or the response body could not be read.
    #[error("error communicating with `{url}`")]
    Network {
        /// The request URL.
        url: String,

        /// The underlying error.
        #[source]
        err: reqwest::Error,
    },

    /// The response body could not be parsed.
    #[error("failed to parse response from `{url}`")]
    Decode {
        /// The request URL.
        url: String,

        /// The underlying parse error.
        #[source]
        err: serde_json::Error,
    },

    /// A single attempt took longer than its time budget.
    #[error("request to `{url}` timed out after {timeout:?}")]
    AttemptTimeout {
        /// The request URL.
        url: String,

        /// The time budget for the attempt.
        timeout: Duration,
    },

    /// The request body could not be serialized.
    #[error("failed to serialize request body for `{url}`")]
    Encode {
        /// The request URL.
        url: String,

        /// The underlying serialization error.
        #[source]
        err: serde_json::Error,
    },
}

impl ApiError {
    /// Returns true if the request may succeed if it is attempted again.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Server { .. }
            | Self::UnexpectedStatus { .. }
            | Self::Decode { .. }
            | Self::AttemptTimeout { .. } => true,
            // Builder errors are produced locally and will fail the same way every time.
            Self::Network { err, .. } => !err.is_builder(),
            Self::InvalidRequest { .. } | Self::Encode { .. } => false,
        }
    }

    /// Returns the status code returned by the server, if any.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Self::InvalidRequest { status, .. }
            | Self::Server { status, .. }
            | Self::UnexpectedStatus { status, .. } => Some(*status),
            Self::Network { err, .. } => err.status(),
            Self::Decode { .. } | Self::AttemptTimeout { .. } | Self::Encode { .. } => None,
        }
    }
}

/// The outcome of a request that failed after zero or more retries.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum RetryError {
    /// The request failed with an error that isn't retried.
    #[error("request failed without retrying")]
    Aborted {
        /// The error that caused the abort.
        #[source]
        err: ApiError,
    },

    /// Every attempt failed.
    #[error("retry limit exceeded after {attempts} attempts")]
    RetryLimitExceeded {
        /// The number of attempts made.
        attempts: u32,

        /// The error from the final attempt.
        #[source]
        last: ApiError,
    },

    /// The time budget for the whole phase ran out.
    #[error("deadline exceeded after {attempts} attempts")]
    DeadlineExceeded {
        /// The number of attempts made.
        attempts: u32,

        /// The error from the final attempt, if any attempt was made.
        #[source]
        last: Option<ApiError>,
    },
}

impl RetryError {
    /// Returns the number of network attempts that were made.
    pub fn attempts(&self) -> u32 {
        match self {
            Self::Aborted { .. } => 1,
            Self::RetryLimitExceeded { attempts, .. } | Self::DeadlineExceeded { attempts, .. } => {
                *attempts
            }
        }
    }

    /// Returns true if this error means the service is unusable for this build, so a locally
    /// computed plan should be used instead.
    ///
    /// Errors produced while constructing the request locally return false: those indicate a
    /// bug or a misconfiguration and should be surfaced.
    pub fn should_fall_back(&self) -> bool {
        match self {
            Self::Aborted { err } => matches!(err, ApiError::InvalidRequest { .. }),
            Self::RetryLimitExceeded { .. } | Self::DeadlineExceeded { .. } => true,
        }
    }
}

/// A fatal error that occurred while acquiring a test plan.
///
/// Conditions that are resolved by falling back to a local plan are not represented here.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum PlanAcquireError {
    /// Fetching a cached plan failed.
    #[error("failed to fetch cached test plan")]
    Fetch(#[source] RetryError),

    /// Creating a plan failed.
    #[error("failed to create test plan")]
    Create(#[source] RetryError),
}

/// An error that occurred while parsing a command template.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum CommandTemplateError {
    /// The template could not be split into words, typically because of an unterminated quote.
    #[error("failed to parse command `{template}`")]
    Parse {
        /// The template.
        template: String,

        /// The underlying error.
        #[source]
        err: shell_words::ParseError,
    },

    /// The template has no words.
    #[error("command is empty")]
    Empty,

    /// The first word of the template, the program to run, is a placeholder.
    #[error("command `{template}` must start with a program, not a placeholder")]
    PlaceholderProgram {
        /// The template.
        template: String,
    },

    /// A required placeholder is missing.
    #[error("couldn't find '{placeholder}' placeholder in retry command `{template}`")]
    MissingPlaceholder {
        /// The template.
        template: String,

        /// The placeholder that is required.
        placeholder: &'static str,
    },
}

/// An error that occurred while constructing a runner adapter.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum RunnerConfigError {
    /// The test command is invalid.
    #[error("invalid test command for {runner}")]
    TestCommand {
        /// The runner being configured.
        runner: &'static str,

        /// The underlying error.
        #[source]
        err: CommandTemplateError,
    },

    /// The retry command is invalid.
    #[error("invalid retry command for {runner}")]
    RetryCommand {
        /// The runner being configured.
        runner: &'static str,

        /// The underlying error.
        #[source]
        err: CommandTemplateError,
    },

    /// A file pattern could not be compiled.
    #[error("invalid test file pattern `{pattern}`")]
    Glob {
        /// The pattern.
        pattern: String,

        /// The underlying error.
        #[source]
        err: globset::Error,
    },
}

/// Returned when parsing the name of a test framework that isn't supported.
#[derive(Clone, Debug, Eq, PartialEq, Error)]
#[error("unsupported test runner `{name}` (expected one of: rspec, jest)")]
pub struct UnknownRunnerError {
    /// The name that was provided.
    pub name: String,
}

/// An error that occurred while discovering test files.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum DiscoverFilesError {
    /// An error occurred while walking the directory tree.
    #[error("error walking `{root}`")]
    Walk {
        /// The directory being walked.
        root: Utf8PathBuf,

        /// The underlying error.
        #[source]
        err: walkdir::Error,
    },

    /// A path was not valid UTF-8.
    #[error("path `{}` is not valid UTF-8", path.display())]
    NonUtf8Path {
        /// The path.
        path: PathBuf,
    },
}

/// An error that occurred while listing the examples inside test files.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ListExamplesError {
    /// The runner has no way to list individual examples.
    #[error("{runner} doesn't support listing individual examples")]
    Unsupported {
        /// The runner.
        runner: &'static str,
    },

    /// A temporary file for the listing could not be created.
    #[error("failed to create temporary file for example listing")]
    TempFile(#[source] std::io::Error),

    /// The listing command could not be run.
    #[error("failed to run `{command}`")]
    Exec {
        /// The command.
        command: String,

        /// The underlying error.
        #[source]
        err: std::io::Error,
    },

    /// The listing command exited unsuccessfully.
    #[error("`{command}` failed{}", exit_code.map_or(String::new(), |code| format!(" with exit code {code}")))]
    CommandFailed {
        /// The command.
        command: String,

        /// The exit code, if the process exited normally.
        exit_code: Option<i32>,
    },

    /// The listing output could not be read.
    #[error("failed to read example listing")]
    ResultFile(#[from] ResultFileError),
}

/// An error that occurred while reading a test framework's result file.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ResultFileError {
    /// The file could not be read.
    #[error("failed to read result file `{path}`")]
    Read {
        /// The path to the file.
        path: Utf8PathBuf,

        /// The underlying error.
        #[source]
        err: std::io::Error,
    },

    /// The file could not be parsed.
    #[error("failed to parse result file `{path}`")]
    Parse {
        /// The path to the file.
        path: Utf8PathBuf,

        /// The underlying error.
        #[source]
        err: serde_json::Error,
    },

    /// The framework reported errors outside of individual tests, such as a file that failed to
    /// load.
    #[error("result file `{path}` reports {count} error(s) outside of tests")]
    SuiteErrors {
        /// The path to the file.
        path: Utf8PathBuf,

        /// The number of errors reported.
        count: usize,
    },
}

/// An error that occurred while setting up signal forwarding.
#[derive(Debug, Error)]
#[error("error setting up signal handler")]
pub struct SignalForwarderError(#[from] std::io::Error);

/// The reason a test process did not produce a usable result.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum RunError {
    /// The process could not be started.
    #[error("failed to start process")]
    Spawn(#[source] std::io::Error),

    /// Waiting for the process failed.
    #[error("failed to wait for process")]
    Wait(#[source] std::io::Error),

    /// The process was terminated by a signal.
    #[error("process was terminated by signal {signal}")]
    Signaled {
        /// The signal number.
        signal: i32,
    },

    /// The process exited unsuccessfully and its result file couldn't be used.
    #[error("process exited with code {exit_code} and its results couldn't be read")]
    ResultFile {
        /// The exit code of the process.
        exit_code: i32,

        /// The underlying error.
        #[source]
        err: ResultFileError,
    },
}

/// A fatal error that occurred while supervising test execution.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ExecuteError {
    /// A test command could not be run to completion.
    #[error("error running `{command}`")]
    Run {
        /// The command, formatted for display.
        command: String,

        /// The underlying error.
        #[source]
        err: RunError,
    },

    /// Signal forwarding could not be set up.
    #[error(transparent)]
    SignalForwarder(#[from] SignalForwarderError),
}
