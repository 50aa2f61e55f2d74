// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::output::{NO_HEADING_TARGET, StderrStyles};
use owo_colors::OwoColorize;
use splitter_metadata::SplitterExitCode;
use splitter_runner::errors::{
    ApiClientBuildError, DiscoverFilesError, ExecuteError, PlanAcquireError, RunnerConfigError,
};
use std::error::Error;
use thiserror::Error;
use tracing::error;

pub(crate) type Result<T, E = ExpectedError> = std::result::Result<T, E>;

// The #[error()] strings are short placeholders: errors are meant to be printed with
// display_to_stderr, which adds detail and colors.

/// An error that test-splitter knows how to report.
#[derive(Debug, Error)]
#[doc(hidden)]
pub enum ExpectedError {
    #[error("required option not set")]
    MissingOption {
        option: &'static str,
        env: &'static str,
    },
    #[error("build identifier not set")]
    MissingIdentifier,
    #[error("parallelism is zero")]
    ZeroParallelism,
    #[error("node index out of range")]
    NodeIndexOutOfRange { node_index: usize, parallelism: usize },
    #[error("API client build error")]
    ApiClientBuild {
        #[from]
        err: ApiClientBuildError,
    },
    #[error("runner configuration error")]
    RunnerConfig {
        #[from]
        err: RunnerConfigError,
    },
    #[error("tokio runtime create error")]
    RuntimeCreate {
        #[source]
        err: std::io::Error,
    },
    #[error("test file discovery error")]
    DiscoverFiles {
        #[from]
        err: DiscoverFilesError,
    },
    #[error("test plan error")]
    PlanAcquire {
        #[from]
        err: PlanAcquireError,
    },
    #[error("test plan has no task for this node")]
    PlanMissingNode {
        node_index: usize,
        keys: Vec<String>,
    },
    #[error("test execution error")]
    Execute {
        #[from]
        err: ExecuteError,
    },
}

impl ExpectedError {
    /// Returns the exit code for the process.
    pub fn process_exit_code(&self) -> i32 {
        match self {
            Self::MissingOption { .. }
            | Self::MissingIdentifier
            | Self::ZeroParallelism
            | Self::NodeIndexOutOfRange { .. }
            | Self::ApiClientBuild { .. }
            | Self::RunnerConfig { .. }
            | Self::RuntimeCreate { .. }
            | Self::DiscoverFiles { .. }
            | Self::PlanAcquire { .. }
            | Self::PlanMissingNode { .. }
            | Self::Execute { .. } => SplitterExitCode::INTERNAL_ERROR,
        }
    }

    /// Displays this error to stderr, followed by its chain of causes.
    pub fn display_to_stderr(&self, styles: &StderrStyles) {
        let mut next_error = match &self {
            Self::MissingOption { option, env } => {
                error!(
                    "invalid configuration: {} is required (or set {})",
                    option.style(styles.bold),
                    env.style(styles.bold),
                );
                None
            }
            Self::MissingIdentifier => {
                error!(
                    "invalid configuration: {} is required, or both {} and {} must be set",
                    "--identifier".style(styles.bold),
                    "BUILDKITE_BUILD_ID".style(styles.bold),
                    "BUILDKITE_STEP_ID".style(styles.bold),
                );
                None
            }
            Self::ZeroParallelism => {
                error!(
                    "invalid configuration: {} must be at least 1",
                    "--parallelism".style(styles.bold),
                );
                None
            }
            Self::NodeIndexOutOfRange {
                node_index,
                parallelism,
            } => {
                error!(
                    "invalid configuration: node index {} is out of range for parallelism {}",
                    node_index.style(styles.bold),
                    parallelism.style(styles.bold),
                );
                None
            }
            Self::ApiClientBuild { err } => {
                error!("invalid configuration for the plan service");
                Some(err as &dyn Error)
            }
            Self::RunnerConfig { err } => {
                error!("invalid test runner configuration");
                Some(err as &dyn Error)
            }
            Self::RuntimeCreate { err } => {
                error!("failed to create tokio runtime");
                Some(err as &dyn Error)
            }
            Self::DiscoverFiles { err } => {
                error!("couldn't find test files");
                Some(err as &dyn Error)
            }
            Self::PlanAcquire { err } => {
                error!("couldn't acquire a test plan");
                Some(err as &dyn Error)
            }
            Self::PlanMissingNode { node_index, keys } => {
                error!(
                    "test plan has no task for node {} (tasks: [{}])",
                    node_index.style(styles.bold),
                    keys.join(", "),
                );
                None
            }
            Self::Execute { err } => {
                error!("couldn't run tests");
                Some(err as &dyn Error)
            }
        };

        while let Some(err) = next_error {
            error!(target: NO_HEADING_TARGET, "\nCaused by:\n  {}", err);
            next_error = err.source();
        }
    }
}
