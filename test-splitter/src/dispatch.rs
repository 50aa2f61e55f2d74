// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::{
    ExpectedError, Result,
    orchestrator::Orchestrator,
    output::{OutputContext, OutputOpts},
};
use camino::Utf8PathBuf;
use clap::{Args, Parser};
use splitter_runner::{
    adapter::{Jest, RunnerAdapter, RunnerConfig, RunnerKind, Rspec},
    api::{ApiClient, ApiClientConfig, DEFAULT_SERVER_BASE_URL, RequestTiming},
    diagnostics::Diagnostics,
    signal::SignalHandlerKind,
};
use std::{num::NonZeroUsize, time::Duration};
use tracing::debug;

/// Splits a test suite across parallel CI workers and runs this worker's share.
///
/// Every option can also be set through the environment variable shown next to it.
#[derive(Debug, Parser)]
#[command(
    version = crate::version::short(),
    long_version = crate::version::long(),
    styles = crate::output::clap_styles::style(),
    max_term_width = 100,
)]
pub struct TestSplitterApp {
    #[clap(flatten)]
    output: OutputOpts,

    #[clap(flatten)]
    service: ServiceOpts,

    #[clap(flatten)]
    build: BuildOpts,

    #[clap(flatten)]
    runner: RunnerOpts,

    /// Log plan service requests and responses, and test commands
    #[arg(
        long,
        env = "BUILDKITE_SPLITTER_DEBUG_ENABLED",
        help_heading = "Output options"
    )]
    debug: bool,
}

#[derive(Debug, Args)]
#[command(next_help_heading = "Plan service options")]
struct ServiceOpts {
    /// Base URL of the plan service
    #[arg(
        long,
        env = "BUILDKITE_SPLITTER_BASE_URL",
        default_value = DEFAULT_SERVER_BASE_URL,
        value_name = "URL"
    )]
    base_url: String,

    /// Access token for the plan service
    #[arg(
        long,
        env = "BUILDKITE_SPLITTER_API_ACCESS_TOKEN",
        hide_env_values = true,
        value_name = "TOKEN"
    )]
    access_token: Option<String>,

    /// Slug of the organization the suite belongs to
    #[arg(long, env = "BUILDKITE_ORGANIZATION_SLUG", value_name = "SLUG")]
    organization: Option<String>,

    /// Slug of the test suite
    #[arg(long, env = "BUILDKITE_SPLITTER_SUITE_SLUG", value_name = "SLUG")]
    suite: Option<String>,

    /// Planning mode requested from the plan service
    #[arg(long, env = "BUILDKITE_SPLITTER_MODE", default_value = "static")]
    mode: String,
}

#[derive(Debug, Args)]
#[command(next_help_heading = "Build options")]
struct BuildOpts {
    /// Identifier shared by every worker of this build step [default: BUILD_ID/STEP_ID]
    #[arg(long, env = "BUILDKITE_SPLITTER_IDENTIFIER")]
    identifier: Option<String>,

    /// ID of the build, used to derive the identifier
    #[arg(long, env = "BUILDKITE_BUILD_ID", value_name = "ID")]
    build_id: Option<String>,

    /// ID of the build step, used to derive the identifier
    #[arg(long, env = "BUILDKITE_STEP_ID", value_name = "ID")]
    step_id: Option<String>,

    /// Zero-based index of this worker
    #[arg(long, env = "BUILDKITE_PARALLEL_JOB", value_name = "INDEX")]
    node_index: Option<usize>,

    /// Total number of workers
    #[arg(long, env = "BUILDKITE_PARALLEL_JOB_COUNT", value_name = "COUNT")]
    parallelism: Option<usize>,
}

#[derive(Debug, Args)]
#[command(next_help_heading = "Test runner options")]
struct RunnerOpts {
    /// Test framework to run: rspec or jest
    #[arg(
        long,
        env = "BUILDKITE_SPLITTER_TEST_RUNNER",
        default_value = "rspec",
        value_name = "RUNNER"
    )]
    test_runner: RunnerKind,

    /// Command template for running tests [default: depends on the runner]
    #[arg(long, env = "BUILDKITE_SPLITTER_TEST_CMD", value_name = "TEMPLATE")]
    test_cmd: Option<String>,

    /// Command template for retrying failed tests [default: depends on the runner]
    #[arg(long, env = "BUILDKITE_SPLITTER_RETRY_CMD", value_name = "TEMPLATE")]
    retry_cmd: Option<String>,

    /// Glob matching test files [default: depends on the runner]
    #[arg(long, env = "BUILDKITE_SPLITTER_TEST_FILE_PATTERN", value_name = "GLOB")]
    test_file_pattern: Option<String>,

    /// Glob matching files and directories to skip [default: depends on the runner]
    #[arg(
        long,
        env = "BUILDKITE_SPLITTER_TEST_FILE_EXCLUDE_PATTERN",
        value_name = "GLOB"
    )]
    test_file_exclude_pattern: Option<String>,

    /// File the test framework writes its results to [default: depends on the runner]
    #[arg(long, env = "BUILDKITE_SPLITTER_RESULT_PATH", value_name = "PATH")]
    result_path: Option<Utf8PathBuf>,

    /// Number of times to retry failed tests
    #[arg(
        long,
        env = "BUILDKITE_SPLITTER_RETRY_COUNT",
        default_value_t = 0,
        value_name = "N"
    )]
    retry_count: u32,

    /// Split files that historically run slowly into individual examples
    #[arg(long, env = "BUILDKITE_SPLITTER_SPLIT_BY_EXAMPLE")]
    split_by_example: bool,

    /// How long a file must take to be split into examples
    #[arg(
        long,
        env = "BUILDKITE_SPLITTER_SLOW_FILE_THRESHOLD",
        default_value = "3m",
        value_parser = humantime::parse_duration,
        value_name = "DURATION"
    )]
    slow_file_threshold: Duration,
}

/// The environment variables included in the metadata report.
///
/// The access token is deliberately absent.
pub(crate) const REPORTED_ENV_VARS: &[&str] = &[
    "BUILDKITE_BUILD_ID",
    "BUILDKITE_STEP_ID",
    "BUILDKITE_ORGANIZATION_SLUG",
    "BUILDKITE_PARALLEL_JOB",
    "BUILDKITE_PARALLEL_JOB_COUNT",
    "BUILDKITE_SPLITTER_BASE_URL",
    "BUILDKITE_SPLITTER_SUITE_SLUG",
    "BUILDKITE_SPLITTER_IDENTIFIER",
    "BUILDKITE_SPLITTER_MODE",
    "BUILDKITE_SPLITTER_TEST_RUNNER",
    "BUILDKITE_SPLITTER_TEST_CMD",
    "BUILDKITE_SPLITTER_RETRY_CMD",
    "BUILDKITE_SPLITTER_TEST_FILE_PATTERN",
    "BUILDKITE_SPLITTER_TEST_FILE_EXCLUDE_PATTERN",
    "BUILDKITE_SPLITTER_RESULT_PATH",
    "BUILDKITE_SPLITTER_RETRY_COUNT",
    "BUILDKITE_SPLITTER_SPLIT_BY_EXAMPLE",
    "BUILDKITE_SPLITTER_SLOW_FILE_THRESHOLD",
    "BUILDKITE_SPLITTER_DEBUG_ENABLED",
];

impl TestSplitterApp {
    /// Initializes the output context.
    pub fn init_output(&self) -> OutputContext {
        self.output.init(self.debug)
    }

    /// Executes the app, returning the exit code.
    pub fn exec(self) -> Result<i32> {
        let config = SplitterConfig::new(self)?;
        debug!(?config, "resolved configuration");

        match config.runner {
            RunnerKind::Rspec => {
                let adapter = Rspec::new(config.runner_config.clone())?;
                run_with_adapter(&config, &adapter)
            }
            RunnerKind::Jest => {
                let adapter = Jest::new(config.runner_config.clone())?;
                run_with_adapter(&config, &adapter)
            }
        }
    }
}

fn run_with_adapter<A: RunnerAdapter>(config: &SplitterConfig, adapter: &A) -> Result<i32> {
    let client = ApiClient::new(config.api.clone(), config.diagnostics)?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_name("test-splitter-worker")
        .build()
        .map_err(|err| ExpectedError::RuntimeCreate { err })?;

    let orchestrator = Orchestrator::new(config, &client, adapter, SignalHandlerKind::Standard);
    runtime.block_on(orchestrator.run())
}

/// Validated configuration for a run.
#[derive(Debug)]
pub(crate) struct SplitterConfig {
    pub(crate) api: ApiClientConfig,
    pub(crate) suite_slug: String,
    pub(crate) identifier: String,
    pub(crate) mode: String,
    pub(crate) node_index: usize,
    pub(crate) parallelism: NonZeroUsize,
    pub(crate) runner: RunnerKind,
    pub(crate) runner_config: RunnerConfig,
    pub(crate) max_retries: u32,
    pub(crate) slow_file_threshold: Option<Duration>,
    pub(crate) diagnostics: Diagnostics,
}

impl SplitterConfig {
    fn new(app: TestSplitterApp) -> Result<Self> {
        let TestSplitterApp {
            output: _,
            service,
            build,
            runner,
            debug,
        } = app;

        let access_token = required(
            service.access_token,
            "--access-token",
            "BUILDKITE_SPLITTER_API_ACCESS_TOKEN",
        )?;
        let organization_slug = required(
            service.organization,
            "--organization",
            "BUILDKITE_ORGANIZATION_SLUG",
        )?;
        let suite_slug = required(service.suite, "--suite", "BUILDKITE_SPLITTER_SUITE_SLUG")?;

        let identifier = match (build.identifier, build.build_id, build.step_id) {
            (Some(identifier), _, _) if !identifier.is_empty() => identifier,
            (_, Some(build_id), Some(step_id)) if !build_id.is_empty() && !step_id.is_empty() => {
                format!("{build_id}/{step_id}")
            }
            _ => return Err(ExpectedError::MissingIdentifier),
        };

        let parallelism = required(
            build.parallelism,
            "--parallelism",
            "BUILDKITE_PARALLEL_JOB_COUNT",
        )?;
        let parallelism = NonZeroUsize::new(parallelism).ok_or(ExpectedError::ZeroParallelism)?;
        let node_index = required(build.node_index, "--node-index", "BUILDKITE_PARALLEL_JOB")?;
        if node_index >= parallelism.get() {
            return Err(ExpectedError::NodeIndexOutOfRange {
                node_index,
                parallelism: parallelism.get(),
            });
        }

        Ok(Self {
            api: ApiClientConfig {
                server_base_url: service.base_url,
                access_token,
                organization_slug,
                timing: RequestTiming::default(),
            },
            suite_slug,
            identifier,
            mode: service.mode,
            node_index,
            parallelism,
            runner: runner.test_runner,
            runner_config: RunnerConfig {
                test_command: runner.test_cmd,
                retry_test_command: runner.retry_cmd,
                test_file_pattern: runner.test_file_pattern,
                test_file_exclude_pattern: runner.test_file_exclude_pattern,
                result_path: runner.result_path,
            },
            max_retries: runner.retry_count,
            slow_file_threshold: runner
                .split_by_example
                .then_some(runner.slow_file_threshold),
            diagnostics: Diagnostics::new(debug),
        })
    }
}

fn required<T>(value: Option<T>, option: &'static str, env: &'static str) -> Result<T> {
    value.ok_or(ExpectedError::MissingOption { option, env })
}
