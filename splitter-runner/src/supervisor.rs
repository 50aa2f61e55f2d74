// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Runs a worker's tests and retries failures.
//!
//! Exactly one test process runs at a time. Each process is started in its own process group,
//! and signals received while it runs are forwarded to it. A shutdown signal received between
//! processes stops the run before another process is started.

use crate::{
    adapter::{ProcessExit, RunResult, RunnerAdapter},
    diagnostics::Diagnostics,
    errors::{ExecuteError, RunError},
    signal::{ShutdownSignal, SignalForwarder, SignalHandler},
    test_command::TestCommand,
    timeline::Timeline,
};
use splitter_metadata::SplitterExitCode;
use std::io;
use tracing::{debug, info, warn};

/// The states an [`ExecutionSupervisor`] moves through.
///
/// ```text
/// NotStarted -> Running -> Succeeded
///                       -> FailedNoRetry
///                       -> Retrying { 1 } -> ... -> Retrying { n } -> Succeeded
///                                                                  -> ExhaustedRetries
/// ```
///
/// A shutdown signal received after a failed attempt moves `Running` or `Retrying` to
/// `Interrupted` instead of starting the next attempt.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SupervisorState {
    /// No process has been started.
    NotStarted,

    /// The primary test command is running.
    Running,

    /// Retry attempt `attempt` (counting from 1) is running.
    Retrying {
        /// The current attempt.
        attempt: u32,
    },

    /// The tests passed, possibly after retries.
    Succeeded,

    /// The tests failed and weren't retried.
    FailedNoRetry {
        /// The exit code of the test framework.
        exit_code: i32,
    },

    /// The tests failed, and still failed after every retry.
    ExhaustedRetries {
        /// The exit code of the final attempt.
        exit_code: i32,
    },

    /// A shutdown signal arrived while no test process was running.
    Interrupted {
        /// The signal that was received.
        signal: ShutdownSignal,
    },
}

impl SupervisorState {
    /// Returns true if this is a final state.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Succeeded
                | Self::FailedNoRetry { .. }
                | Self::ExhaustedRetries { .. }
                | Self::Interrupted { .. }
        )
    }

    /// Returns the exit code for a final state.
    pub fn exit_code(self) -> Option<i32> {
        match self {
            Self::Succeeded => Some(SplitterExitCode::OK),
            Self::FailedNoRetry { exit_code } | Self::ExhaustedRetries { exit_code } => {
                Some(exit_code)
            }
            Self::Interrupted { signal } => Some(signal.exit_code()),
            Self::NotStarted | Self::Running | Self::Retrying { .. } => None,
        }
    }

    fn can_transition_to(self, next: Self) -> bool {
        match (self, next) {
            (Self::NotStarted, Self::Running) => true,
            (Self::Running, Self::Succeeded | Self::FailedNoRetry { .. }) => true,
            (Self::Running, Self::Retrying { attempt }) => attempt == 1,
            (Self::Retrying { attempt }, Self::Retrying { attempt: next }) => next == attempt + 1,
            (Self::Retrying { .. }, Self::Succeeded | Self::ExhaustedRetries { .. }) => true,
            (Self::Running | Self::Retrying { .. }, Self::Interrupted { .. }) => true,
            _ => false,
        }
    }
}

/// The result of a supervised run.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct SupervisorOutcome {
    /// The final state.
    pub state: SupervisorState,

    /// The number of retry attempts that were made.
    pub retries: u32,
}

impl SupervisorOutcome {
    /// Returns the exit code test-splitter should exit with.
    pub fn exit_code(&self) -> i32 {
        self.state
            .exit_code()
            .unwrap_or(SplitterExitCode::INTERNAL_ERROR)
    }
}

/// Runs tests through a [`RunnerAdapter`], retrying failures.
#[derive(Debug)]
pub struct ExecutionSupervisor<'a, A> {
    adapter: &'a A,
    max_retries: u32,
    diagnostics: Diagnostics,
}

impl<'a, A: RunnerAdapter> ExecutionSupervisor<'a, A> {
    /// Creates a new supervisor that retries failed tests up to `max_retries` times.
    pub fn new(adapter: &'a A, max_retries: u32, diagnostics: Diagnostics) -> Self {
        Self {
            adapter,
            max_retries,
            diagnostics,
        }
    }

    /// Runs `command`, then retries failures until they pass or retries run out.
    ///
    /// `command` is normally built with [`RunnerAdapter::command`]. A test framework exiting
    /// unsuccessfully is reported through the returned outcome. An error is only returned if a
    /// test process couldn't be run to completion, including if it was terminated by a signal.
    ///
    /// Signals received by `signals` while a test process runs are forwarded to it. The caller
    /// keeps `signals` afterwards, so that signals arriving later are still observed.
    pub async fn run(
        &self,
        command: TestCommand,
        signals: &mut SignalHandler,
        timeline: &mut Timeline,
    ) -> Result<SupervisorOutcome, ExecuteError> {
        let mut run = SupervisorRun {
            state: SupervisorState::NotStarted,
            retries: 0,
        };

        run.transition(SupervisorState::Running);
        timeline.record("test_start");
        let exit = self.run_process(signals, &command).await;
        timeline.record("test_end");

        let exit_code = match exit? {
            ProcessExit::Exited(0) => return Ok(run.finish(SupervisorState::Succeeded)),
            ProcessExit::Signaled(signal) => {
                return Err(signaled(&command, signal));
            }
            ProcessExit::Exited(exit_code) if self.max_retries == 0 => {
                return Ok(run.finish(SupervisorState::FailedNoRetry { exit_code }));
            }
            ProcessExit::Exited(exit_code) => exit_code,
        };

        let mut failing = match self.adapter.classify(ProcessExit::Exited(exit_code)) {
            RunResult::Failed { failed_tests, .. } if !failed_tests.is_empty() => failed_tests,
            // A nonzero exit is never classified as passing.
            RunResult::Failed { .. } | RunResult::Passed => {
                warn!(
                    exit_code,
                    "{} exited unsuccessfully but reported no failed tests, not retrying",
                    self.adapter.name(),
                );
                return Ok(run.finish(SupervisorState::FailedNoRetry { exit_code }));
            }
            RunResult::Error(err) => {
                warn!(exit_code, "not retrying: {}", DisplayErrorChain(&err));
                return Ok(run.finish(SupervisorState::FailedNoRetry { exit_code }));
            }
        };

        let mut attempt = 1;
        loop {
            if let Some(signal) = signals.pending_shutdown().await {
                warn!("received {signal}, not retrying failed tests");
                return Ok(run.finish(SupervisorState::Interrupted { signal }));
            }

            run.transition(SupervisorState::Retrying { attempt });
            run.retries = attempt;
            info!(
                "retrying {} failed test(s) (attempt {attempt} of {})",
                failing.len(),
                self.max_retries,
            );
            if self.diagnostics.is_debug() {
                debug!(?failing, "failed tests");
            }

            let command = self.adapter.retry_command(&failing);
            timeline.record(format!("retry_{attempt}_start"));
            let exit = self.run_process(signals, &command).await;
            timeline.record(format!("retry_{attempt}_end"));

            let exit_code = match exit? {
                ProcessExit::Exited(0) => return Ok(run.finish(SupervisorState::Succeeded)),
                ProcessExit::Signaled(signal) => return Err(signaled(&command, signal)),
                ProcessExit::Exited(exit_code) => exit_code,
            };

            if attempt >= self.max_retries {
                return Ok(run.finish(SupervisorState::ExhaustedRetries { exit_code }));
            }

            match self.adapter.classify(ProcessExit::Exited(exit_code)) {
                RunResult::Failed { failed_tests, .. } if !failed_tests.is_empty() => {
                    failing = failed_tests;
                }
                RunResult::Error(err) => {
                    debug!(
                        "reusing previous failed tests: {}",
                        DisplayErrorChain(&err)
                    );
                }
                RunResult::Failed { .. } | RunResult::Passed => {
                    debug!("reusing previous failed tests: none were reported");
                }
            }
            attempt += 1;
        }
    }

    async fn run_process(
        &self,
        signals: &mut SignalHandler,
        command: &TestCommand,
    ) -> Result<ProcessExit, ExecuteError> {
        self.remove_stale_result();

        if self.diagnostics.is_debug() {
            info!("running `{command}`");
        } else {
            debug!("running `{command}`");
        }

        let mut child = command
            .to_command()
            .spawn()
            .map_err(|err| run_error(command, RunError::Spawn(err)))?;

        let forwarder = child
            .id()
            .map(|pid| SignalForwarder::start(std::mem::take(signals), pid));

        let status = child.wait().await;
        if let Some(forwarder) = forwarder {
            *signals = forwarder.finish().await.unwrap_or_default();
        }

        let status = status.map_err(|err| run_error(command, RunError::Wait(err)))?;
        let exit = ProcessExit::from_status(status);
        debug!(?exit, "test process exited");
        Ok(exit)
    }

    fn remove_stale_result(&self) {
        let path = self.adapter.result_path();
        match std::fs::remove_file(path) {
            Ok(()) => debug!(%path, "removed result file from a previous run"),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => warn!(%path, "failed to remove previous result file: {err}"),
        }
    }
}

struct SupervisorRun {
    state: SupervisorState,
    retries: u32,
}

impl SupervisorRun {
    fn transition(&mut self, next: SupervisorState) {
        debug_assert!(
            self.state.can_transition_to(next),
            "invalid transition from {:?} to {next:?}",
            self.state,
        );
        debug!(from = ?self.state, to = ?next, "supervisor state");
        self.state = next;
    }

    fn finish(mut self, state: SupervisorState) -> SupervisorOutcome {
        debug_assert!(state.is_terminal(), "{state:?} is not a final state");
        self.transition(state);
        SupervisorOutcome {
            state: self.state,
            retries: self.retries,
        }
    }
}

fn run_error(command: &TestCommand, err: RunError) -> ExecuteError {
    ExecuteError::Run {
        command: command.to_string(),
        err,
    }
}

fn signaled(command: &TestCommand, signal: i32) -> ExecuteError {
    run_error(command, RunError::Signaled { signal })
}

/// Displays an error followed by its sources, separated by `: `.
struct DisplayErrorChain<'a>(&'a dyn std::error::Error);

impl std::fmt::Display for DisplayErrorChain<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)?;
        let mut source = self.0.source();
        while let Some(err) = source {
            write!(f, ": {err}")?;
            source = err.source();
        }
        Ok(())
    }
}
