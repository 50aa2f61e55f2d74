// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::{
    ExpectedError, Result,
    dispatch::{REPORTED_ENV_VARS, SplitterConfig},
};
use splitter_metadata::SplitterExitCode;
use splitter_runner::{
    adapter::RunnerAdapter,
    api::ApiClient,
    errors::ExecuteError,
    plan::{PlanClient, PlanRequest},
    report::{MetadataReport, env_snapshot, send_report},
    signal::SignalHandlerKind,
    supervisor::ExecutionSupervisor,
    timeline::Timeline,
};
use tracing::{debug, info, warn};

/// Runs this worker's share of the suite: discover, plan, build, supervise, report.
pub(crate) struct Orchestrator<'a, A> {
    config: &'a SplitterConfig,
    client: &'a ApiClient,
    adapter: &'a A,
    signal_kind: SignalHandlerKind,
}

impl<'a, A: RunnerAdapter> Orchestrator<'a, A> {
    pub(crate) fn new(
        config: &'a SplitterConfig,
        client: &'a ApiClient,
        adapter: &'a A,
        signal_kind: SignalHandlerKind,
    ) -> Self {
        Self {
            config,
            client,
            adapter,
            signal_kind,
        }
    }

    /// Returns the exit code for the process.
    pub(crate) async fn run(&self) -> Result<i32> {
        let config = self.config;
        let mut timeline = Timeline::new();

        let files = self.adapter.get_files()?;
        info!(
            "found {} test files for {}",
            files.len(),
            self.adapter.name()
        );

        let request = PlanRequest {
            suite_slug: &config.suite_slug,
            identifier: &config.identifier,
            mode: &config.mode,
            parallelism: config.parallelism,
            files: &files,
            slow_file_threshold: config.slow_file_threshold,
        };
        let acquired = PlanClient::new(self.client)
            .fetch_or_create(&request, self.adapter)
            .await?;
        timeline.record("plan_acquired");
        debug!(source = %acquired.source, "acquired test plan");

        let Some(task) = acquired.plan.task_for(config.node_index) else {
            return Err(ExpectedError::PlanMissingNode {
                node_index: config.node_index,
                keys: acquired.plan.tasks.keys().cloned().collect(),
            });
        };

        if task.tests.is_empty() {
            info!("no tests assigned to node {}", config.node_index);
            self.report(&timeline).await;
            return Ok(SplitterExitCode::OK);
        }

        let command = self.adapter.command(&task.paths());
        timeline.record("command_built");
        info!(
            "running {} tests on node {} of {}",
            task.tests.len(),
            config.node_index,
            config.parallelism,
        );

        // Signals are handled from here until exit, covering retries and the report.
        let mut signals = self.signal_kind.build().map_err(ExecuteError::from)?;
        let supervisor =
            ExecutionSupervisor::new(self.adapter, config.max_retries, config.diagnostics);
        let outcome = supervisor.run(command, &mut signals, &mut timeline).await;
        if let Err(signal) = signals.run_until_shutdown(self.report(&timeline)).await {
            warn!("received {signal} while sending the metadata report, exiting");
            return Ok(signal.exit_code());
        }

        let outcome = outcome?;
        debug!(?outcome, "test run finished");
        Ok(outcome.exit_code())
    }

    async fn report(&self, timeline: &Timeline) {
        let report = MetadataReport::new(
            self.config.identifier.as_str(),
            crate::version::short(),
            env_snapshot(REPORTED_ENV_VARS.iter().copied()),
            timeline,
        );
        send_report(self.client, &self.config.suite_slug, &report).await;
    }
}
