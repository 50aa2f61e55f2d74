// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

#![cfg(unix)]
// The guard from `serialize` is held for the whole of each test.
#![allow(clippy::await_holding_lock)]

use camino::{Utf8Path, Utf8PathBuf};
use camino_tempfile::Utf8TempDir;
use color_eyre::eyre::{Result, bail};
use nix::{
    sys::signal::{Signal, kill, raise},
    unistd::Pid,
};
use pretty_assertions::assert_eq;
use splitter_metadata::TestCase;
use splitter_runner::{
    adapter::RunnerAdapter,
    diagnostics::Diagnostics,
    errors::{DiscoverFilesError, ListExamplesError, ResultFileError},
    signal::{ShutdownSignal, SignalHandlerKind},
    supervisor::{ExecutionSupervisor, SupervisorState},
    test_command::TestCommand,
    timeline::Timeline,
};
use std::{
    sync::{
        Mutex, MutexGuard, PoisonError,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

// Every handler in this process sees every signal, so tests that send signals run one at a time.
static SIGNAL_LOCK: Mutex<()> = Mutex::new(());

/// Waits by blocking the thread, so that the runtimes of waiting tests don't consume signals.
fn serialize() -> MutexGuard<'static, ()> {
    SIGNAL_LOCK.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Records the first SIGUSR1 it receives and then exits.
const TRAP_SCRIPT: &str = "trap 'echo usr1 > \"$2\"; exit 0' USR1; \
                           touch \"$1\"; \
                           i=0; while [ $i -lt 400 ]; do sleep 0.05; i=$((i+1)); done; \
                           exit 7";

/// Runs a shell script as the test framework.
///
/// The script is passed a ready path and a marker path as `$1` and `$2`. Every nonzero exit is
/// reported as a failure of `t1`.
struct ShellAdapter {
    dir: Utf8TempDir,
    result_path: Utf8PathBuf,
    script: &'static str,
    signal_on_failure: Option<Signal>,
    retried: AtomicBool,
}

impl ShellAdapter {
    fn new(script: &'static str) -> Self {
        let dir = camino_tempfile::tempdir().expect("created temp dir");
        let result_path = dir.path().join("result.txt");
        Self {
            dir,
            result_path,
            script,
            signal_on_failure: None,
            retried: AtomicBool::new(false),
        }
    }

    /// Sends `signal` to this thread when the failed tests are read, between attempts.
    fn with_signal_on_failure(mut self, signal: Signal) -> Self {
        self.signal_on_failure = Some(signal);
        self
    }

    fn ready_path(&self) -> Utf8PathBuf {
        self.dir.path().join("ready")
    }

    fn marker_path(&self) -> Utf8PathBuf {
        self.dir.path().join("marker")
    }

    fn retried(&self) -> bool {
        self.retried.load(Ordering::SeqCst)
    }
}

impl RunnerAdapter for ShellAdapter {
    fn name(&self) -> &'static str {
        "shell"
    }

    fn result_path(&self) -> &Utf8Path {
        &self.result_path
    }

    fn get_files(&self) -> Result<Vec<String>, DiscoverFilesError> {
        Ok(Vec::new())
    }

    async fn get_examples(&self, _files: &[String]) -> Result<Vec<TestCase>, ListExamplesError> {
        Ok(Vec::new())
    }

    fn command(&self, _test_cases: &[String]) -> TestCommand {
        TestCommand::new(
            "sh",
            vec![
                "-c".to_owned(),
                self.script.to_owned(),
                "sh".to_owned(),
                self.ready_path().into_string(),
                self.marker_path().into_string(),
            ],
        )
    }

    fn retry_command(&self, _failed_names: &[String]) -> TestCommand {
        self.retried.store(true, Ordering::SeqCst);
        TestCommand::new("true", Vec::new())
    }

    fn failed_tests(&self) -> Result<Vec<String>, ResultFileError> {
        if let Some(signal) = self.signal_on_failure {
            // Directed at this thread, so the handler has run by the time this returns.
            raise(signal).expect("raised signal");
        }
        Ok(vec!["t1".to_owned()])
    }
}

async fn wait_for(path: &Utf8Path) -> Result<()> {
    for _ in 0..200 {
        if path.exists() {
            return Ok(());
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    bail!("{path} was not created in time")
}

#[tokio::test]
async fn signals_are_forwarded_to_the_test_process() -> Result<()> {
    let _guard = serialize();
    let adapter = ShellAdapter::new(TRAP_SCRIPT);
    let supervisor = ExecutionSupervisor::new(&adapter, 0, Diagnostics::disabled());
    let mut signals = SignalHandlerKind::Standard.build()?;
    let mut timeline = Timeline::new();

    let ready = adapter.ready_path();
    let send_signal = async {
        wait_for(&ready).await?;
        // Signal this process; the supervisor passes it on to the test process group.
        kill(Pid::this(), Signal::SIGUSR1)?;
        Ok::<_, color_eyre::Report>(())
    };
    let (outcome, sent) = tokio::join!(
        supervisor.run(adapter.command(&[]), &mut signals, &mut timeline),
        send_signal
    );
    sent?;
    let outcome = outcome?;

    assert_eq!(
        std::fs::read_to_string(adapter.marker_path())?.trim(),
        "usr1",
        "test process observed the forwarded signal"
    );
    // The trap exits 0, so the run succeeds rather than running out the loop and exiting 7.
    assert_eq!(outcome.state, SupervisorState::Succeeded);
    assert_eq!(timeline.events().collect::<Vec<_>>(), ["test_start", "test_end"]);
    Ok(())
}

#[tokio::test]
async fn shutdown_signal_between_attempts_stops_retries() -> Result<()> {
    let _guard = serialize();
    let adapter = ShellAdapter::new("exit 1").with_signal_on_failure(Signal::SIGTERM);
    let supervisor = ExecutionSupervisor::new(&adapter, 3, Diagnostics::disabled());
    let mut signals = SignalHandlerKind::Standard.build()?;
    let mut timeline = Timeline::new();

    let outcome = supervisor
        .run(adapter.command(&[]), &mut signals, &mut timeline)
        .await?;

    assert_eq!(
        outcome.state,
        SupervisorState::Interrupted {
            signal: ShutdownSignal::Term
        }
    );
    assert_eq!(outcome.exit_code(), 128 + libc::SIGTERM);
    assert_eq!(outcome.retries, 0);
    assert!(!adapter.retried(), "no retry was started after the signal");
    assert_eq!(timeline.events().collect::<Vec<_>>(), ["test_start", "test_end"]);
    Ok(())
}

#[tokio::test]
async fn shutdown_signal_after_the_test_process_exits_is_observed() -> Result<()> {
    let _guard = serialize();
    let adapter = ShellAdapter::new("exit 0");
    let supervisor = ExecutionSupervisor::new(&adapter, 0, Diagnostics::disabled());
    let mut signals = SignalHandlerKind::Standard.build()?;
    let mut timeline = Timeline::new();

    let outcome = supervisor
        .run(adapter.command(&[]), &mut signals, &mut timeline)
        .await?;
    assert_eq!(outcome.state, SupervisorState::Succeeded);

    // Stands in for the metadata report, which would otherwise keep the process alive.
    let slow_work = tokio::time::sleep(Duration::from_secs(30));
    let send_signal = async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        kill(Pid::this(), Signal::SIGTERM)?;
        Ok::<_, color_eyre::Report>(())
    };
    let (interrupted, sent) = tokio::join!(
        tokio::time::timeout(
            Duration::from_secs(10),
            signals.run_until_shutdown(slow_work)
        ),
        send_signal
    );
    sent?;

    assert_eq!(interrupted?, Err(ShutdownSignal::Term));
    assert_eq!(ShutdownSignal::Term.exit_code(), 143);
    Ok(())
}
