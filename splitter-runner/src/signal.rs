// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Forwarding of process-control signals to test processes.
//!
//! While a test process runs, signals delivered to test-splitter are re-sent to the test
//! process's group, so an interrupt from the terminal or the CI agent reaches the test framework
//! and it can shut down cleanly.
//!
//! The subscriptions stay in place until the supervised phase is over. A shutdown signal that
//! arrives while no test process is running stops the run instead of being forwarded.

use crate::errors::SignalForwarderError;
use std::fmt;
use tokio::{sync::oneshot, task::JoinHandle};
use tracing::debug;

/// The kind of signal handling to set up for test processes.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub enum SignalHandlerKind {
    /// Forward signals received by this process to the test process.
    Standard,

    /// Don't handle signals. Useful for tests.
    Noop,
}

impl SignalHandlerKind {
    /// Subscribes to the signals handled by this kind.
    ///
    /// With [`Self::Standard`], this process no longer terminates on those signals for as long as
    /// it lives, so the handler must be kept until the process is about to exit.
    pub fn build(self) -> Result<SignalHandler, SignalForwarderError> {
        match self {
            Self::Standard => Ok(SignalHandler {
                signals: Some(imp::Signals::new()?),
            }),
            Self::Noop => Ok(SignalHandler { signals: None }),
        }
    }
}

/// Subscriptions to the signals that are forwarded to test processes.
#[derive(Debug, Default)]
pub struct SignalHandler {
    signals: Option<imp::Signals>,
}

impl SignalHandler {
    async fn recv(&mut self) -> Option<ForwardedSignal> {
        match &mut self.signals {
            Some(signals) => signals.recv().await,
            None => None,
        }
    }

    /// Drives `fut` to completion, unless a shutdown signal arrives first.
    ///
    /// Other signals are ignored since there is no test process to forward them to.
    pub async fn run_until_shutdown<F: Future>(
        &mut self,
        fut: F,
    ) -> Result<F::Output, ShutdownSignal> {
        let mut fut = std::pin::pin!(fut);
        loop {
            tokio::select! {
                biased;

                output = &mut fut => return Ok(output),
                signal = self.recv() => match signal {
                    Some(signal) => match signal.shutdown() {
                        Some(shutdown) => return Err(shutdown),
                        None => debug!(?signal, "ignoring signal, no test process is running"),
                    },
                    None => return Ok(fut.await),
                },
            }
        }
    }

    /// Returns a shutdown signal that was received since the last test process exited.
    pub(crate) async fn pending_shutdown(&mut self) -> Option<ShutdownSignal> {
        // Deferring to the runtime lets it dispatch signals that were delivered while no one was
        // listening.
        tokio::task::yield_now().await;
        loop {
            let signal = tokio::select! {
                biased;

                signal = self.recv() => signal,
                () = std::future::ready(()) => None,
            };
            match signal?.shutdown() {
                Some(shutdown) => return Some(shutdown),
                None => debug!("ignoring signal, no test process is running"),
            }
        }
    }
}

/// A signal that can be forwarded to a test process.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum ForwardedSignal {
    Interrupt,
    #[cfg(unix)]
    Hangup,
    #[cfg(unix)]
    Term,
    #[cfg(unix)]
    Quit,
    #[cfg(unix)]
    User1,
    #[cfg(unix)]
    User2,
    #[cfg(unix)]
    Stop,
    #[cfg(unix)]
    Continue,
}

impl ForwardedSignal {
    fn shutdown(self) -> Option<ShutdownSignal> {
        match self {
            Self::Interrupt => Some(ShutdownSignal::Interrupt),
            #[cfg(unix)]
            Self::Hangup => Some(ShutdownSignal::Hangup),
            #[cfg(unix)]
            Self::Term => Some(ShutdownSignal::Term),
            #[cfg(unix)]
            Self::Quit => Some(ShutdownSignal::Quit),
            #[cfg(unix)]
            Self::User1 | Self::User2 | Self::Stop | Self::Continue => None,
        }
    }
}

/// A signal asking test-splitter to stop, received while no test process was running.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ShutdownSignal {
    /// SIGINT, or Ctrl-C on Windows.
    Interrupt,

    /// SIGHUP.
    #[cfg(unix)]
    Hangup,

    /// SIGTERM.
    #[cfg(unix)]
    Term,

    /// SIGQUIT.
    #[cfg(unix)]
    Quit,
}

impl ShutdownSignal {
    /// Returns the signal number.
    pub fn raw(self) -> i32 {
        match self {
            // SIGINT is 2 on every platform, including the C runtime on Windows.
            Self::Interrupt => 2,
            #[cfg(unix)]
            Self::Hangup => libc::SIGHUP,
            #[cfg(unix)]
            Self::Term => libc::SIGTERM,
            #[cfg(unix)]
            Self::Quit => libc::SIGQUIT,
        }
    }

    /// Returns the exit code a shell reports for a process killed by this signal.
    pub fn exit_code(self) -> i32 {
        128 + self.raw()
    }
}

impl fmt::Display for ShutdownSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Interrupt => "SIGINT",
            #[cfg(unix)]
            Self::Hangup => "SIGHUP",
            #[cfg(unix)]
            Self::Term => "SIGTERM",
            #[cfg(unix)]
            Self::Quit => "SIGQUIT",
        };
        f.write_str(name)
    }
}

/// A task that forwards signals to one child process until it is finished.
#[derive(Debug)]
pub(crate) struct SignalForwarder {
    done_tx: oneshot::Sender<()>,
    handle: JoinHandle<SignalHandler>,
}

impl SignalForwarder {
    /// Starts forwarding signals received by `handler` to the process group led by `pid`.
    pub(crate) fn start(mut handler: SignalHandler, pid: u32) -> Self {
        let (done_tx, mut done_rx) = oneshot::channel();

        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    // Once the child has exited, stop forwarding even if a signal is pending.
                    biased;

                    _ = &mut done_rx => break,
                    signal = handler.recv() => match signal {
                        Some(signal) => imp::forward(pid, signal),
                        None => {
                            // No more signals can arrive: wait to be told the child has exited.
                            let _ = (&mut done_rx).await;
                            break;
                        }
                    },
                }
            }
            handler
        });

        Self { done_tx, handle }
    }

    /// Tells the forwarding task that the child has exited, and waits for it to stop.
    ///
    /// The signal subscriptions are handed back so they can be reused for the next process.
    pub(crate) async fn finish(self) -> Option<SignalHandler> {
        // The task only exits after receiving this, so sending can't fail unless it panicked.
        let _ = self.done_tx.send(());
        match self.handle.await {
            Ok(handler) => Some(handler),
            Err(err) => {
                debug!("signal forwarding task failed: {err}");
                None
            }
        }
    }
}

#[cfg(unix)]
mod imp {
    use super::*;
    use nix::{
        errno::Errno,
        sys::signal::{self, Signal as NixSignal},
        unistd::Pid,
    };
    use tokio::signal::unix::{Signal, SignalKind, signal};
    use tracing::warn;

    /// Subscriptions to SIGINT, SIGHUP, SIGTERM, SIGQUIT, SIGUSR1, SIGUSR2, SIGTSTP and SIGCONT.
    #[derive(Debug)]
    pub(super) struct Signals {
        sigint: SignalWithDone,
        sighup: SignalWithDone,
        sigterm: SignalWithDone,
        sigquit: SignalWithDone,
        sigusr1: SignalWithDone,
        sigusr2: SignalWithDone,
        sigtstp: SignalWithDone,
        sigcont: SignalWithDone,
    }

    impl Signals {
        pub(super) fn new() -> std::io::Result<Self> {
            Ok(Self {
                sigint: SignalWithDone::new(SignalKind::interrupt())?,
                sighup: SignalWithDone::new(SignalKind::hangup())?,
                sigterm: SignalWithDone::new(SignalKind::terminate())?,
                sigquit: SignalWithDone::new(SignalKind::quit())?,
                sigusr1: SignalWithDone::new(SignalKind::user_defined1())?,
                sigusr2: SignalWithDone::new(SignalKind::user_defined2())?,
                sigtstp: SignalWithDone::new(SignalKind::from_raw(libc::SIGTSTP))?,
                sigcont: SignalWithDone::new(SignalKind::from_raw(libc::SIGCONT))?,
            })
        }

        pub(super) async fn recv(&mut self) -> Option<ForwardedSignal> {
            loop {
                tokio::select! {
                    recv = self.sigint.signal.recv(), if !self.sigint.done => {
                        match recv {
                            Some(()) => break Some(ForwardedSignal::Interrupt),
                            None => self.sigint.done = true,
                        }
                    }
                    recv = self.sighup.signal.recv(), if !self.sighup.done => {
                        match recv {
                            Some(()) => break Some(ForwardedSignal::Hangup),
                            None => self.sighup.done = true,
                        }
                    }
                    recv = self.sigterm.signal.recv(), if !self.sigterm.done => {
                        match recv {
                            Some(()) => break Some(ForwardedSignal::Term),
                            None => self.sigterm.done = true,
                        }
                    }
                    recv = self.sigquit.signal.recv(), if !self.sigquit.done => {
                        match recv {
                            Some(()) => break Some(ForwardedSignal::Quit),
                            None => self.sigquit.done = true,
                        }
                    }
                    recv = self.sigusr1.signal.recv(), if !self.sigusr1.done => {
                        match recv {
                            Some(()) => break Some(ForwardedSignal::User1),
                            None => self.sigusr1.done = true,
                        }
                    }
                    recv = self.sigusr2.signal.recv(), if !self.sigusr2.done => {
                        match recv {
                            Some(()) => break Some(ForwardedSignal::User2),
                            None => self.sigusr2.done = true,
                        }
                    }
                    recv = self.sigtstp.signal.recv(), if !self.sigtstp.done => {
                        match recv {
                            Some(()) => break Some(ForwardedSignal::Stop),
                            None => self.sigtstp.done = true,
                        }
                    }
                    recv = self.sigcont.signal.recv(), if !self.sigcont.done => {
                        match recv {
                            Some(()) => break Some(ForwardedSignal::Continue),
                            None => self.sigcont.done = true,
                        }
                    }
                    else => {
                        break None
                    }
                }
            }
        }
    }

    #[derive(Debug)]
    struct SignalWithDone {
        signal: Signal,
        done: bool,
    }

    impl SignalWithDone {
        fn new(kind: SignalKind) -> std::io::Result<Self> {
            let signal = signal(kind)?;
            Ok(Self {
                signal,
                done: false,
            })
        }
    }

    pub(super) fn forward(pid: u32, forwarded: ForwardedSignal) {
        let sig = match forwarded {
            ForwardedSignal::Interrupt => NixSignal::SIGINT,
            ForwardedSignal::Hangup => NixSignal::SIGHUP,
            ForwardedSignal::Term => NixSignal::SIGTERM,
            ForwardedSignal::Quit => NixSignal::SIGQUIT,
            ForwardedSignal::User1 => NixSignal::SIGUSR1,
            ForwardedSignal::User2 => NixSignal::SIGUSR2,
            ForwardedSignal::Stop => NixSignal::SIGTSTP,
            ForwardedSignal::Continue => NixSignal::SIGCONT,
        };
        let Ok(raw_pid) = i32::try_from(pid) else {
            warn!(pid, "child process ID is out of range, not forwarding {sig}");
            return;
        };
        let pid = Pid::from_raw(raw_pid);

        debug!(%pid, "forwarding {sig} to test process group");
        // The child leads its own process group, so this reaches it and anything it started.
        match signal::killpg(pid, sig) {
            Ok(()) => {}
            // The group is already gone.
            Err(Errno::ESRCH) => {}
            Err(err) => {
                debug!(%pid, "failed to signal process group ({err}), signaling process");
                if let Err(err) = signal::kill(pid, sig)
                    && err != Errno::ESRCH
                {
                    warn!(%pid, "failed to forward {sig}: {err}");
                }
            }
        }
    }
}

#[cfg(windows)]
mod imp {
    use super::*;
    use tokio::signal::windows::{CtrlC, ctrl_c};

    #[derive(Debug)]
    pub(super) struct Signals {
        ctrl_c: CtrlC,
        ctrl_c_done: bool,
    }

    impl Signals {
        pub(super) fn new() -> std::io::Result<Self> {
            let ctrl_c = ctrl_c()?;
            Ok(Self {
                ctrl_c,
                ctrl_c_done: false,
            })
        }

        pub(super) async fn recv(&mut self) -> Option<ForwardedSignal> {
            if self.ctrl_c_done {
                return None;
            }

            match self.ctrl_c.recv().await {
                Some(()) => Some(ForwardedSignal::Interrupt),
                None => {
                    self.ctrl_c_done = true;
                    None
                }
            }
        }
    }

    // Ctrl-C is delivered to every process attached to the console, including the child, so
    // receiving it is enough to keep this process from exiting early.
    pub(super) fn forward(pid: u32, signal: ForwardedSignal) {
        debug!(pid, ?signal, "child receives console control events directly");
    }
}
