//! Graceful shutdown on termination signals.
//!
//! ```text
//! Running --signal--> CancelRequested --> Draining --done--> Completed
//!    |                       |                |
//!    |                       +--signal--------+--signal/timeout--> ForcedExit
//!    +--done--> Completed
//! ```
//!
//! The first signal cancels the shared scope. Any later signal, or the drain
//! timeout expiring, ends in [`ShutdownOutcome::ForcedExit`].

use std::fmt;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// How long workers get to finish after the first signal.
pub const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ShutdownState {
    Running,
    CancelRequested,
    Draining,
    Completed,
    ForcedExit,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ForcedExitReason {
    SecondSignal,
    DrainTimeout,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ShutdownOutcome {
    Completed,
    ForcedExit(ForcedExitReason),
}

impl ShutdownOutcome {
    /// Process exit status for this outcome.
    pub fn exit_code(self) -> i32 {
        match self {
            ShutdownOutcome::Completed => 0,
            ShutdownOutcome::ForcedExit(_) => 1,
        }
    }
}

/// A termination request from the OS.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TerminationSignal {
    Hangup,
    Interrupt,
    Terminate,
    Quit,
}

impl fmt::Display for TerminationSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TerminationSignal::Hangup => "hangup",
            TerminationSignal::Interrupt => "interrupt",
            TerminationSignal::Terminate => "terminated",
            TerminationSignal::Quit => "quit",
        })
    }
}

/// Tells the coordinator that all workers and the reporter have finished.
pub struct CompletionHandle {
    done: oneshot::Sender<()>,
}

impl CompletionHandle {
    pub fn complete(self) {
        let _ = self.done.send(());
    }
}

/// Turns termination signals into cancellation of one shared scope.
pub struct ShutdownCoordinator {
    scope: CancellationToken,
    drain_timeout: Duration,
    state: watch::Sender<ShutdownState>,
    done: oneshot::Receiver<()>,
}

impl ShutdownCoordinator {
    pub fn new(scope: CancellationToken, drain_timeout: Duration) -> (Self, CompletionHandle) {
        let (done_tx, done) = oneshot::channel();
        let (state, _) = watch::channel(ShutdownState::Running);
        (
            Self {
                scope,
                drain_timeout,
                state,
                done,
            },
            CompletionHandle { done: done_tx },
        )
    }

    /// Observe state transitions.
    pub fn subscribe(&self) -> watch::Receiver<ShutdownState> {
        self.state.subscribe()
    }

    /// Drive the state machine until completion or forced exit.
    ///
    /// Dropping the [`CompletionHandle`] counts as completion. A closed
    /// signal channel means no further signals can arrive.
    pub async fn run(self, mut signals: mpsc::Receiver<TerminationSignal>) -> ShutdownOutcome {
        let Self {
            scope,
            drain_timeout,
            state,
            mut done,
        } = self;

        let first = tokio::select! {
            _ = &mut done => {
                state.send_replace(ShutdownState::Completed);
                return ShutdownOutcome::Completed;
            }
            signal = signals.recv() => signal,
        };
        let Some(signal) = first else {
            let _ = done.await;
            state.send_replace(ShutdownState::Completed);
            return ShutdownOutcome::Completed;
        };

        println!("\nGot signal [{signal}] to exit.");
        state.send_replace(ShutdownState::CancelRequested);
        scope.cancel();

        state.send_replace(ShutdownState::Draining);
        let deadline = tokio::time::sleep(drain_timeout);
        tokio::pin!(deadline);

        // Timeout is polled first so it wins a tie with completion.
        let outcome = tokio::select! {
            biased;
            _ = &mut deadline => {
                println!("\nWait {drain_timeout:?} for closed, force exit");
                ShutdownOutcome::ForcedExit(ForcedExitReason::DrainTimeout)
            }
            Some(again) = signals.recv() => {
                println!("\nGot signal [{again}] again to exit.");
                ShutdownOutcome::ForcedExit(ForcedExitReason::SecondSignal)
            }
            _ = &mut done => ShutdownOutcome::Completed,
        };

        match outcome {
            ShutdownOutcome::Completed => {
                info!("All workers drained");
                state.send_replace(ShutdownState::Completed);
            }
            ShutdownOutcome::ForcedExit(reason) => {
                warn!("Forcing exit: {:?}", reason);
                state.send_replace(ShutdownState::ForcedExit);
            }
        }
        outcome
    }
}

/// Forward SIGHUP, SIGINT, SIGTERM and SIGQUIT into a channel.
#[cfg(unix)]
pub fn listen_for_signals() -> std::io::Result<mpsc::Receiver<TerminationSignal>> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut hangup = signal(SignalKind::hangup())?;
    let mut interrupt = signal(SignalKind::interrupt())?;
    let mut terminate = signal(SignalKind::terminate())?;
    let mut quit = signal(SignalKind::quit())?;

    let (tx, rx) = mpsc::channel(4);
    tokio::spawn(async move {
        loop {
            let received = tokio::select! {
                Some(()) = hangup.recv() => TerminationSignal::Hangup,
                Some(()) = interrupt.recv() => TerminationSignal::Interrupt,
                Some(()) = terminate.recv() => TerminationSignal::Terminate,
                Some(()) = quit.recv() => TerminationSignal::Quit,
                else => break,
            };
            if tx.send(received).await.is_err() {
                break;
            }
        }
    });
    Ok(rx)
}

/// Forward Ctrl-C into a channel.
#[cfg(not(unix))]
pub fn listen_for_signals() -> std::io::Result<mpsc::Receiver<TerminationSignal>> {
    let (tx, rx) = mpsc::channel(4);
    tokio::spawn(async move {
        while tokio::signal::ctrl_c().await.is_ok() {
            if tx.send(TerminationSignal::Interrupt).await.is_err() {
                break;
            }
        }
    });
    Ok(rx)
}
