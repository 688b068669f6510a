//! Signal handling state machine.

use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tpc_bench::shutdown::{
    ForcedExitReason, ShutdownCoordinator, ShutdownOutcome, ShutdownState, TerminationSignal,
    DEFAULT_DRAIN_TIMEOUT,
};

#[tokio::test(start_paused = true)]
async fn test_completion_without_signal() {
    let scope = CancellationToken::new();
    let (coordinator, completion) = ShutdownCoordinator::new(scope.clone(), DEFAULT_DRAIN_TIMEOUT);
    let state = coordinator.subscribe();
    let (_signals_tx, signals) = mpsc::channel(4);

    let task = tokio::spawn(coordinator.run(signals));
    tokio::time::sleep(Duration::from_secs(30)).await;
    completion.complete();

    assert_eq!(task.await.unwrap(), ShutdownOutcome::Completed);
    assert!(!scope.is_cancelled());
    assert_eq!(*state.borrow(), ShutdownState::Completed);
}

#[tokio::test(start_paused = true)]
async fn test_signal_then_drain() {
    let scope = CancellationToken::new();
    let (coordinator, completion) = ShutdownCoordinator::new(scope.clone(), DEFAULT_DRAIN_TIMEOUT);
    let mut state = coordinator.subscribe();
    let (signals_tx, signals) = mpsc::channel(4);

    let task = tokio::spawn(coordinator.run(signals));
    signals_tx.send(TerminationSignal::Interrupt).await.unwrap();

    scope.cancelled().await;
    state
        .wait_for(|s| *s == ShutdownState::Draining)
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_secs(2)).await;
    completion.complete();

    assert_eq!(task.await.unwrap(), ShutdownOutcome::Completed);
    assert_eq!(*state.borrow(), ShutdownState::Completed);
}

#[tokio::test(start_paused = true)]
async fn test_drain_timeout_forces_exit() {
    let scope = CancellationToken::new();
    let (coordinator, _completion) = ShutdownCoordinator::new(scope.clone(), DEFAULT_DRAIN_TIMEOUT);
    let state = coordinator.subscribe();
    let (signals_tx, signals) = mpsc::channel(4);

    let task = tokio::spawn(coordinator.run(signals));
    signals_tx.send(TerminationSignal::Terminate).await.unwrap();
    scope.cancelled().await;
    let signalled_at = tokio::time::Instant::now();

    let outcome = task.await.unwrap();

    assert_eq!(
        outcome,
        ShutdownOutcome::ForcedExit(ForcedExitReason::DrainTimeout)
    );
    assert_eq!(outcome.exit_code(), 1);
    assert!(signalled_at.elapsed() >= DEFAULT_DRAIN_TIMEOUT);
    assert_eq!(*state.borrow(), ShutdownState::ForcedExit);
}

#[tokio::test(start_paused = true)]
async fn test_second_signal_forces_exit() {
    let scope = CancellationToken::new();
    let (coordinator, _completion) = ShutdownCoordinator::new(scope.clone(), DEFAULT_DRAIN_TIMEOUT);
    let (signals_tx, signals) = mpsc::channel(4);

    let task = tokio::spawn(coordinator.run(signals));
    signals_tx.send(TerminationSignal::Hangup).await.unwrap();
    scope.cancelled().await;
    tokio::time::sleep(Duration::from_secs(1)).await;
    signals_tx.send(TerminationSignal::Quit).await.unwrap();

    assert_eq!(
        task.await.unwrap(),
        ShutdownOutcome::ForcedExit(ForcedExitReason::SecondSignal)
    );
}

#[tokio::test(start_paused = true)]
async fn test_closed_signal_channel_waits_for_completion() {
    let scope = CancellationToken::new();
    let (coordinator, completion) = ShutdownCoordinator::new(scope.clone(), DEFAULT_DRAIN_TIMEOUT);
    let (signals_tx, signals) = mpsc::channel::<TerminationSignal>(4);
    drop(signals_tx);

    let task = tokio::spawn(coordinator.run(signals));
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert!(!task.is_finished());

    completion.complete();
    assert_eq!(task.await.unwrap(), ShutdownOutcome::Completed);
    assert!(!scope.is_cancelled());
}

#[tokio::test(start_paused = true)]
async fn test_dropped_completion_handle_counts_as_done() {
    let scope = CancellationToken::new();
    let (coordinator, completion) = ShutdownCoordinator::new(scope, Duration::from_secs(1));
    let (_signals_tx, signals) = mpsc::channel(4);

    drop(completion);

    assert_eq!(
        coordinator.run(signals).await,
        ShutdownOutcome::Completed
    );
    assert_eq!(ShutdownOutcome::Completed.exit_code(), 0);
}

#[test]
fn test_signal_names() {
    assert_eq!(TerminationSignal::Interrupt.to_string(), "interrupt");
    assert_eq!(TerminationSignal::Terminate.to_string(), "terminated");
    assert_eq!(TerminationSignal::Hangup.to_string(), "hangup");
    assert_eq!(TerminationSignal::Quit.to_string(), "quit");
}
