//! Phase executor: budgets, error policy, cancellation and thread cleanup.

use crate::common::{config, CountingWorkload, Script};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tpc_bench::{BenchmarkConfig, ErrorPolicy, Phase, PhaseExecutor};

async fn execute(
    config: BenchmarkConfig,
    workload: &Arc<CountingWorkload>,
    phase: Phase,
) -> tpc_bench::PhaseReport {
    PhaseExecutor::new(Arc::new(config), workload.clone(), CancellationToken::new())
        .execute(phase)
        .await
}

#[tokio::test]
async fn test_even_budget_split() {
    let workload = Arc::new(CountingWorkload::new(4, Script::default()));

    let report = execute(config(4, 100), &workload, Phase::Run).await;

    assert!(report.is_success());
    for index in 0..4 {
        assert_eq!(workload.runs_of(index), 25);
    }
    assert_eq!(workload.total_runs(), 100);
}

#[tokio::test]
async fn test_remainder_is_dropped() {
    let workload = Arc::new(CountingWorkload::new(3, Script::default()));

    let report = execute(config(3, 100), &workload, Phase::Run).await;

    assert!(report.is_success());
    for index in 0..3 {
        assert_eq!(workload.runs_of(index), 33);
    }
    assert_eq!(workload.total_runs(), 99);
}

#[tokio::test]
async fn test_fewer_iterations_than_workers_runs_nothing() {
    let workload = Arc::new(CountingWorkload::new(4, Script::default()));

    let report = execute(config(4, 3), &workload, Phase::Run).await;

    assert!(report.is_success());
    assert_eq!(workload.total_runs(), 0);
    assert_eq!(workload.cleanup_thread_counts(), vec![1, 1, 1, 1]);
}

#[tokio::test(start_paused = true)]
async fn test_cancellation_stops_unbounded_run() {
    let workload = Arc::new(CountingWorkload::new(
        3,
        Script {
            run_delay: Some(Duration::from_millis(10)),
            ..Default::default()
        },
    ));
    let scope = CancellationToken::new();
    let executor = PhaseExecutor::new(Arc::new(config(3, 0)), workload.clone(), scope.clone());

    let canceller = {
        let scope = scope.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(105)).await;
            scope.cancel();
        })
    };

    let report = executor.execute(Phase::Run).await;
    canceller.await.unwrap();

    assert!(report.is_success());
    assert_eq!(workload.runs_after_cancel.load(std::sync::atomic::Ordering::SeqCst), 0);
    // Each worker finishes the iteration in flight and starts no other.
    for index in 0..3 {
        assert_eq!(workload.runs_of(index), 11);
    }
    assert_eq!(workload.cleanup_thread_counts(), vec![1, 1, 1]);
}

#[tokio::test(start_paused = true)]
async fn test_time_limit_ends_run_without_cancelling_shared_scope() {
    let workload = Arc::new(CountingWorkload::new(
        2,
        Script {
            run_delay: Some(Duration::from_millis(10)),
            ..Default::default()
        },
    ));
    let scope = CancellationToken::new();
    let config = BenchmarkConfig {
        total_time: Some(Duration::from_millis(95)),
        ..config(2, 0)
    };

    let report = PhaseExecutor::new(Arc::new(config), workload.clone(), scope.clone())
        .execute(Phase::Run)
        .await;

    assert!(report.is_success());
    assert!(!scope.is_cancelled());
    assert_eq!(workload.runs_of(0), 10);
    assert_eq!(workload.runs_of(1), 10);
}

#[tokio::test]
async fn test_run_error_aborts_only_that_worker() {
    let workload = Arc::new(CountingWorkload::new(
        3,
        Script {
            fail_run: Some((1, 3)),
            ..Default::default()
        },
    ));

    let report = execute(config(3, 30), &workload, Phase::Run).await;

    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].index, 1);
    assert_eq!(report.failures[0].phase, Phase::Run);
    assert!(report.failures[0].to_string().contains("run 3 failed"));
    assert_eq!(workload.runs_of(0), 10);
    assert_eq!(workload.runs_of(1), 3);
    assert_eq!(workload.runs_of(2), 10);
    assert_eq!(workload.cleanup_thread_counts(), vec![1, 1, 1]);
}

#[tokio::test]
async fn test_ignore_error_continues() {
    let workload = Arc::new(CountingWorkload::new(
        2,
        Script {
            fail_every_run: true,
            ..Default::default()
        },
    ));
    let config = BenchmarkConfig {
        error_policy: ErrorPolicy {
            ignore_error: true,
            silence: false,
        },
        ..config(2, 20)
    };

    let report = execute(config, &workload, Phase::Run).await;

    assert!(report.is_success());
    assert_eq!(workload.total_runs(), 20);
}

#[tokio::test]
async fn test_silence_keeps_abort_decision() {
    let workload = Arc::new(CountingWorkload::new(
        1,
        Script {
            fail_every_run: true,
            ..Default::default()
        },
    ));
    let config = BenchmarkConfig {
        error_policy: ErrorPolicy {
            ignore_error: false,
            silence: true,
        },
        ..config(1, 10)
    };

    let report = execute(config, &workload, Phase::Run).await;

    assert_eq!(report.failures.len(), 1);
    assert_eq!(workload.total_runs(), 1);
}

#[tokio::test]
async fn test_silence_with_ignore_error_continues() {
    let workload = Arc::new(CountingWorkload::new(
        1,
        Script {
            fail_every_run: true,
            ..Default::default()
        },
    ));
    let config = BenchmarkConfig {
        error_policy: ErrorPolicy {
            ignore_error: true,
            silence: true,
        },
        ..config(1, 10)
    };

    let report = execute(config, &workload, Phase::Run).await;

    assert!(report.is_success());
    assert_eq!(workload.total_runs(), 10);
}

#[tokio::test]
async fn test_prepare_without_drop_data() {
    let workload = Arc::new(CountingWorkload::new(2, Script::default()));

    let report = execute(config(2, 0), &workload, Phase::Prepare).await;

    assert!(report.is_success());
    for index in 0..2 {
        assert_eq!(
            workload.calls_of(index),
            vec!["init_thread", "prepare", "cleanup_thread"]
        );
    }
    assert_eq!(workload.total_runs(), 0);
}

#[tokio::test]
async fn test_prepare_with_drop_data_cleans_first() {
    let workload = Arc::new(CountingWorkload::new(2, Script::default()));
    let config = BenchmarkConfig {
        drop_data: true,
        ..config(2, 0)
    };

    let report = execute(config, &workload, Phase::Prepare).await;

    assert!(report.is_success());
    for index in 0..2 {
        assert_eq!(
            workload.calls_of(index),
            vec!["init_thread", "cleanup", "prepare", "cleanup_thread"]
        );
    }
}

#[tokio::test]
async fn test_drop_data_failure_skips_prepare() {
    let workload = Arc::new(CountingWorkload::new(
        2,
        Script {
            fail_cleanup: Some(0),
            ..Default::default()
        },
    ));
    let config = BenchmarkConfig {
        drop_data: true,
        ..config(2, 0)
    };

    let report = execute(config, &workload, Phase::Prepare).await;

    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].index, 0);
    assert_eq!(
        workload.calls_of(0),
        vec!["init_thread", "cleanup", "cleanup_thread"]
    );
    assert_eq!(
        workload.calls_of(1),
        vec!["init_thread", "cleanup", "prepare", "cleanup_thread"]
    );
}

#[tokio::test]
async fn test_prepare_failure_aborts_worker() {
    let workload = Arc::new(CountingWorkload::new(
        3,
        Script {
            fail_prepare: Some(2),
            ..Default::default()
        },
    ));

    let report = execute(config(3, 0), &workload, Phase::Prepare).await;

    assert_eq!(report.phase, Phase::Prepare);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].index, 2);
    assert_eq!(workload.cleanup_thread_counts(), vec![1, 1, 1]);
}

#[tokio::test]
async fn test_cleanup_phase_only_cleans() {
    let workload = Arc::new(CountingWorkload::new(1, Script::default()));

    let report = execute(config(1, 100), &workload, Phase::Cleanup).await;

    assert!(report.is_success());
    assert_eq!(
        workload.calls_of(0),
        vec!["init_thread", "cleanup", "cleanup_thread"]
    );
    assert_eq!(workload.total_runs(), 0);
}

#[tokio::test]
async fn test_panic_in_run_still_cleans_up_thread() {
    let workload = Arc::new(CountingWorkload::new(
        2,
        Script {
            panic_run: Some((0, 2)),
            ..Default::default()
        },
    ));

    let report = execute(config(2, 10), &workload, Phase::Run).await;

    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].index, 0);
    assert!(report.failures[0].to_string().contains("panicked"));
    assert_eq!(workload.runs_of(1), 5);
    assert_eq!(workload.cleanup_thread_counts(), vec![1, 1]);
}

#[tokio::test]
async fn test_every_worker_inits_once() {
    let workload = Arc::new(CountingWorkload::new(8, Script::default()));

    execute(config(8, 80), &workload, Phase::Run).await;

    for init in &workload.init_threads {
        assert_eq!(init.load(std::sync::atomic::Ordering::SeqCst), 1);
    }
    assert_eq!(workload.cleanup_thread_counts(), vec![1; 8]);
}
