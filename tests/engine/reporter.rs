//! Periodic and final reports around a phase.

use crate::common::{config, CountingWorkload, Script};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tpc_bench::reporter::{MeasurementReporter, ReportSink};
use tpc_bench::{Bench, BenchmarkConfig, Phase};
use tpc_measurement::{Measurement, MeasurementSnapshot, ReportKind};

#[derive(Default)]
struct RecordingSink {
    periodic: Mutex<usize>,
    finals: Mutex<Vec<MeasurementSnapshot>>,
}

impl RecordingSink {
    fn periodic(&self) -> usize {
        *self.periodic.lock().unwrap()
    }

    fn finals(&self) -> Vec<MeasurementSnapshot> {
        self.finals.lock().unwrap().clone()
    }
}

impl ReportSink for RecordingSink {
    fn emit(&self, kind: ReportKind, snapshot: &MeasurementSnapshot) {
        match kind {
            ReportKind::Periodic => *self.periodic.lock().unwrap() += 1,
            ReportKind::Final => self.finals.lock().unwrap().push(snapshot.clone()),
        }
    }
}

fn slow_workload(workers: usize) -> Arc<CountingWorkload> {
    Arc::new(CountingWorkload::new(
        workers,
        Script {
            run_delay: Some(Duration::from_millis(10)),
            ..Default::default()
        },
    ))
}

#[tokio::test(start_paused = true)]
async fn test_periodic_reports_then_one_final() {
    let workload = slow_workload(1);
    let sink = Arc::new(RecordingSink::default());
    let config = BenchmarkConfig {
        output_interval: Duration::from_millis(100),
        ..config(1, 35)
    };

    let bench = Bench::new(
        Arc::new(config),
        workload.clone(),
        workload.measurement.clone(),
        sink.clone(),
        CancellationToken::new(),
    );
    let report = bench.execute(Phase::Run).await;

    assert!(report.is_success());
    // 350ms of work at a 100ms interval: ticks at 100, 200 and 300.
    assert_eq!(sink.periodic(), 3);

    let finals = sink.finals();
    assert_eq!(finals.len(), 1);
    assert_eq!(finals[0].total_count(), 35);
    assert_eq!(finals[0].total_errors(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_short_phase_only_reports_final() {
    let workload = slow_workload(2);
    let sink = Arc::new(RecordingSink::default());
    let config = BenchmarkConfig {
        output_interval: Duration::from_secs(10),
        ..config(2, 10)
    };

    Bench::new(
        Arc::new(config),
        workload.clone(),
        workload.measurement.clone(),
        sink.clone(),
        CancellationToken::new(),
    )
    .execute(Phase::Run)
    .await;

    assert_eq!(sink.periodic(), 0);
    assert_eq!(sink.finals().len(), 1);
    assert_eq!(sink.finals()[0].total_count(), 10);
}

#[tokio::test(start_paused = true)]
async fn test_final_report_after_cancelled_run() {
    let workload = slow_workload(2);
    let sink = Arc::new(RecordingSink::default());
    let scope = CancellationToken::new();
    let config = BenchmarkConfig {
        output_interval: Duration::from_millis(100),
        ..config(2, 0)
    };

    let canceller = {
        let scope = scope.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(255)).await;
            scope.cancel();
        })
    };

    let report = Bench::new(
        Arc::new(config),
        workload.clone(),
        workload.measurement.clone(),
        sink.clone(),
        scope,
    )
    .execute(Phase::Run)
    .await;
    canceller.await.unwrap();

    assert!(report.is_success());
    assert_eq!(sink.periodic(), 2);
    let finals = sink.finals();
    assert_eq!(finals.len(), 1);
    assert_eq!(finals[0].total_count(), workload.total_runs());
}

#[tokio::test(start_paused = true)]
async fn test_failures_are_counted_in_final_report() {
    let workload = Arc::new(CountingWorkload::new(
        1,
        Script {
            fail_every_run: true,
            ..Default::default()
        },
    ));
    let sink = Arc::new(RecordingSink::default());
    let config = BenchmarkConfig {
        error_policy: tpc_bench::ErrorPolicy {
            ignore_error: true,
            silence: true,
        },
        ..config(1, 4)
    };

    Bench::new(
        Arc::new(config),
        workload.clone(),
        workload.measurement.clone(),
        sink.clone(),
        CancellationToken::new(),
    )
    .execute(Phase::Run)
    .await;

    let finals = sink.finals();
    assert_eq!(finals[0].total_count(), 4);
    assert_eq!(finals[0].total_errors(), 4);
}

#[tokio::test(start_paused = true)]
async fn test_stop_waits_for_reporter_task() {
    let sink = Arc::new(RecordingSink::default());
    let reporter = MeasurementReporter::start(
        &CancellationToken::new(),
        Duration::from_millis(50),
        Arc::new(Measurement::new()),
        sink.clone(),
    );

    tokio::time::sleep(Duration::from_millis(120)).await;
    reporter.stop().await;
    let seen = sink.periodic();
    assert_eq!(seen, 2);

    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(sink.periodic(), seen);
}

#[tokio::test(start_paused = true)]
async fn test_scope_cancellation_ends_reporter() {
    let scope = CancellationToken::new();
    let sink = Arc::new(RecordingSink::default());
    let reporter = MeasurementReporter::start(
        &scope,
        Duration::from_millis(50),
        Arc::new(Measurement::new()),
        sink.clone(),
    );

    scope.cancel();
    tokio::time::timeout(Duration::from_secs(1), reporter.stop())
        .await
        .expect("reporter stops once its scope is cancelled");
    assert_eq!(sink.periodic(), 0);
}
