//! One phase of a benchmark with its reporter.

use crate::config::{BenchmarkConfig, Phase};
use crate::execute::{PhaseExecutor, PhaseReport};
use crate::reporter::{final_flush, MeasurementReporter, ReportSink};
use crate::workload::Workload;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tpc_measurement::Measurement;
use tracing::info;

/// Everything a phase needs, shared between phases of the same run.
pub struct Bench<W: Workload> {
    config: Arc<BenchmarkConfig>,
    workload: Arc<W>,
    measurement: Arc<Measurement>,
    sink: Arc<dyn ReportSink>,
    scope: CancellationToken,
}

impl<W: Workload> Bench<W> {
    pub fn new(
        config: Arc<BenchmarkConfig>,
        workload: Arc<W>,
        measurement: Arc<Measurement>,
        sink: Arc<dyn ReportSink>,
        scope: CancellationToken,
    ) -> Self {
        Self {
            config,
            workload,
            measurement,
            sink,
            scope,
        }
    }

    /// Run `phase` on every worker with periodic reports, then emit the final report.
    pub async fn execute(&self, phase: Phase) -> PhaseReport {
        info!(
            "Executing {} {} with {} workers",
            self.workload.name(),
            phase,
            self.config.threads
        );

        let reporter = MeasurementReporter::start(
            &self.scope,
            self.config.output_interval,
            self.measurement.clone(),
            self.sink.clone(),
        );

        let report = PhaseExecutor::new(
            self.config.clone(),
            self.workload.clone(),
            self.scope.clone(),
        )
        .execute(phase)
        .await;

        reporter.stop().await;

        println!("Finished");
        final_flush(&self.measurement, self.sink.as_ref());
        report
    }
}
