//! Periodic measurement output running alongside the workers.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tpc_measurement::{format_snapshot, Measurement, MeasurementSnapshot, OutputStyle, ReportKind};

/// Destination for rendered reports.
pub trait ReportSink: Send + Sync + 'static {
    fn emit(&self, kind: ReportKind, snapshot: &MeasurementSnapshot);
}

/// Writes reports to stdout in the configured style.
#[derive(Debug, Clone, Copy)]
pub struct StdoutSink {
    style: OutputStyle,
}

impl StdoutSink {
    pub fn new(style: OutputStyle) -> Self {
        Self { style }
    }
}

impl ReportSink for StdoutSink {
    fn emit(&self, kind: ReportKind, snapshot: &MeasurementSnapshot) {
        println!("{}", format_snapshot(snapshot, kind, self.style));
    }
}

/// Background task emitting a periodic report every `interval`.
///
/// The first report comes one full interval after start. The task ends when
/// [`MeasurementReporter::stop`] is called or the parent scope is cancelled.
pub struct MeasurementReporter {
    stop: CancellationToken,
    stopped: oneshot::Receiver<()>,
}

impl MeasurementReporter {
    pub fn start(
        scope: &CancellationToken,
        interval: Duration,
        measurement: Arc<Measurement>,
        sink: Arc<dyn ReportSink>,
    ) -> Self {
        let stop = scope.child_token();
        let (stopped_tx, stopped) = oneshot::channel();

        let token = stop.clone();
        tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        sink.emit(ReportKind::Periodic, &measurement.snapshot());
                    }
                }
            }
            let _ = stopped_tx.send(());
        });

        Self { stop, stopped }
    }

    /// Stop ticking and wait until the task has acknowledged.
    pub async fn stop(self) {
        self.stop.cancel();
        // An error means the task is already gone, which is just as stopped.
        let _ = self.stopped.await;
    }
}

/// Emit the single closing report.
pub fn final_flush(measurement: &Measurement, sink: &dyn ReportSink) {
    sink.emit(ReportKind::Final, &measurement.snapshot());
}
