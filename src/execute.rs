//! Worker pool that drives a workload through one phase.

use crate::config::{BenchmarkConfig, Phase};
use crate::error::WorkerError;
use crate::workload::{IterationBudget, Workload, WorkerContext};
use futures::FutureExt;
use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Outcome of one phase across all workers.
#[derive(Debug)]
pub struct PhaseReport {
    pub phase: Phase,
    pub workers: usize,
    /// Workers that stopped with an error, in completion order.
    pub failures: Vec<WorkerError>,
}

impl PhaseReport {
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Spawns `config.threads` workers for a phase and waits for all of them.
///
/// A failing worker never cancels its siblings; only the shared scope does.
pub struct PhaseExecutor<W: Workload> {
    config: Arc<BenchmarkConfig>,
    workload: Arc<W>,
    scope: CancellationToken,
}

impl<W: Workload> PhaseExecutor<W> {
    pub fn new(config: Arc<BenchmarkConfig>, workload: Arc<W>, scope: CancellationToken) -> Self {
        Self {
            config,
            workload,
            scope,
        }
    }

    pub async fn execute(&self, phase: Phase) -> PhaseReport {
        let threads = self.config.threads;
        let budget = IterationBudget::per_worker(self.config.total_count, threads);

        // Child of the shared scope so the time limit ends only this phase.
        let phase_scope = self.scope.child_token();
        let _phase_guard = phase_scope.clone().drop_guard();
        if phase == Phase::Run {
            if let Some(limit) = self.config.total_time {
                let scope = phase_scope.clone();
                tokio::spawn(async move {
                    tokio::select! {
                        _ = tokio::time::sleep(limit) => {
                            info!("Time limit of {:?} reached, stopping workers", limit);
                            scope.cancel();
                        }
                        _ = scope.cancelled() => {}
                    }
                });
            }
        }

        debug!(
            "Starting {} workers for {} ({:?} iterations each)",
            threads, phase, budget
        );

        let mut workers = JoinSet::new();
        let mut indexes = HashMap::with_capacity(threads);
        for index in 0..threads {
            let ctx = WorkerContext::new(index, budget, phase_scope.child_token());
            let workload = self.workload.clone();
            let config = self.config.clone();
            let handle = workers.spawn(async move {
                execute_worker(workload.as_ref(), &config, phase, ctx).await
            });
            indexes.insert(handle.id(), index);
        }

        let silence = self.config.error_policy.silence;
        let mut failures = Vec::new();
        while let Some(joined) = workers.join_next().await {
            let failure = match joined {
                Ok(Ok(())) => continue,
                Ok(Err(e)) => e,
                Err(join_err) => {
                    let index = indexes.get(&join_err.id()).copied().unwrap_or_default();
                    WorkerError::new(
                        index,
                        phase,
                        anyhow::anyhow!("worker task failed: {join_err}"),
                    )
                }
            };
            if !silence {
                error!("execute {} failed, err {}", phase, failure);
            }
            failures.push(failure);
        }

        PhaseReport {
            phase,
            workers: threads,
            failures,
        }
    }
}

async fn execute_worker<W: Workload>(
    workload: &W,
    config: &BenchmarkConfig,
    phase: Phase,
    ctx: WorkerContext,
) -> Result<(), WorkerError> {
    let mut thread = workload.init_thread(&ctx).await;

    let outcome = AssertUnwindSafe(drive_phase(workload, config, phase, &ctx, &mut thread))
        .catch_unwind()
        .await;

    workload.cleanup_thread(&ctx, thread).await;

    match outcome {
        Ok(result) => result.map_err(|e| WorkerError::new(ctx.index, phase, e)),
        Err(panic) => Err(WorkerError::new(
            ctx.index,
            phase,
            anyhow::anyhow!("panicked: {}", panic_message(panic.as_ref())),
        )),
    }
}

async fn drive_phase<W: Workload>(
    workload: &W,
    config: &BenchmarkConfig,
    phase: Phase,
    ctx: &WorkerContext,
    thread: &mut W::Thread,
) -> anyhow::Result<()> {
    match phase {
        Phase::Prepare => {
            if config.drop_data {
                workload.cleanup(ctx, thread).await?;
            }
            workload.prepare(ctx, thread).await
        }
        Phase::Cleanup => workload.cleanup(ctx, thread).await,
        Phase::Run => run_iterations(workload, config, ctx, thread).await,
    }
}

/// Call `run` until the budget is spent or the scope is cancelled.
/// Cancellation is only observed between iterations.
async fn run_iterations<W: Workload>(
    workload: &W,
    config: &BenchmarkConfig,
    ctx: &WorkerContext,
    thread: &mut W::Thread,
) -> anyhow::Result<()> {
    let policy = config.error_policy;
    let mut done = 0u64;
    while ctx.budget.allows(done) && !ctx.is_cancelled() {
        if let Err(e) = workload.run(ctx, thread).await {
            if !policy.ignore_error {
                return Err(e);
            }
            if !policy.silence {
                warn!("execute run failed, err {:#}", e);
            }
        }
        done += 1;
    }
    debug!("Worker {} finished after {} iterations", ctx.index, done);
    Ok(())
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
