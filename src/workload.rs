//! The capability a benchmark exposes to the phase executor.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

/// How many `run` iterations one worker performs.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IterationBudget {
    Bounded(u64),
    Unbounded,
}

impl IterationBudget {
    /// Split `total_count` evenly across `workers`.
    ///
    /// A `total_count` of zero means no limit. The remainder of the division
    /// is dropped, not handed to any worker.
    pub fn per_worker(total_count: u64, workers: usize) -> Self {
        if total_count == 0 {
            return IterationBudget::Unbounded;
        }
        IterationBudget::Bounded(total_count / workers.max(1) as u64)
    }

    /// Whether iteration number `done` (zero-based) may start.
    pub fn allows(self, done: u64) -> bool {
        match self {
            IterationBudget::Bounded(limit) => done < limit,
            IterationBudget::Unbounded => true,
        }
    }
}

/// Per-worker state handed to every workload call.
#[derive(Clone, Debug)]
pub struct WorkerContext {
    pub index: usize,
    pub budget: IterationBudget,
    scope: CancellationToken,
}

impl WorkerContext {
    pub fn new(index: usize, budget: IterationBudget, scope: CancellationToken) -> Self {
        Self {
            index,
            budget,
            scope,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.scope.is_cancelled()
    }
}

/// A benchmark driven by the phase executor.
///
/// One value is shared by all workers. Each worker gets its own
/// [`Workload::Thread`] from [`Workload::init_thread`] and hands it back to
/// [`Workload::cleanup_thread`] exactly once, whatever the phase outcome.
#[async_trait]
pub trait Workload: Send + Sync + 'static {
    /// Session state owned by one worker.
    type Thread: Send + 'static;

    fn name(&self) -> &'static str;

    async fn init_thread(&self, ctx: &WorkerContext) -> Self::Thread;

    async fn cleanup_thread(&self, ctx: &WorkerContext, thread: Self::Thread);

    async fn prepare(&self, ctx: &WorkerContext, thread: &mut Self::Thread) -> anyhow::Result<()>;

    async fn cleanup(&self, ctx: &WorkerContext, thread: &mut Self::Thread) -> anyhow::Result<()>;

    async fn run(&self, ctx: &WorkerContext, thread: &mut Self::Thread) -> anyhow::Result<()>;
}
