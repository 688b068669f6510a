//! Run arbitrary SQL from files.
//!
//! Each run iteration executes one query; a worker walks the query list
//! round-robin starting at its own index so workers spread over the queries.

use crate::connect::{DbPool, SessionConn, SqlExecutor};
use crate::workload::{Workload, WorkerContext};
use anyhow::Context;
use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tpc_measurement::Measurement;

/// A named SQL text; the name is what measurements are recorded under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawQuery {
    pub name: String,
    pub sql: String,
}

/// Load one query per file, named after the file stem.
pub fn load_queries<P: AsRef<Path>>(paths: &[P]) -> anyhow::Result<Vec<RawQuery>> {
    let mut queries = Vec::with_capacity(paths.len());
    for path in paths {
        let path = path.as_ref();
        let sql = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read query file {path:?}"))?;
        let sql = sql.trim().to_string();
        if sql.is_empty() {
            anyhow::bail!("Query file {path:?} is empty");
        }
        let name = path
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        queries.push(RawQuery { name, sql });
    }
    if queries.is_empty() {
        anyhow::bail!("No query files given");
    }
    Ok(queries)
}

pub struct RawSqlWorkload {
    pool: DbPool,
    queries: Vec<RawQuery>,
    measurement: Arc<Measurement>,
}

impl RawSqlWorkload {
    /// Fails when `queries` is empty.
    pub fn new(
        pool: DbPool,
        queries: Vec<RawQuery>,
        measurement: Arc<Measurement>,
    ) -> anyhow::Result<Self> {
        if queries.is_empty() {
            anyhow::bail!("rawsql needs at least one query");
        }
        Ok(Self {
            pool,
            queries,
            measurement,
        })
    }
}

pub struct RawSqlThread {
    conn: SessionConn,
    next: usize,
}

#[async_trait]
impl Workload for RawSqlWorkload {
    type Thread = RawSqlThread;

    fn name(&self) -> &'static str {
        "rawsql"
    }

    async fn init_thread(&self, ctx: &WorkerContext) -> RawSqlThread {
        RawSqlThread {
            conn: SessionConn::new(self.pool.clone()),
            next: ctx.index,
        }
    }

    async fn cleanup_thread(&self, _ctx: &WorkerContext, thread: RawSqlThread) {
        thread.conn.release();
    }

    async fn prepare(&self, _ctx: &WorkerContext, _thread: &mut RawSqlThread) -> anyhow::Result<()> {
        Ok(())
    }

    async fn cleanup(&self, _ctx: &WorkerContext, _thread: &mut RawSqlThread) -> anyhow::Result<()> {
        Ok(())
    }

    async fn run(&self, _ctx: &WorkerContext, thread: &mut RawSqlThread) -> anyhow::Result<()> {
        let query = &self.queries[thread.next % self.queries.len()];
        thread.next = thread.next.wrapping_add(1);

        let conn = thread.conn.get().await.context("acquire connection")?;
        let start = Instant::now();
        let result = conn.fetch_row_count(&query.sql).await;
        self.measurement
            .measure(&query.name, start.elapsed(), result.is_err());
        if result.is_err() {
            thread.conn.discard();
        }
        result.with_context(|| format!("query {}", query.name))?;
        Ok(())
    }
}
