//! CH-benCHmark analytical schema workload.
//!
//! Prepare bootstraps the analytical tables, cleanup drops them, and run
//! issues a read query joining them. Schema statements go through worker 0
//! only; the other workers have nothing to do in those phases.

use crate::connect::{DbPool, SessionConn, SqlExecutor};
use crate::schema;
use crate::workload::{Workload, WorkerContext};
use anyhow::Context;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Instant;
use tpc_measurement::Measurement;

const SUPPLIERS_BY_NATION: &str = "SELECT N_NAME, COUNT(*) \
FROM supplier, nation, region \
WHERE S_NATIONKEY = N_NATIONKEY AND N_REGIONKEY = R_REGIONKEY \
GROUP BY N_NAME ORDER BY N_NAME";

const SUPPLIERS_BY_NATION_OP: &str = "suppliers_by_nation";

pub struct ChWorkload {
    pool: DbPool,
    measurement: Arc<Measurement>,
}

impl ChWorkload {
    pub fn new(pool: DbPool, measurement: Arc<Measurement>) -> Self {
        Self { pool, measurement }
    }
}

#[async_trait]
impl Workload for ChWorkload {
    type Thread = SessionConn;

    fn name(&self) -> &'static str {
        "ch"
    }

    async fn init_thread(&self, _ctx: &WorkerContext) -> SessionConn {
        SessionConn::new(self.pool.clone())
    }

    async fn cleanup_thread(&self, _ctx: &WorkerContext, thread: SessionConn) {
        thread.release();
    }

    async fn prepare(&self, ctx: &WorkerContext, thread: &mut SessionConn) -> anyhow::Result<()> {
        if ctx.index != 0 {
            return Ok(());
        }
        let conn = thread.get().await.context("acquire connection")?;
        schema::create_all(conn, self.pool.dialect()).await?;
        Ok(())
    }

    async fn cleanup(&self, ctx: &WorkerContext, thread: &mut SessionConn) -> anyhow::Result<()> {
        if ctx.index != 0 {
            return Ok(());
        }
        let conn = thread.get().await.context("acquire connection")?;
        schema::drop_all(conn).await?;
        Ok(())
    }

    async fn run(&self, _ctx: &WorkerContext, thread: &mut SessionConn) -> anyhow::Result<()> {
        let conn = thread.get().await.context("acquire connection")?;
        let start = Instant::now();
        let result = conn.fetch_row_count(SUPPLIERS_BY_NATION).await;
        self.measurement
            .measure(SUPPLIERS_BY_NATION_OP, start.elapsed(), result.is_err());
        if result.is_err() {
            thread.discard();
        }
        result.with_context(|| format!("query {SUPPLIERS_BY_NATION_OP}"))?;
        Ok(())
    }
}
