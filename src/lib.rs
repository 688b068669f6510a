//! tpc-bench library
//!
//! Drives a benchmark workload against a MySQL or PostgreSQL compatible
//! database with many concurrent workers.
//!
//! # Components
//!
//! - [`connect`] opens the shared connection pool, creating the database when needed
//! - [`schema`] idempotently creates the benchmark tables
//! - [`execute`] fans a phase (prepare, run, cleanup) out to the workers
//! - [`reporter`] prints periodic measurement reports while a phase runs
//! - [`shutdown`] turns termination signals into cooperative cancellation
//!
//! # CLI Usage
//!
//! ```bash
//! # Create the analytical tables, then query them with 8 workers for 5 minutes
//! tpc-bench -H 127.0.0.1 -P 4000 -D ch ch prepare
//! tpc-bench -H 127.0.0.1 -P 4000 -D ch -T 8 --time 5m ch run
//!
//! # Run hand-written queries against PostgreSQL, 1000 iterations in total
//! tpc-bench -d postgres -P 5432 -U postgres --count 1000 \
//!   rawsql run --query-files q1.sql,q2.sql
//! ```

pub mod bench;
pub mod config;
pub mod connect;
pub mod error;
pub mod execute;
pub mod reporter;
pub mod schema;
pub mod shutdown;
pub mod workload;
pub mod workloads;

pub use bench::Bench;
pub use config::{BenchmarkConfig, Dialect, Endpoint, ErrorPolicy, IsolationLevel, Phase};
pub use error::{ConfigError, ConnectionError, DriverError, SchemaError, WorkerError};
pub use execute::{PhaseExecutor, PhaseReport};
pub use workload::{IterationBudget, Workload, WorkerContext};
