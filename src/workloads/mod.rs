//! Concrete benchmarks driven by the phase executor.

pub mod ch;
pub mod rawsql;

pub use ch::ChWorkload;
pub use rawsql::{load_queries, RawQuery, RawSqlWorkload};
