//! Error types for the benchmark harness.

use crate::config::Phase;
use thiserror::Error;

/// Invalid run parameters, detected before any connection attempt.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("unknown driver: {0:?} (expected mysql or postgres)")]
    UnknownDialect(String),

    #[error("invalid isolation level {0} (expected 0-7)")]
    InvalidIsolationLevel(u8),

    #[error("isolation level {level} is not supported by {dialect}")]
    UnsupportedIsolationLevel {
        level: &'static str,
        dialect: &'static str,
    },

    #[error("invalid duration {value:?}: {reason}")]
    InvalidDuration { value: String, reason: String },

    #[error("{0}")]
    Invalid(String),
}

/// Errors raised by the underlying database drivers.
#[derive(Error, Debug)]
pub enum DriverError {
    #[error(transparent)]
    MySql(#[from] mysql_async::Error),

    #[error(transparent)]
    Postgres(#[from] tokio_postgres::Error),

    #[error(transparent)]
    PostgresPool(#[from] deadpool_postgres::PoolError),

    #[error(transparent)]
    PostgresBuild(#[from] deadpool_postgres::BuildError),
}

/// Failure to bring up the connection pool.
#[derive(Error, Debug)]
pub enum ConnectionError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("cannot reach {dsn}: {source}")]
    Unreachable {
        dsn: String,
        #[source]
        source: DriverError,
    },

    #[error("failed to create database {database}: {source}")]
    CreateDatabase {
        database: String,
        #[source]
        source: DriverError,
    },
}

/// Failure while issuing schema DDL. Tables created before the failure are kept.
#[derive(Error, Debug)]
pub enum SchemaError {
    #[error("failed to create table {table}: {source}")]
    Create {
        table: &'static str,
        #[source]
        source: DriverError,
    },

    #[error("failed to drop table {table}: {source}")]
    Drop {
        table: &'static str,
        #[source]
        source: DriverError,
    },
}

/// Failure that ended one worker's phase.
#[derive(Error, Debug)]
#[error("worker {index} failed to execute {phase}: {cause:#}")]
pub struct WorkerError {
    pub index: usize,
    pub phase: Phase,
    /// Rendered inline with its whole context chain.
    pub cause: anyhow::Error,
}

impl WorkerError {
    pub fn new(index: usize, phase: Phase, cause: anyhow::Error) -> Self {
        Self {
            index,
            phase,
            cause,
        }
    }
}
