//! Run configuration.
//!
//! [`BenchmarkConfig`] is built once from the command line, validated, and
//! then shared read-only (behind an `Arc`) by every component of a run.

use crate::error::ConfigError;
use clap::ValueEnum;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use tpc_measurement::OutputStyle;

/// Supported SQL backends.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum Dialect {
    /// MySQL protocol (MySQL, TiDB, MariaDB)
    #[value(name = "mysql")]
    MySql,
    /// PostgreSQL protocol
    #[value(name = "postgres")]
    Postgres,
}

impl Dialect {
    pub fn name(self) -> &'static str {
        match self {
            Dialect::MySql => "mysql",
            Dialect::Postgres => "postgres",
        }
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Dialect {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "mysql" => Ok(Dialect::MySql),
            "postgres" => Ok(Dialect::Postgres),
            other => Err(ConfigError::UnknownDialect(other.to_string())),
        }
    }
}

/// Transaction isolation level, numbered the way the `--isolation` flag takes it.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum IsolationLevel {
    #[default]
    Default,
    ReadUncommitted,
    ReadCommitted,
    WriteCommitted,
    RepeatableRead,
    Snapshot,
    Serializable,
    Linearizable,
}

impl TryFrom<u8> for IsolationLevel {
    type Error = ConfigError;

    fn try_from(level: u8) -> Result<Self, Self::Error> {
        Ok(match level {
            0 => IsolationLevel::Default,
            1 => IsolationLevel::ReadUncommitted,
            2 => IsolationLevel::ReadCommitted,
            3 => IsolationLevel::WriteCommitted,
            4 => IsolationLevel::RepeatableRead,
            5 => IsolationLevel::Snapshot,
            6 => IsolationLevel::Serializable,
            7 => IsolationLevel::Linearizable,
            other => return Err(ConfigError::InvalidIsolationLevel(other)),
        })
    }
}

impl IsolationLevel {
    pub fn name(self) -> &'static str {
        match self {
            IsolationLevel::Default => "Default",
            IsolationLevel::ReadUncommitted => "Read Uncommitted",
            IsolationLevel::ReadCommitted => "Read Committed",
            IsolationLevel::WriteCommitted => "Write Committed",
            IsolationLevel::RepeatableRead => "Repeatable Read",
            IsolationLevel::Snapshot => "Snapshot",
            IsolationLevel::Serializable => "Serializable",
            IsolationLevel::Linearizable => "Linearizable",
        }
    }

    /// SQL spelling of the level, `None` for the server default.
    ///
    /// Both supported dialects share the standard spellings; levels with no
    /// SQL equivalent are rejected.
    pub fn sql_name(self, dialect: Dialect) -> Result<Option<&'static str>, ConfigError> {
        match self {
            IsolationLevel::Default => Ok(None),
            IsolationLevel::ReadUncommitted => Ok(Some("READ UNCOMMITTED")),
            IsolationLevel::ReadCommitted => Ok(Some("READ COMMITTED")),
            IsolationLevel::RepeatableRead => Ok(Some("REPEATABLE READ")),
            IsolationLevel::Serializable => Ok(Some("SERIALIZABLE")),
            IsolationLevel::WriteCommitted
            | IsolationLevel::Snapshot
            | IsolationLevel::Linearizable => Err(ConfigError::UnsupportedIsolationLevel {
                level: self.name(),
                dialect: dialect.name(),
            }),
        }
    }
}

/// What a worker does when a run iteration fails.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ErrorPolicy {
    /// Keep running after a failed iteration instead of stopping the worker.
    pub ignore_error: bool,
    /// Do not log failed iterations. Does not change whether the worker continues.
    pub silence: bool,
}

/// One mode of interaction between a worker and its workload session.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    Prepare,
    Run,
    Cleanup,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Phase::Prepare => "prepare",
            Phase::Run => "run",
            Phase::Cleanup => "cleanup",
        })
    }
}

/// Where and as whom to connect.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub database: String,
}

impl Default for Endpoint {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 4000,
            user: "root".to_string(),
            password: String::new(),
            database: "test".to_string(),
        }
    }
}

/// Immutable snapshot of all run parameters.
#[derive(Clone, Debug)]
pub struct BenchmarkConfig {
    pub dialect: Dialect,
    pub endpoint: Endpoint,
    /// HTTP status port of the server (TiDB exposes one); informational.
    pub status_port: u16,
    pub threads: usize,
    /// Extra analytical clients in mixed workloads. Only affects pool sizing here.
    pub ac_threads: usize,
    /// Upper bound on the run phase; `None` runs until the count limit or a signal.
    pub total_time: Option<Duration>,
    /// Total run iterations across all workers; 0 means unbounded.
    pub total_count: u64,
    pub drop_data: bool,
    pub error_policy: ErrorPolicy,
    pub output_interval: Duration,
    pub isolation: IsolationLevel,
    /// Extra driver parameters, `key=value` pairs joined with `&`.
    pub conn_params: String,
    pub output_style: OutputStyle,
}

impl Default for BenchmarkConfig {
    fn default() -> Self {
        Self {
            dialect: Dialect::MySql,
            endpoint: Endpoint::default(),
            status_port: 10080,
            threads: 1,
            ac_threads: 1,
            total_time: None,
            total_count: 0,
            drop_data: false,
            error_policy: ErrorPolicy::default(),
            output_interval: Duration::from_secs(10),
            isolation: IsolationLevel::Default,
            conn_params: String::new(),
            output_style: OutputStyle::Plain,
        }
    }
}

impl BenchmarkConfig {
    /// Check cross-field constraints. Must pass before the config is shared.
    pub fn validate(self) -> Result<Self, ConfigError> {
        if self.threads == 0 {
            return Err(ConfigError::Invalid(
                "thread count must be at least 1".to_string(),
            ));
        }
        if self.output_interval.is_zero() {
            return Err(ConfigError::Invalid(
                "output interval must be greater than zero".to_string(),
            ));
        }
        if self.endpoint.database.is_empty() {
            return Err(ConfigError::Invalid(
                "database name must not be empty".to_string(),
            ));
        }
        self.isolation.sql_name(self.dialect)?;
        self.dialect.check_conn_params(&self.conn_params)?;
        Ok(self)
    }

    /// Idle connections the pool keeps: every worker, every auxiliary worker,
    /// and one for bootstrap work.
    pub fn idle_connection_budget(&self) -> usize {
        self.threads + self.ac_threads + 1
    }
}

/// Parse a duration like "500ms", "300", "300s", "30m" or "1h".
/// A bare number is seconds.
pub fn parse_duration(s: &str) -> Result<Duration, ConfigError> {
    let s = s.trim();
    let invalid = |reason: &str| ConfigError::InvalidDuration {
        value: s.to_string(),
        reason: reason.to_string(),
    };
    if s.is_empty() {
        return Err(invalid("empty duration string"));
    }

    let (num_str, unit_ms) = if let Some(n) = s.strip_suffix("ms") {
        (n, 1)
    } else if let Some(n) = s.strip_suffix('h') {
        (n, 3_600_000)
    } else if let Some(n) = s.strip_suffix('m') {
        (n, 60_000)
    } else if let Some(n) = s.strip_suffix('s') {
        (n, 1_000)
    } else {
        (s, 1_000)
    };

    let value: u64 = num_str
        .trim()
        .parse()
        .map_err(|_| invalid("expected a whole number with an optional ms, s, m or h suffix"))?;
    value
        .checked_mul(unit_ms)
        .map(Duration::from_millis)
        .ok_or_else(|| invalid("duration is too large"))
}
