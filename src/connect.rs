//! Connection bootstrap.
//!
//! [`open`] turns a [`BenchmarkConfig`] into a ready [`DbPool`], creating the
//! target database first when the server reports that it does not exist.
//! The decision sequence lives in [`bootstrap`], which only talks to a
//! [`DatabaseServer`].

use crate::config::{BenchmarkConfig, Dialect, Endpoint, IsolationLevel};
use crate::error::{ConfigError, ConnectionError, DriverError};
use async_trait::async_trait;
use mysql_async::prelude::Queryable;
use mysql_async::{OptsBuilder, PoolConstraints, PoolOpts};
use std::time::Duration;
use tokio_postgres::config::SslMode;
use tokio_postgres::error::SqlState;
use tokio_postgres::{NoTls, SimpleQueryMessage};
use tracing::{debug, error, info};

const CREATE_DATABASE_DDL: &str = "CREATE DATABASE ";

/// MySQL server error `ER_BAD_DB_ERROR` ("Unknown database").
const MYSQL_UNKNOWN_DATABASE: u16 = 1049;

/// Upper bound on open MySQL connections when the idle budget is smaller.
const MYSQL_MAX_CONNECTIONS: usize = 100;

/// go-sql-driver DSN keys. They configure the client, not the session, so
/// they cannot be sent as `SET` statements.
const MYSQL_DRIVER_PARAMS: &[&str] = &[
    "allowAllFiles",
    "allowCleartextPasswords",
    "allowNativePasswords",
    "allowOldPasswords",
    "checkConnLiveness",
    "clientFoundRows",
    "collation",
    "columnsWithAlias",
    "interpolateParams",
    "loc",
    "maxAllowedPacket",
    "multiStatements",
    "parseTime",
    "readTimeout",
    "rejectReadOnly",
    "serverPubKey",
    "timeout",
    "tls",
    "writeTimeout",
];

impl Dialect {
    /// Data source name for `endpoint`.
    ///
    /// With `with_database == false` the name points at the server only; it
    /// is used to issue `CREATE DATABASE`.
    pub fn connection_string(
        self,
        endpoint: &Endpoint,
        conn_params: &str,
        with_database: bool,
    ) -> String {
        let Endpoint {
            host,
            port,
            user,
            password,
            database,
        } = endpoint;
        match self {
            Dialect::MySql => {
                if !with_database {
                    return format!("{user}:{password}@tcp({host}:{port})/");
                }
                // multiStatements lets a single query carry several statements.
                let mut dsn =
                    format!("{user}:{password}@tcp({host}:{port})/{database}?multiStatements=true");
                if !conn_params.is_empty() {
                    dsn.push('&');
                    dsn.push_str(conn_params);
                }
                dsn
            }
            Dialect::Postgres => {
                if !with_database {
                    return format!("postgres://{user}:{password}@{host}:{port}/?{conn_params}");
                }
                let mut dsn = format!("postgres://{user}:{password}@{host}:{port}/{database}");
                if !conn_params.is_empty() {
                    dsn.push('?');
                    dsn.push_str(conn_params);
                }
                dsn
            }
        }
    }

    /// Whether `err` means the target database is missing, as this dialect reports it.
    pub fn is_database_missing(self, err: &DriverError) -> bool {
        match (self, err) {
            (Dialect::MySql, DriverError::MySql(mysql_async::Error::Server(server))) => {
                server.code == MYSQL_UNKNOWN_DATABASE
            }
            (Dialect::Postgres, DriverError::Postgres(e)) => is_invalid_catalog(e),
            (
                Dialect::Postgres,
                DriverError::PostgresPool(deadpool_postgres::PoolError::Backend(e)),
            ) => is_invalid_catalog(e),
            _ => false,
        }
    }

    /// Reject `--conn-params` this dialect has no way to apply.
    pub fn check_conn_params(self, conn_params: &str) -> Result<(), ConfigError> {
        match self {
            Dialect::MySql => mysql_session_statements(conn_params).map(drop),
            Dialect::Postgres => apply_postgres_params(
                &mut tokio_postgres::Config::new(),
                conn_params,
                IsolationLevel::Default,
            ),
        }
    }
}

fn is_invalid_catalog(err: &tokio_postgres::Error) -> bool {
    err.code() == Some(&SqlState::INVALID_CATALOG_NAME)
}

/// Replace the password in a connection string with `***` for logging.
pub fn mask_connection_password(conn_str: &str) -> String {
    // Both forms carry `user:password@` before the host.
    if let Some(at_pos) = conn_str.find('@') {
        if let Some(colon_pos) = conn_str[..at_pos].rfind(':') {
            let protocol_end = conn_str.find("://").map(|p| p + 3).unwrap_or(0);
            if colon_pos > protocol_end {
                return format!("{}:***{}", &conn_str[..colon_pos], &conn_str[at_pos..]);
            }
        }
    }
    conn_str.to_string()
}

/// Split `key=value&key2=value2` into trimmed pairs.
fn conn_param_pairs(conn_params: &str) -> Result<Vec<(&str, &str)>, ConfigError> {
    conn_params
        .split('&')
        .map(str::trim)
        .filter(|pair| !pair.is_empty())
        .map(|pair| {
            pair.split_once('=')
                .map(|(key, value)| (key.trim(), value.trim()))
                .filter(|(key, _)| !key.is_empty())
                .ok_or_else(|| {
                    ConfigError::Invalid(format!("connection parameter {pair:?} is not key=value"))
                })
        })
        .collect()
}

/// Statements run on every new MySQL connection for `conn_params`.
///
/// `charset` becomes `SET NAMES`; every other pair is a session variable.
fn mysql_session_statements(conn_params: &str) -> Result<Vec<String>, ConfigError> {
    let mut statements = Vec::new();
    for (key, value) in conn_param_pairs(conn_params)? {
        if key == "charset" {
            // The driver accepts a fallback list; the first entry wins.
            let charset = value.split(',').next().unwrap_or(value).trim();
            statements.push(format!("SET NAMES {charset}"));
        } else if MYSQL_DRIVER_PARAMS.contains(&key) {
            return Err(ConfigError::Invalid(format!(
                "MySQL driver parameter {key:?} is not supported in --conn-params"
            )));
        } else {
            statements.push(format!("SET {key}={value}"));
        }
    }
    Ok(statements)
}

/// Apply `conn_params` and the isolation level to a PostgreSQL config.
///
/// Keys tokio-postgres understands go to their setters; anything else is a
/// server runtime parameter passed as `-c key=value` in the startup options.
fn apply_postgres_params(
    pg_config: &mut tokio_postgres::Config,
    conn_params: &str,
    isolation: IsolationLevel,
) -> Result<(), ConfigError> {
    let mut options = Vec::new();
    for (key, value) in conn_param_pairs(conn_params)? {
        match key {
            "sslmode" => {
                pg_config.ssl_mode(parse_ssl_mode(value)?);
            }
            "application_name" => {
                pg_config.application_name(value);
            }
            "connect_timeout" => {
                let secs: u64 = value.parse().map_err(|_| {
                    ConfigError::Invalid(format!("connect_timeout {value:?} is not a number of seconds"))
                })?;
                pg_config.connect_timeout(Duration::from_secs(secs));
            }
            "options" => options.push(value.to_string()),
            _ => options.push(format!("-c {key}={}", escape_option_value(value))),
        }
    }
    if let Some(level) = isolation.sql_name(Dialect::Postgres)? {
        options.push(format!(
            "-c default_transaction_isolation={}",
            escape_option_value(&level.to_lowercase())
        ));
    }
    if !options.is_empty() {
        pg_config.options(&options.join(" "));
    }
    Ok(())
}

fn parse_ssl_mode(value: &str) -> Result<SslMode, ConfigError> {
    match value {
        "disable" => Ok(SslMode::Disable),
        "prefer" => Ok(SslMode::Prefer),
        "require" => Ok(SslMode::Require),
        other => Err(ConfigError::Invalid(format!(
            "unsupported sslmode {other:?} (expected disable, prefer or require)"
        ))),
    }
}

/// Backslash-escape a value for the PostgreSQL `options` startup parameter.
fn escape_option_value(value: &str) -> String {
    value.replace('\\', "\\\\").replace(' ', "\\ ")
}

/// Shared connection pool for one dialect. Cheap to clone.
#[derive(Clone, Debug)]
pub enum DbPool {
    MySql(mysql_async::Pool),
    Postgres(deadpool_postgres::Pool),
}

/// A connection checked out of a [`DbPool`]. Returned to the pool on drop.
pub enum DbConn {
    MySql(mysql_async::Conn),
    Postgres(deadpool_postgres::Object),
}

/// Minimal statement execution used by schema bootstrap and workloads.
#[async_trait]
pub trait SqlExecutor: Send {
    /// Execute statements and discard any result rows.
    async fn execute(&mut self, sql: &str) -> Result<(), DriverError>;

    /// Execute a query and return how many rows it produced.
    async fn fetch_row_count(&mut self, sql: &str) -> Result<usize, DriverError>;
}

#[async_trait]
impl SqlExecutor for DbConn {
    async fn execute(&mut self, sql: &str) -> Result<(), DriverError> {
        match self {
            DbConn::MySql(conn) => conn.query_drop(sql).await?,
            DbConn::Postgres(client) => client.batch_execute(sql).await?,
        }
        Ok(())
    }

    async fn fetch_row_count(&mut self, sql: &str) -> Result<usize, DriverError> {
        match self {
            DbConn::MySql(conn) => {
                let rows: Vec<mysql_async::Row> = conn.query(sql).await?;
                Ok(rows.len())
            }
            DbConn::Postgres(client) => {
                let messages = client.simple_query(sql).await?;
                Ok(messages
                    .iter()
                    .filter(|m| matches!(m, SimpleQueryMessage::Row(_)))
                    .count())
            }
        }
    }
}

impl DbPool {
    pub fn dialect(&self) -> Dialect {
        match self {
            DbPool::MySql(_) => Dialect::MySql,
            DbPool::Postgres(_) => Dialect::Postgres,
        }
    }

    /// Check a connection out of the pool.
    pub async fn get_conn(&self) -> Result<DbConn, DriverError> {
        match self {
            DbPool::MySql(pool) => Ok(DbConn::MySql(pool.get_conn().await?)),
            DbPool::Postgres(pool) => Ok(DbConn::Postgres(pool.get().await?)),
        }
    }

    async fn ping(&self) -> Result<(), DriverError> {
        match self.get_conn().await? {
            DbConn::MySql(mut conn) => conn.ping().await?,
            DbConn::Postgres(client) => {
                client.simple_query("SELECT 1").await?;
            }
        }
        Ok(())
    }

    /// Close every pooled connection.
    pub async fn close(self) {
        match self {
            DbPool::MySql(pool) => {
                if let Err(e) = pool.disconnect().await {
                    debug!("Error while disconnecting MySQL pool: {}", e);
                }
            }
            DbPool::Postgres(pool) => pool.close(),
        }
    }
}

/// The server operations [`bootstrap`] needs.
#[async_trait]
pub trait DatabaseServer: Send + Sync {
    type Pool: Send + Sync;

    fn dialect(&self) -> Dialect;

    /// Connection string with the password masked, for errors and logs.
    fn target(&self) -> &str;

    fn database(&self) -> &str;

    /// Build a pool for the target database. Does not connect yet.
    fn build_pool(&self) -> Result<Self::Pool, DriverError>;

    async fn ping(&self, pool: &Self::Pool) -> Result<(), DriverError>;

    async fn close(&self, pool: Self::Pool);

    /// Connect without selecting a database and create the target one.
    async fn create_database(&self) -> Result<(), DriverError>;
}

/// Build and ping a pool. If the server reports the database as missing,
/// create it and try once more; any other failure is returned as is.
pub async fn bootstrap<S: DatabaseServer>(server: &S) -> Result<S::Pool, ConnectionError> {
    let unreachable = |source| ConnectionError::Unreachable {
        dsn: server.target().to_string(),
        source,
    };

    let pool = server.build_pool().map_err(unreachable)?;
    let ping = server.ping(&pool).await;
    let err = match ping {
        Ok(()) => return Ok(pool),
        Err(err) => err,
    };
    server.close(pool).await;
    if !server.dialect().is_database_missing(&err) {
        return Err(unreachable(err));
    }

    info!("Database {} does not exist, creating it", server.database());
    server
        .create_database()
        .await
        .map_err(|source| ConnectionError::CreateDatabase {
            database: server.database().to_string(),
            source,
        })?;

    let pool = server.build_pool().map_err(unreachable)?;
    let ping = server.ping(&pool).await;
    if let Err(err) = ping {
        server.close(pool).await;
        return Err(unreachable(err));
    }
    Ok(pool)
}

/// Open the pool for `config`, creating the database if it does not exist.
pub async fn open(config: &BenchmarkConfig) -> Result<DbPool, ConnectionError> {
    let server = LiveServer::new(config)?;
    info!("Connecting to {} ({})", server.target(), server.dialect());
    bootstrap(&server).await
}

/// A real MySQL or PostgreSQL server, with driver settings resolved up front.
pub struct LiveServer {
    target: String,
    database: String,
    settings: ServerSettings,
}

enum ServerSettings {
    MySql {
        with_database: OptsBuilder,
        server_only: OptsBuilder,
    },
    Postgres {
        with_database: tokio_postgres::Config,
        server_only: tokio_postgres::Config,
        max_size: usize,
    },
}

impl LiveServer {
    pub fn new(config: &BenchmarkConfig) -> Result<Self, ConfigError> {
        let dsn = config
            .dialect
            .connection_string(&config.endpoint, &config.conn_params, true);
        let settings = match config.dialect {
            Dialect::MySql => ServerSettings::MySql {
                with_database: mysql_opts(config, true)?,
                server_only: mysql_opts(config, false)?,
            },
            Dialect::Postgres => ServerSettings::Postgres {
                with_database: postgres_config(config, true)?,
                server_only: postgres_config(config, false)?,
                max_size: config.idle_connection_budget(),
            },
        };
        Ok(Self {
            target: mask_connection_password(&dsn),
            database: config.endpoint.database.clone(),
            settings,
        })
    }
}

#[async_trait]
impl DatabaseServer for LiveServer {
    type Pool = DbPool;

    fn dialect(&self) -> Dialect {
        match self.settings {
            ServerSettings::MySql { .. } => Dialect::MySql,
            ServerSettings::Postgres { .. } => Dialect::Postgres,
        }
    }

    fn target(&self) -> &str {
        &self.target
    }

    fn database(&self) -> &str {
        &self.database
    }

    fn build_pool(&self) -> Result<DbPool, DriverError> {
        match &self.settings {
            ServerSettings::MySql { with_database, .. } => {
                Ok(DbPool::MySql(mysql_async::Pool::new(with_database.clone())))
            }
            ServerSettings::Postgres {
                with_database,
                max_size,
                ..
            } => {
                let manager = deadpool_postgres::Manager::new(with_database.clone(), NoTls);
                let pool = deadpool_postgres::Pool::builder(manager)
                    .max_size(*max_size)
                    .build()?;
                Ok(DbPool::Postgres(pool))
            }
        }
    }

    async fn ping(&self, pool: &DbPool) -> Result<(), DriverError> {
        pool.ping().await
    }

    async fn close(&self, pool: DbPool) {
        pool.close().await;
    }

    async fn create_database(&self) -> Result<(), DriverError> {
        let ddl = format!("{CREATE_DATABASE_DDL}{}", self.database);
        match &self.settings {
            ServerSettings::MySql { server_only, .. } => {
                let mut conn = mysql_async::Conn::new(server_only.clone()).await?;
                conn.query_drop(ddl.as_str()).await?;
                if let Err(e) = conn.disconnect().await {
                    debug!("Error while closing bootstrap connection: {}", e);
                }
            }
            ServerSettings::Postgres { server_only, .. } => {
                let (client, connection) = server_only.connect(NoTls).await?;
                tokio::spawn(async move {
                    if let Err(e) = connection.await {
                        error!("PostgreSQL connection error: {}", e);
                    }
                });
                client.batch_execute(&ddl).await?;
            }
        }
        Ok(())
    }
}

fn mysql_opts(config: &BenchmarkConfig, with_database: bool) -> Result<OptsBuilder, ConfigError> {
    let endpoint = &config.endpoint;
    let mut init = Vec::new();
    if let Some(level) = config.isolation.sql_name(Dialect::MySql)? {
        init.push(format!("SET SESSION TRANSACTION ISOLATION LEVEL {level}"));
    }
    init.extend(mysql_session_statements(&config.conn_params)?);

    let idle = config.idle_connection_budget();
    let constraints = PoolConstraints::new(idle, idle.max(MYSQL_MAX_CONNECTIONS))
        .unwrap_or_default();

    Ok(OptsBuilder::default()
        .ip_or_hostname(endpoint.host.clone())
        .tcp_port(endpoint.port)
        .user(Some(endpoint.user.clone()))
        .pass(Some(endpoint.password.clone()))
        .db_name(with_database.then(|| endpoint.database.clone()))
        .init(init)
        .pool_opts(PoolOpts::default().with_constraints(constraints)))
}

/// Without a database the server falls back to one named after the user.
fn postgres_config(
    config: &BenchmarkConfig,
    with_database: bool,
) -> Result<tokio_postgres::Config, ConfigError> {
    let endpoint = &config.endpoint;
    let mut pg_config = tokio_postgres::Config::new();
    pg_config
        .host(&endpoint.host)
        .port(endpoint.port)
        .user(&endpoint.user)
        .password(&endpoint.password);
    if with_database {
        pg_config.dbname(&endpoint.database);
    }
    apply_postgres_params(&mut pg_config, &config.conn_params, config.isolation)?;
    Ok(pg_config)
}

/// A worker's lazily acquired connection.
///
/// The first [`SessionConn::get`] checks a connection out of the pool; it is
/// returned when the session is dropped or [`SessionConn::release`]d.
pub struct SessionConn {
    pool: DbPool,
    conn: Option<DbConn>,
}

impl SessionConn {
    pub fn new(pool: DbPool) -> Self {
        Self { pool, conn: None }
    }

    pub async fn get(&mut self) -> Result<&mut DbConn, DriverError> {
        let conn = match self.conn.take() {
            Some(conn) => conn,
            None => self.pool.get_conn().await?,
        };
        Ok(self.conn.insert(conn))
    }

    /// Drop the held connection, for example after it failed mid-query.
    pub fn discard(&mut self) {
        self.conn = None;
    }

    pub fn release(self) {
        drop(self.conn);
    }
}
