//! Command-line interface for tpc-bench
//!
//! # Usage Examples
//!
//! ```bash
//! # Create the CH-benCHmark analytical tables (drop existing ones first)
//! tpc-bench --host 127.0.0.1 --port 4000 --db ch --dropdata ch prepare
//!
//! # Query them with 16 workers for 10 minutes, reporting every 30s as a table
//! tpc-bench -D ch -T 16 --time 10m --interval 30s --output table ch run
//!
//! # PostgreSQL, 400 iterations split across 4 workers, errors ignored
//! tpc-bench -d postgres -P 5432 -U postgres --conn-params sslmode=disable \
//!   -T 4 --count 400 --ignore-error rawsql run --query-files q1.sql,q6.sql
//! ```
//!
//! The first SIGINT/SIGTERM/SIGHUP/SIGQUIT stops the workers at their next
//! iteration boundary. A second signal, or workers still busy 10s later,
//! terminates the process with exit status 1.

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tpc_bench::config::parse_duration;
use tpc_bench::connect;
use tpc_bench::reporter::StdoutSink;
use tpc_bench::shutdown::{
    listen_for_signals, ShutdownCoordinator, ShutdownOutcome, DEFAULT_DRAIN_TIMEOUT,
};
use tpc_bench::workloads::{load_queries, ChWorkload, RawQuery, RawSqlWorkload};
use tpc_bench::{
    Bench, BenchmarkConfig, ConfigError, Dialect, Endpoint, ErrorPolicy, IsolationLevel, Phase,
    PhaseReport, Workload,
};
use tpc_measurement::{Measurement, OutputStyle};

#[derive(Parser)]
#[command(name = "tpc-bench")]
#[command(about = "Benchmark database with different workloads")]
#[command(long_about = None)]
struct Cli {
    #[command(flatten)]
    bench: BenchmarkArgs,

    #[command(subcommand)]
    command: Commands,
}

/// Options shared by every workload subcommand.
#[derive(Args, Clone, Debug)]
struct BenchmarkArgs {
    /// Database name
    #[arg(long = "db", short = 'D', default_value = "test", global = true)]
    db: String,

    /// Database host
    #[arg(long, short = 'H', default_value = "127.0.0.1", global = true)]
    host: String,

    /// Database user
    #[arg(long, short = 'U', default_value = "root", global = true)]
    user: String,

    /// Database password
    #[arg(long, short = 'p', default_value = "", env = "TPC_PASSWORD", global = true)]
    password: String,

    /// Database port
    #[arg(long, short = 'P', default_value = "4000", global = true)]
    port: u16,

    /// Database status port
    #[arg(long = "status-port", short = 'S', default_value = "10080", global = true)]
    status_port: u16,

    /// Thread concurrency
    #[arg(long, short = 'T', default_value = "1", global = true)]
    threads: usize,

    /// OLAP client concurrency, only for mixed OLTP/OLAP workloads
    #[arg(long = "ac-threads", short = 't', default_value = "1", global = true)]
    ac_threads: usize,

    /// Database driver
    #[arg(long, short = 'd', value_enum, default_value = "mysql", global = true)]
    driver: Dialect,

    /// Total execution time (e.g. 300s, 30m, 1h); unbounded when omitted
    #[arg(long, value_parser = parse_duration, global = true)]
    time: Option<Duration>,

    /// Total execution count, 0 means infinite
    #[arg(long, default_value = "0", global = true)]
    count: u64,

    /// Cleanup data before prepare
    #[arg(long, global = true)]
    dropdata: bool,

    /// Ignore error when running workload
    #[arg(long, global = true)]
    ignore_error: bool,

    /// Don't print error when running workload
    #[arg(long, global = true)]
    silence: bool,

    /// Output interval time
    #[arg(long, value_parser = parse_duration, default_value = "10s", global = true)]
    interval: Duration,

    /// Isolation Level 0: Default, 1: ReadUncommitted, 2: ReadCommitted,
    /// 3: WriteCommitted, 4: RepeatableRead, 5: Snapshot, 6: Serializable,
    /// 7: Linearizable
    #[arg(long, default_value = "0", value_parser = clap::value_parser!(u8).range(0..=7), global = true)]
    isolation: u8,

    /// Extra connection parameters, e.g. for TiDB tidb_isolation_read_engines='tiflash',
    /// for PostgreSQL sslmode=disable
    #[arg(long = "conn-params", default_value = "", global = true)]
    conn_params: String,

    /// Output style
    #[arg(long, value_enum, default_value = "plain", global = true)]
    output: OutputStyle,

    /// Runtime worker threads, 0 means one per CPU
    #[arg(long = "max-procs", default_value = "0", global = true)]
    max_procs: usize,
}

impl TryFrom<&BenchmarkArgs> for BenchmarkConfig {
    type Error = ConfigError;

    fn try_from(args: &BenchmarkArgs) -> Result<Self, Self::Error> {
        BenchmarkConfig {
            dialect: args.driver,
            endpoint: Endpoint {
                host: args.host.clone(),
                port: args.port,
                user: args.user.clone(),
                password: args.password.clone(),
                database: args.db.clone(),
            },
            status_port: args.status_port,
            threads: args.threads,
            ac_threads: args.ac_threads,
            total_time: args.time,
            total_count: args.count,
            drop_data: args.dropdata,
            error_policy: ErrorPolicy {
                ignore_error: args.ignore_error,
                silence: args.silence,
            },
            output_interval: args.interval,
            isolation: IsolationLevel::try_from(args.isolation)?,
            conn_params: args.conn_params.clone(),
            output_style: args.output,
        }
        .validate()
    }
}

#[derive(Subcommand)]
enum Commands {
    /// CH-benCHmark analytical tables: create, query, drop
    Ch {
        #[command(subcommand)]
        action: PhaseCommand,
    },

    /// Run SQL queries read from files
    Rawsql {
        #[command(subcommand)]
        action: RawSqlCommand,
    },

    /// Print version information
    Version,
}

#[derive(Subcommand, Clone, Copy)]
enum PhaseCommand {
    /// Prepare data for the workload
    Prepare,
    /// Run the workload
    Run,
    /// Cleanup data for the workload
    Cleanup,
}

impl From<PhaseCommand> for Phase {
    fn from(command: PhaseCommand) -> Self {
        match command {
            PhaseCommand::Prepare => Phase::Prepare,
            PhaseCommand::Run => Phase::Run,
            PhaseCommand::Cleanup => Phase::Cleanup,
        }
    }
}

#[derive(Subcommand)]
enum RawSqlCommand {
    /// Run the queries
    Run {
        /// Query files to execute (comma-separated), one query per file
        #[arg(long, value_delimiter = ',', required = true, value_name = "FILE")]
        query_files: Vec<PathBuf>,
    },
}

/// The workload and phase a command line resolves to.
enum Job {
    Ch(Phase),
    RawSql(Vec<RawQuery>),
}

fn main() {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let result = build_runtime(cli.bench.max_procs)
        .context("Failed to start the async runtime")
        .and_then(|runtime| runtime.block_on(run(cli)));
    let code = match result {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {e:#}");
            1
        }
    };
    std::process::exit(code);
}

/// Multi-threaded runtime with `max_procs` workers, or one per CPU when 0.
fn build_runtime(max_procs: usize) -> std::io::Result<tokio::runtime::Runtime> {
    let mut builder = tokio::runtime::Builder::new_multi_thread();
    builder.enable_all();
    if max_procs > 0 {
        builder.worker_threads(max_procs);
    }
    builder.build()
}

async fn run(cli: Cli) -> anyhow::Result<i32> {
    let job = match cli.command {
        Commands::Version => {
            println!("{} {}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));
            return Ok(0);
        }
        Commands::Ch { action } => Job::Ch(action.into()),
        Commands::Rawsql {
            action: RawSqlCommand::Run { query_files },
        } => Job::RawSql(load_queries(&query_files)?),
    };

    let config =
        Arc::new(BenchmarkConfig::try_from(&cli.bench).context("Invalid configuration")?);

    let scope = CancellationToken::new();
    let (coordinator, completion) = ShutdownCoordinator::new(scope.clone(), DEFAULT_DRAIN_TIMEOUT);
    let signals = listen_for_signals().context("Failed to install signal handlers")?;
    let shutdown = tokio::spawn(async move {
        let outcome = coordinator.run(signals).await;
        if let ShutdownOutcome::ForcedExit(_) = outcome {
            std::process::exit(outcome.exit_code());
        }
        outcome
    });

    let result = run_job(job, config, scope).await;

    completion.complete();
    let outcome = shutdown.await.context("Shutdown coordinator failed")?;

    let report = result?;
    if !report.is_success() {
        tracing::warn!(
            "{} of {} workers failed during {}",
            report.failures.len(),
            report.workers,
            report.phase
        );
    }
    Ok(outcome.exit_code())
}

async fn run_job(
    job: Job,
    config: Arc<BenchmarkConfig>,
    scope: CancellationToken,
) -> anyhow::Result<PhaseReport> {
    tracing::info!(
        "driver={} threads={} ac_threads={} count={} time={:?} isolation={}",
        config.dialect,
        config.threads,
        config.ac_threads,
        config.total_count,
        config.total_time,
        config.isolation.name()
    );

    let pool = connect::open(&config)
        .await
        .context("Failed to open database connection")?;
    let measurement = Arc::new(Measurement::new());

    let report = match job {
        Job::Ch(phase) => {
            let workload = ChWorkload::new(pool.clone(), measurement.clone());
            Ok(execute_phase(workload, &config, measurement, scope, phase).await)
        }
        Job::RawSql(queries) => {
            match RawSqlWorkload::new(pool.clone(), queries, measurement.clone()) {
                Ok(workload) => {
                    Ok(execute_phase(workload, &config, measurement, scope, Phase::Run).await)
                }
                Err(e) => Err(e),
            }
        }
    };

    pool.close().await;
    report
}

async fn execute_phase<W: Workload>(
    workload: W,
    config: &Arc<BenchmarkConfig>,
    measurement: Arc<Measurement>,
    scope: CancellationToken,
    phase: Phase,
) -> PhaseReport {
    let sink = Arc::new(StdoutSink::new(config.output_style));
    Bench::new(config.clone(), Arc::new(workload), measurement, sink, scope)
        .execute(phase)
        .await
}
