///
/// naml-dbshell - SQL shell for the database compatibility core
///
/// Runs a batch of `;`-separated SQL through a naml-std-db connection
/// backed by SQLite and prints every result set:
/// - naml-dbshell -e "SELECT 1": run inline SQL against an in-memory database
/// - naml-dbshell --root data --database shop < script.sql: run a script
///   against `data/shop.sqlite3`
/// - --backend pgsql|oci8|pdo: apply another legacy API's rules
/// - --json: machine-readable output
///
/// Logs go to stderr; `-v` enables debug output, `-vv` trace output, and
/// RUST_LOG overrides both.
///

mod render;

use std::io::{self, Read, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use naml_std_db::{
    BackendKind, ConfigError, ConnectParams, ConnectionResource, DbConfig, DbError, DbRuntime,
    Session,
};
use naml_std_sqlite3::SqliteDriver;
use thiserror::Error;
use tracing::debug;
use tracing_subscriber::EnvFilter;

use render::ResultSet;

#[derive(Parser)]
#[command(name = "naml-dbshell")]
#[command(author, version, about = "Run SQL through the naml database compatibility core", long_about = None)]
struct Cli {
    /// Directory holding `<catalog>.sqlite3` files
    #[arg(long)]
    root: Option<PathBuf>,

    /// Catalog to connect to (requires --root)
    #[arg(long, short = 'd')]
    database: Option<String>,

    /// Legacy API profile (mysql, pgsql, oci8, pdo)
    #[arg(long, short = 'b', default_value = "mysql")]
    backend: String,

    /// Runtime configuration file (TOML)
    #[arg(long, short = 'c')]
    config: Option<PathBuf>,

    /// Print result sets as JSON
    #[arg(long)]
    json: bool,

    /// SQL to run; read from stdin when absent
    #[arg(long, short = 'e')]
    execute: Option<String>,

    /// Increase log verbosity
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Debug, Error)]
enum ShellError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("{0}")]
    Db(#[from] DbError),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("unknown backend '{0}' (expected mysql, pgsql, oci8 or pdo)")]
    UnknownBackend(String),

    #[error("connect failed: {0}")]
    Connect(String),

    #[error("--database needs --root")]
    DatabaseWithoutRoot,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_ansi(false)
        .init();
}

fn run(cli: &Cli) -> Result<(), ShellError> {
    let config = match &cli.config {
        Some(path) => DbConfig::from_path(path)?,
        None => DbConfig::default(),
    };
    let kind = BackendKind::from_name(&cli.backend)
        .ok_or_else(|| ShellError::UnknownBackend(cli.backend.clone()))?;

    let (driver, params) = match (&cli.root, &cli.database) {
        (Some(root), Some(db)) => (
            SqliteDriver::with_root(root),
            ConnectParams::default().database(db.as_str()),
        ),
        (Some(root), None) => (SqliteDriver::with_root(root), ConnectParams::url("sqlite::memory:")),
        (None, Some(_)) => return Err(ShellError::DatabaseWithoutRoot),
        (None, None) => (SqliteDriver::in_memory(), ConnectParams::url("sqlite::memory:")),
    };

    let sql = match &cli.execute {
        Some(sql) => sql.clone(),
        None => {
            let mut sql = String::new();
            io::stdin().read_to_string(&mut sql)?;
            sql
        }
    };

    let session = Session::new(DbRuntime::new(config));
    let conn = ConnectionResource::new(&session, kind);
    if let Err(e) = conn.connect(Arc::new(driver), params) {
        return Err(ShellError::Connect(conn.last_error().unwrap_or_else(|| e.to_string())));
    }
    debug!(backend = %kind, catalog = %conn.catalog(), "shell connected");

    let batch = conn.multi_query(&sql);
    let sets = drain_results(&conn)?;

    let mut out = io::stdout().lock();
    if cli.json {
        writeln!(out, "{}", render::json(&sets)?)?;
    } else {
        write!(out, "{}", render::text(&sets))?;
        if sets.is_empty() && batch.is_ok() {
            writeln!(out, "Query OK, {} rows affected", conn.affected_rows().max(0))?;
        }
    }
    out.flush()?;

    session.close();
    batch.map_err(ShellError::from)
}

/// Drains every queued result set of the last multi-statement batch.
fn drain_results(conn: &ConnectionResource) -> Result<Vec<ResultSet>, DbError> {
    let mut sets = Vec::new();
    loop {
        if let Some(result) = conn.store_result() {
            sets.push(ResultSet::drain(&result)?);
            result.close();
        }
        if !conn.next_result() {
            break;
        }
    }
    Ok(sets)
}
