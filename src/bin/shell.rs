//! Interactive shell for a txnkv database.

use std::fs;
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};

use clap::Parser;
use tracing::{error, info};
use txnkv::{
    CommitLog, Connection, ConnectionConfig, DurableStore, OperationLog, OverwritePolicy, Session,
    TxnId, TxnKvError, INITIAL_DATA,
};

#[derive(Parser)]
#[command(name = "txnkv-shell")]
#[command(about = "Interactive shell for the txnkv transactional key-value store")]
struct Args {
    /// Database directory
    #[arg(long, env = "TXNKV_DB_PATH", default_value = "txnkv.db")]
    db_path: PathBuf,

    /// Logging level
    #[arg(long, default_value = "warn")]
    log_level: String,

    /// Do not seed A, B and C on startup
    #[arg(long)]
    no_seed: bool,

    /// Delete existing database files before opening
    #[arg(long)]
    reset: bool,

    /// Run recovery when the database is opened
    #[arg(long)]
    recover: bool,

    /// Keep earlier log entries when a key is written twice in one transaction
    #[arg(long)]
    upsert_overwrites: bool,

    /// Skip fsync after each write
    #[arg(long)]
    no_sync: bool,
}

const HELP: &str = "\
Commands:
  BEGIN <id>           start transaction <id>
  READ <key>           read a key
  WRITE <key> <value>  buffer a write
  COMMIT               commit the active transaction
  ABORT                abort the active transaction
  RECOVER              replay committed writes from the operation log
  CHECKPOINT           accepted, does nothing
  FAIL                 simulate a failure (aborts the active transaction)
  LOG                  show the operation log
  COMMITS              show the commit log
  DATA                 show committed data
  HELP                 show this message
  EXIT | QUIT          leave the shell";

#[derive(Debug, Clone, PartialEq, Eq)]
enum Command {
    Begin(TxnId),
    Read(String),
    Write(String, i64),
    Commit,
    Abort,
    Recover,
    Checkpoint,
    Fail,
    Log,
    Commits,
    Data,
    Help,
    Exit,
}

/// Parse one input line. Blank lines yield `Ok(None)`.
fn parse_command(line: &str) -> Result<Option<Command>, String> {
    let mut parts = line.split_whitespace();
    let Some(cmd) = parts.next() else {
        return Ok(None);
    };
    let args: Vec<&str> = parts.collect();

    let command = match (cmd.to_uppercase().as_str(), args.as_slice()) {
        ("BEGIN", [id]) => Command::Begin(
            id.parse()
                .map_err(|_| format!("invalid transaction id: {id}"))?,
        ),
        ("READ", [key]) => Command::Read(key.to_string()),
        ("WRITE", [key, value]) => Command::Write(
            key.to_string(),
            value
                .parse()
                .map_err(|_| format!("invalid integer value: {value}"))?,
        ),
        ("COMMIT", []) => Command::Commit,
        ("ABORT", []) => Command::Abort,
        ("RECOVER", []) => Command::Recover,
        ("CHECKPOINT", []) => Command::Checkpoint,
        ("FAIL", []) => Command::Fail,
        ("LOG", []) => Command::Log,
        ("COMMITS", []) => Command::Commits,
        ("DATA", []) => Command::Data,
        ("HELP", []) => Command::Help,
        ("EXIT", []) | ("QUIT", []) => Command::Exit,
        ("BEGIN", _) => return Err("usage: BEGIN <id>".into()),
        ("READ", _) => return Err("usage: READ <key>".into()),
        ("WRITE", _) => return Err("usage: WRITE <key> <value>".into()),
        (other, _) => return Err(format!("unknown command '{other}', try HELP")),
    };
    Ok(Some(command))
}

/// Run one command, printing its result. Returns `false` when the shell should exit.
fn execute(
    conn: &Connection,
    session: &mut Session,
    command: Command,
    out: &mut impl Write,
) -> Result<bool, TxnKvError> {
    match command {
        Command::Begin(id) => {
            session.start_transaction(id)?;
            writeln!(out, "Transaction {id} started")?;
        }
        Command::Read(key) => match session.read(&key)? {
            Some(value) => writeln!(out, "{key} = {value}")?,
            None => writeln!(out, "{key} = nil")?,
        },
        Command::Write(key, value) => {
            session.write(&key, value)?;
            writeln!(out, "Written {value} to {key}")?;
        }
        Command::Commit => {
            let id = session.current_transaction();
            session.commit()?;
            writeln!(out, "Transaction {} committed", display_id(id))?;
        }
        Command::Abort => {
            let id = session.current_transaction();
            session.abort()?;
            writeln!(out, "Transaction {} aborted", display_id(id))?;
        }
        Command::Recover => {
            let report = session.recover()?;
            writeln!(
                out,
                "Recovery completed: {} write(s) replayed from {} committed transaction(s)",
                report.replayed_writes, report.committed_transactions
            )?;
        }
        Command::Checkpoint => {
            conn.checkpoint()?;
            writeln!(out, "Checkpoint created")?;
        }
        Command::Fail => {
            writeln!(out, "Simulated failure occurred")?;
            if session.current_transaction().is_some() {
                session.abort()?;
            }
        }
        Command::Log => {
            writeln!(out, "{:<8} {:<10} {:<16} value", "txn", "operation", "key")?;
            for entry in conn.get_log() {
                let value = entry
                    .value
                    .map(|v| v.to_string())
                    .unwrap_or_else(|| "nil".to_string());
                writeln!(
                    out,
                    "{:<8} {:<10} {:<16} {value}",
                    entry.transaction_id, entry.operation, entry.key
                )?;
            }
        }
        Command::Commits => {
            writeln!(out, "txn")?;
            for mark in conn.get_commit_log() {
                writeln!(out, "{}", mark.transaction_id)?;
            }
        }
        Command::Data => {
            for (key, value) in conn.get_data() {
                writeln!(out, "{key} = {value}")?;
            }
        }
        Command::Help => writeln!(out, "{HELP}")?,
        Command::Exit => return Ok(false),
    }
    Ok(true)
}

fn display_id(id: Option<TxnId>) -> String {
    id.map(|id| id.to_string()).unwrap_or_else(|| "-".to_string())
}

fn reset_database(path: &Path) -> io::Result<()> {
    for file in [
        DurableStore::path_for_db(path),
        OperationLog::path_for_db(path),
        CommitLog::path_for_db(path),
    ] {
        if file.exists() {
            fs::remove_file(&file)?;
        }
    }
    Ok(())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let log_level = match args.log_level.as_str() {
        "trace" => tracing::Level::TRACE,
        "debug" => tracing::Level::DEBUG,
        "info" => tracing::Level::INFO,
        "warn" => tracing::Level::WARN,
        "error" => tracing::Level::ERROR,
        _ => tracing::Level::WARN,
    };
    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_writer(io::stderr)
        .init();

    if args.reset {
        info!(path = %args.db_path.display(), "resetting database");
        reset_database(&args.db_path)?;
    }

    let policy = if args.upsert_overwrites {
        OverwritePolicy::Upsert
    } else {
        OverwritePolicy::ClearTransaction
    };
    let config = ConnectionConfig::new()
        .sync_every_write(!args.no_sync)
        .recover_on_open(args.recover)
        .overwrite_policy(policy);
    let conn = Connection::open(&args.db_path, config)?;
    if !args.no_seed {
        conn.seed(INITIAL_DATA)?;
    }

    let mut session = conn.open_session();
    let stdin = io::stdin();
    let mut stdout = io::stdout();
    writeln!(stdout, "txnkv shell on {} (HELP for commands)", args.db_path.display())?;

    for line in stdin.lock().lines() {
        let line = line?;
        let command = match parse_command(&line) {
            Ok(Some(command)) => command,
            Ok(None) => continue,
            Err(msg) => {
                writeln!(stdout, "ERROR: {msg}")?;
                continue;
            }
        };
        match execute(&conn, &mut session, command, &mut stdout) {
            Ok(true) => {}
            Ok(false) => break,
            Err(err) => {
                error!(%err, "command failed");
                writeln!(stdout, "ERROR: {err}")?;
            }
        }
        stdout.flush()?;
    }

    Ok(())
}
