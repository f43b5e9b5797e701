use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing::Level;

use wc_core::DappSession;
use wc_settings::BridgeSettings;
use wc_store::{Database, SessionStore, SqliteKeyValueStore};
use wc_telemetry::{init_telemetry, LogQuery, LogRecord, SqliteLogSink, TelemetryConfig};

/// Inspect and prune the dapps this wallet has authorized.
#[derive(Parser, Debug)]
#[command(name = "wcbridge", version)]
struct Cli {
    /// Settings file (defaults to ~/.wcbridge/settings.json).
    #[arg(long, global = true)]
    settings: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Persisted dapp sessions.
    #[command(subcommand)]
    Sessions(SessionsCommand),
    /// Effective settings.
    #[command(subcommand)]
    Settings(SettingsCommand),
    /// Query persisted warn+ logs.
    Logs(LogsArgs),
}

#[derive(Subcommand, Debug)]
enum SessionsCommand {
    List {
        #[arg(long)]
        json: bool,
    },
    /// Forget every session for one dapp.
    Remove(RemoveArgs),
}

#[derive(Args, Debug)]
#[group(required = true, multiple = false)]
struct RemoveArgs {
    /// Dapp name as announced in its metadata.
    #[arg(long)]
    name: Option<String>,
    /// Dapp url as announced in its metadata.
    #[arg(long)]
    url: Option<String>,
}

#[derive(Subcommand, Debug)]
enum SettingsCommand {
    Show,
}

#[derive(Args, Debug)]
struct LogsArgs {
    /// Least severe level to show (error or warn).
    #[arg(long)]
    level: Option<Level>,
    #[arg(long)]
    connection: Option<String>,
    #[arg(long)]
    dapp: Option<String>,
    /// JSON-RPC method of the call request, e.g. eth_sendTransaction.
    #[arg(long)]
    method: Option<String>,
    #[arg(long, default_value_t = 50)]
    limit: u32,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = match &cli.settings {
        Some(path) => wc_settings::load_settings_from_path(path),
        None => wc_settings::load_settings(),
    }
    .context("failed to load settings")?;

    let _telemetry = init_telemetry(telemetry_config(&settings));

    match cli.command {
        Command::Sessions(SessionsCommand::List { json }) => {
            let sessions = open_store(&settings)?.list()?;
            if json {
                println!("{}", serde_json::to_string_pretty(&sessions)?);
            } else if sessions.is_empty() {
                println!("no authorized dapps");
            } else {
                for session in &sessions {
                    println!("{}", describe(session));
                }
            }
        }
        Command::Sessions(SessionsCommand::Remove(args)) => {
            let store = open_store(&settings)?;
            let sessions = store.list()?;
            let matched = select(&sessions, &args);
            if matched.is_empty() {
                bail!("no stored dapp matches");
            }
            for session in &matched {
                store.remove(session.peer_meta())?;
                tracing::info!(dapp = %session.peer_meta().label(), "removed dapp session");
                println!("removed {}", session.peer_meta().label());
            }
        }
        Command::Settings(SettingsCommand::Show) => {
            println!("{}", serde_json::to_string_pretty(&settings)?);
        }
        Command::Logs(args) => {
            let sink = SqliteLogSink::new(&PathBuf::from(&settings.logging.db_path))
                .context("failed to open log database")?;
            let records = sink.query(&log_query(args))?;
            for record in &records {
                println!("{}", describe_log(record));
            }
        }
    }
    Ok(())
}

fn telemetry_config(settings: &BridgeSettings) -> TelemetryConfig {
    TelemetryConfig {
        log_level: settings.logging.level.parse().unwrap_or(Level::INFO),
        log_to_sqlite: settings.logging.persist,
        log_db_path: PathBuf::from(&settings.logging.db_path),
        ..Default::default()
    }
}

fn open_store(settings: &BridgeSettings) -> Result<SessionStore> {
    let path = settings.storage.db_path();
    let db = Database::open(&path)
        .with_context(|| format!("failed to open {}", path.display()))?;
    Ok(SessionStore::new(
        Arc::new(SqliteKeyValueStore::new(db)),
        settings.storage.sessions_key.clone(),
    ))
}

fn select(sessions: &[DappSession], args: &RemoveArgs) -> Vec<DappSession> {
    sessions
        .iter()
        .filter(|s| {
            let peer = s.peer_meta();
            args.name.as_deref().is_some_and(|n| peer.name == n)
                || args.url.as_deref().is_some_and(|u| peer.url == u)
        })
        .cloned()
        .collect()
}

fn describe(session: &DappSession) -> String {
    let peer = session.peer_meta();
    format!("{}\t{}\t{}", peer.label(), peer.url, session.client_id)
}

fn log_query(args: LogsArgs) -> LogQuery {
    LogQuery {
        min_level: args.level,
        connection_id: args.connection,
        dapp: args.dapp,
        method: args.method,
        limit: Some(args.limit),
    }
}

fn describe_log(record: &LogRecord) -> String {
    let mut line = format!("{} {:5} {}", record.timestamp, record.level, record.message);
    if let Some(connection) = &record.connection_id {
        line.push_str(&format!(" connection={connection}"));
    }
    if let Some(dapp) = &record.dapp {
        line.push_str(&format!(" dapp={dapp}"));
    }
    match (&record.method, record.request_id) {
        (Some(method), Some(id)) => line.push_str(&format!(" call={method}#{id}")),
        (Some(method), None) => line.push_str(&format!(" call={method}")),
        (None, Some(id)) => line.push_str(&format!(" request={id}")),
        (None, None) => {}
    }
    if let Some(error) = &record.error {
        line.push_str(&format!(" error={error}"));
    }
    line
}
