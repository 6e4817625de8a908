use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use cexbook::aggregate::{aggregate_balances, CoinTable};
use cexbook::config::{default_config_path, DocumentBackend, ResolvedConfig};
use cexbook::credentials::{CredentialStore, EnvCredentialStore};
use cexbook::documents::{DocumentStore, GithubDocumentStore, JsonFileDocumentStore};
use cexbook::ledger::{Ledger, LedgerEntry, LedgerKind};
use cexbook::snapshots::{record_snapshot, JsonFileSnapshotStore, SnapshotStore};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "cexbook")]
#[command(about = "Exchange balance aggregation for treasury dashboards")]
struct Cli {
    /// Path to config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Emit logs as JSON
    #[arg(long)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Poll every configured exchange and print the aggregate
    Balances {
        /// Also record the result in the snapshot history
        #[arg(long)]
        save_snapshot: bool,
    },
    /// Poll every configured exchange and record today's snapshot
    Snapshot,
    /// Print recorded snapshots, newest first
    Snapshots {
        /// Maximum number of snapshots (defaults to the configured history limit)
        #[arg(short, long)]
        limit: Option<usize>,
    },
    /// Poll exchanges and print holdings of the largest coins per exchange
    Coins {
        /// Number of coin columns (defaults to the configured value)
        #[arg(long)]
        top: Option<usize>,
    },
    /// Manage the loan ledger
    Loans {
        #[command(subcommand)]
        action: LedgerCommand,
    },
    /// Manage the locked-token ledger
    LockedTokens {
        #[command(subcommand)]
        action: LedgerCommand,
    },
    /// Show current configuration
    Config,
}

#[derive(Subcommand)]
enum LedgerCommand {
    /// List all entries
    List,
    /// Add an entry from a JSON object
    Add { fields: String },
    /// Merge a JSON object into an existing entry
    Update { id: String, patch: String },
    /// Delete an entry
    Delete { id: String },
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn parse_object(raw: &str) -> Result<LedgerEntry> {
    serde_json::from_str(raw).context("Expected a JSON object")
}

async fn document_store(config: &ResolvedConfig) -> Result<Arc<dyn DocumentStore>> {
    match config.documents.backend {
        DocumentBackend::File => Ok(Arc::new(JsonFileDocumentStore::new(&config.data_dir))),
        DocumentBackend::Github => {
            let repo = config
                .documents
                .repo
                .clone()
                .context("[documents] repo is required for the github backend")?;
            let token = EnvCredentialStore::new()
                .get("GITHUB_TOKEN")
                .await?
                .context("GITHUB_TOKEN is not set")?;
            let mut store =
                GithubDocumentStore::new(repo, &config.documents.branch, token, config.http.timeout)?;
            if let Some(api_base) = &config.documents.api_base {
                store = store.with_api_base(api_base);
            }
            Ok(Arc::new(store))
        }
    }
}

async fn run_ledger(config: &ResolvedConfig, kind: LedgerKind, action: LedgerCommand) -> Result<()> {
    let ledger = Ledger::new(document_store(config).await?, kind);
    match action {
        LedgerCommand::List => print_json(&ledger.list().await?),
        LedgerCommand::Add { fields } => print_json(&ledger.add(parse_object(&fields)?).await?),
        LedgerCommand::Update { id, patch } => {
            let updated = ledger
                .update(&id, parse_object(&patch)?)
                .await?
                .with_context(|| format!("No {kind} entry with id {id}"))?;
            print_json(&updated)
        }
        LedgerCommand::Delete { id } => {
            anyhow::ensure!(ledger.delete(&id).await?, "No {kind} entry with id {id}");
            print_json(&serde_json::json!({ "deleted": id }))
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_level(true);
    if cli.json_logs {
        tracing_subscriber::registry()
            .with(filter)
            .with(layer.json())
            .init();
    } else {
        tracing_subscriber::registry().with(filter).with(layer).init();
    }

    let config_path = cli.config.unwrap_or_else(default_config_path);
    let config = ResolvedConfig::load_or_default(&config_path)
        .with_context(|| format!("Failed to load config: {}", config_path.display()))?;
    let credentials = EnvCredentialStore::new();
    let snapshots = JsonFileSnapshotStore::new(&config.data_dir);

    match cli.command {
        Command::Balances { save_snapshot } => {
            let snapshot = aggregate_balances(&credentials, &config).await?;
            print_json(&snapshot)?;
            if save_snapshot {
                record_snapshot(&snapshots, snapshot, config.snapshot_timezone).await?;
            }
        }
        Command::Snapshot => {
            let snapshot = aggregate_balances(&credentials, &config).await?;
            let record = record_snapshot(&snapshots, snapshot, config.snapshot_timezone).await?;
            print_json(&record)?;
        }
        Command::Snapshots { limit } => {
            let limit = limit.unwrap_or(config.snapshots.history_limit);
            print_json(&snapshots.list(limit).await?)?;
        }
        Command::Coins { top } => {
            let snapshot = aggregate_balances(&credentials, &config).await?;
            let top = top.unwrap_or(config.display.top_coins);
            print_json(&CoinTable::build(&snapshot, top))?;
        }
        Command::Loans { action } => run_ledger(&config, LedgerKind::Loans, action).await?,
        Command::LockedTokens { action } => {
            run_ledger(&config, LedgerKind::LockedTokens, action).await?
        }
        Command::Config => {
            println!("Config file: {}", config_path.display());
            println!("Data directory: {}", config.data_dir.display());
            println!("Snapshot timezone: {}", config.snapshot_timezone);
            println!("HTTP timeout: {}", cexbook::duration::format_duration(config.http.timeout));
            println!("Top coins: {}", config.display.top_coins);
            println!("Documents backend: {:?}", config.documents.backend);
            for (exchange, url) in &config.endpoints {
                println!("Endpoint {exchange}: {url}");
            }
        }
    }

    Ok(())
}
