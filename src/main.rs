//! # Index Sync CLI (`index-sync`)
//!
//! ## Usage
//!
//! ```bash
//! index-sync --config ./config/index-sync.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `index-sync serve` | Bootstrap the index and consume webhook deliveries until Ctrl-C |
//! | `index-sync replay <PATH\|->` | Process newline-delimited notifications from a file or stdin |
//! | `index-sync schema` | Bootstrap the index and print the fields it supports |
//! | `index-sync doc-id <URI>` | Print the document id for a resource URI |
//!
//! Logging goes to stderr and is controlled by `RUST_LOG` (default `info`).

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tokio::io::BufReader;
use tracing_subscriber::EnvFilter;

use index_sync::config::{load_config, Config};
use index_sync::events::JsonLinesSource;
use index_sync::index::document_id;
use index_sync::server::WebhookSource;
use index_sync::service::{RunSummary, SyncService};

/// Index Sync: keep a search index in step with repository change events.
///
/// All commands except `doc-id` read a TOML configuration file, which
/// `INDEX_SYNC_*` environment variables override. See
/// `config/index-sync.example.toml` for a full example.
#[derive(Parser)]
#[command(name = "index-sync", version)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/index-sync.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the service and accept deliveries on `POST /queues/{queue}`.
    ///
    /// The index is created from the configured schema if it does not
    /// exist. Runs until Ctrl-C; the event being handled is finished first.
    Serve,

    /// Process change notifications, one JSON document per line.
    Replay {
        /// File to read, or `-` for stdin.
        path: String,
    },

    /// Print the supported fields of the index, marking completion fields.
    Schema,

    /// Print the document id a resource URI is indexed under.
    DocId {
        /// Absolute resource URI.
        uri: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        // Needs no config
        Commands::DocId { uri } => println!("{}", document_id(&uri)?),
        Commands::Serve => serve(&load_config(&cli.config)?).await?,
        Commands::Replay { path } => replay(&load_config(&cli.config)?, &path).await?,
        Commands::Schema => schema(&load_config(&cli.config)?).await?,
    }

    Ok(())
}

async fn serve(cfg: &Config) -> Result<()> {
    let service = SyncService::start(cfg).await?;
    let mut source = WebhookSource::bind(&cfg.events.bind, &cfg.events.queue).await?;

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    let result = service.run(&mut source, shutdown).await;
    service.stop();
    result?;
    Ok(())
}

async fn replay(cfg: &Config, path: &str) -> Result<()> {
    let service = SyncService::start(cfg).await?;

    let summary = if path == "-" {
        let mut source = JsonLinesSource::new("stdin", BufReader::new(tokio::io::stdin()));
        service.run(&mut source, std::future::pending()).await
    } else {
        let file = tokio::fs::File::open(path)
            .await
            .with_context(|| format!("Failed to open {}", path))?;
        let mut source = JsonLinesSource::new(path, BufReader::new(file));
        service.run(&mut source, std::future::pending()).await
    };
    service.stop();

    print_summary(&summary?);
    Ok(())
}

fn print_summary(summary: &RunSummary) {
    println!("Replay complete:");
    println!("  received:   {}", summary.received);
    println!("  indexed:    {}", summary.indexed);
    println!("  deleted:    {}", summary.deleted);
    println!("  tombstoned: {}", summary.tombstoned);
    println!("  ignored:    {}", summary.ignored);
    println!("  failed:     {}", summary.failed);
}

async fn schema(cfg: &Config) -> Result<()> {
    let service = SyncService::start(cfg).await?;
    let schema = service
        .schema()
        .context("Sync service stopped before the schema could be read")?;
    service.stop();

    for field in schema.supported_fields() {
        if schema.needs_completion(field) {
            println!("{}  (completion)", field);
        } else {
            println!("{}", field);
        }
    }
    Ok(())
}
