//! # Snapshot Relay CLI (`relay`)
//!
//! ## Usage
//!
//! ```bash
//! relay --config ./config/relay.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `relay serve` | Restore the published store, run the scheduler and the HTTP adapter |
//! | `relay sync` | Restore, then perform one run against the mailbox |
//! | `relay load <file>` | Build and publish a store from a local artifact |
//! | `relay query "<sql>"` | Read-only query against the published store (JSON output) |
//! | `relay status` | Readiness, current store and tables |

use clap::{Parser, Subcommand};
use snapshot_relay::app::App;
use snapshot_relay::config::{self, Config};
use snapshot_relay::error::QueryError;
use snapshot_relay::{scheduler, server, stats};
use snapshot_relay_core::models::{RunOutcome, Trigger};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Snapshot Relay: mailbox snapshot to hot-swapped SQLite store.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/relay.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "relay",
    about = "Snapshot Relay — mailbox snapshots served as a hot-swapped read-only SQLite store",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/relay.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the scheduler and the HTTP adapter until interrupted.
    ///
    /// Restores the store named by the catalog pointer first, so a restart
    /// serves the previous snapshot while the startup run refreshes it.
    Serve,

    /// Perform one run against the mailbox and print its run record.
    Sync,

    /// Build and publish a store from a local artifact file.
    ///
    /// Accepts `.json`, `.gz`, `.tar.gz`/`.tgz` and `.zip`.
    Load {
        /// Path to the artifact.
        file: PathBuf,
    },

    /// Run a read-only SQL query against the published store.
    Query {
        /// A single SELECT or WITH statement.
        sql: String,
    },

    /// Show readiness, the published store and its tables.
    Status,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "snapshot_relay=info".to_string()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    // Read-only commands fall back to defaults when no config file exists.
    let cfg = match cli.command {
        Commands::Query { .. } | Commands::Status => {
            config::load_config(&cli.config).unwrap_or_else(|_| Config::minimal())
        }
        _ => config::load_config(&cli.config)?,
    };

    match cli.command {
        Commands::Serve => run_serve(&cfg).await?,
        Commands::Sync => {
            let app = App::new(&cfg);
            app.pipeline.restore().await;
            if let Some(run) = app.coordinator.run_now(Trigger::Manual).await {
                println!("{}", serde_json::to_string_pretty(&run)?);
                if matches!(run.outcome, Some(RunOutcome::Failed { .. })) {
                    std::process::exit(1);
                }
            }
        }
        Commands::Load { file } => {
            let app = App::new(&cfg);
            app.pipeline.restore().await;
            match app.pipeline.ingest_file(&file).await? {
                RunOutcome::Succeeded { tables, rows } => {
                    println!("Loaded {} tables ({} rows) from {}", tables, rows, file.display());
                    stats::print_tables(&app.read.tables()?);
                }
                other => println!("{:?}", other),
            }
        }
        Commands::Query { sql } => {
            let app = App::new(&cfg);
            app.open_current().await;
            match app.read.query(&sql).await {
                Ok(rows) => println!("{}", serde_json::to_string_pretty(&rows)?),
                Err(e @ QueryError::NotReady) | Err(e @ QueryError::Rejected(_)) => {
                    eprintln!("{}", e);
                    std::process::exit(2);
                }
                Err(e) => return Err(e.into()),
            }
        }
        Commands::Status => {
            let app = App::new(&cfg);
            app.open_current().await;
            let tables = app.read.tables().unwrap_or_default();
            stats::print_status(&app.read.status(), &tables, &app.catalog);
        }
    }

    Ok(())
}

async fn run_serve(cfg: &Config) -> anyhow::Result<()> {
    let app = App::new(cfg);
    if app.pipeline.restore().await {
        info!("serving restored store while the startup run refreshes it");
    }

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("received shutdown signal");
        let _ = shutdown_tx.send(true);
    });

    let schedule = tokio::spawn(scheduler::run_schedule(
        app.coordinator.clone(),
        cfg.schedule.clone(),
        shutdown_rx.clone(),
    ));

    server::run_server(
        &cfg.server.bind,
        app.read.clone(),
        app.coordinator.clone(),
        shutdown_rx,
    )
    .await?;

    schedule.await?;
    Ok(())
}
