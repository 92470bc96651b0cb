//! # Wallet Sync Entry Point
//!
//! `serve` runs the trigger server (and optionally the in-process worker loop),
//! `tick` runs a single worker tick, `migrate` applies database migrations.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use wallet_sync::{
    config::ConfigLoader,
    db,
    server::{AppState, run_server},
    telemetry,
};

#[derive(Debug, Parser)]
#[command(name = "wallet-sync", version, about = "Wallet pass synchronization worker")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Serve the HTTP trigger endpoint (default)
    Serve {
        /// Also tick on the configured interval inside this process
        #[arg(long)]
        run_worker: bool,
    },
    /// Run one worker tick and print its summary as JSON
    Tick,
    /// Apply pending database migrations
    Migrate,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = ConfigLoader::new()
        .load()
        .context("loading configuration")?;
    telemetry::init_tracing(&config).context("initializing telemetry")?;

    match config.redacted_json() {
        Ok(redacted) => tracing::info!(profile = %config.profile, config = %redacted, "Configuration loaded"),
        Err(err) => tracing::warn!(error = %err, "Could not render redacted configuration"),
    }

    let db = db::init_pool(&config)
        .await
        .context("initializing database connection pool")?;

    match cli.command.unwrap_or(Command::Serve { run_worker: false }) {
        Command::Migrate => db::run_migrations(&db).await,
        Command::Tick => {
            let state = AppState::build(config, db)?;
            let summary = state.worker.tick().await.context("wallet sync tick failed")?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
            Ok(())
        }
        Command::Serve { run_worker } => {
            if run_worker {
                config.worker.run_in_process = true;
            }
            if config.is_local_profile() {
                db::run_migrations(&db).await?;
            }

            let shutdown = CancellationToken::new();
            let signal_token = shutdown.clone();
            tokio::spawn(async move {
                match tokio::signal::ctrl_c().await {
                    Ok(()) => {
                        tracing::info!("Shutdown signal received");
                        signal_token.cancel();
                    }
                    Err(err) => tracing::error!(error = %err, "Failed to listen for shutdown signal"),
                }
            });

            let state = AppState::build(config, db)?;
            run_server(state, shutdown).await
        }
    }
}
