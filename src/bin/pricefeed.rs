//! # Pricefeed
//!
//! Ingestion daemon and operator CLI. `run` keeps the worker pool going until
//! Ctrl-C; the other subcommands expose the store's health, reconciliation
//! and raw read contract.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use pricefeed_core::config::ConfigManager;
use pricefeed_core::ingestion::{HttpChunkSource, ProcessLauncher, WorkerPool, WorkerPoolConfig};
use pricefeed_core::logging::init_structured_logging;
use pricefeed_core::resilience::CircuitBreakerMetrics;
use pricefeed_core::store::{DualStore, HealthSnapshot, StoreKey};
use serde::Serialize;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "pricefeed")]
#[command(about = "Market price ingestion and dual-tier store operations")]
#[command(version = env!("CARGO_PKG_VERSION"))]
pub struct Cli {
    /// Environment overlay to load (development, test, production)
    #[arg(short, long)]
    environment: Option<String>,

    /// Configuration directory (default: config, or PRICEFEED_CONFIG_DIR)
    #[arg(short, long)]
    config_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the ingestion worker pool until Ctrl-C
    Run,

    /// Probe both store tiers and print the snapshot and cache breaker as JSON
    Health,

    /// Copy every durable record into the cache tier
    Sync,

    /// Read one record by key
    Get {
        /// Store key, e.g. market_prices:USD
        key: String,
    },
}

/// What `pricefeed health` prints
#[derive(Serialize)]
struct HealthReport {
    #[serde(flatten)]
    snapshot: HealthSnapshot,
    cache_breaker: Option<CircuitBreakerMetrics>,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_structured_logging();

    match execute(cli).await {
        Ok(code) => process::exit(code),
        Err(e) => {
            error!(error = %format!("{e:#}"), "pricefeed failed");
            eprintln!("error: {e:#}");
            process::exit(1);
        }
    }
}

async fn execute(cli: Cli) -> Result<i32> {
    let environment = cli
        .environment
        .unwrap_or_else(ConfigManager::detect_environment);
    let manager = ConfigManager::load_from_directory_with_env(cli.config_dir, &environment)
        .context("failed to load configuration")?;
    let config = manager.config();

    let store = DualStore::connect(&config.store, &config.circuit_breaker);

    let code = match cli.command {
        Commands::Run => {
            let source = HttpChunkSource::new(&config.chunk_source)
                .context("failed to build chunk source")?;
            let launcher =
                ProcessLauncher::from_config(config).context("failed to locate worker program")?;
            info!(
                program = %launcher.program().display(),
                endpoint = source.endpoint(),
                "Starting ingestion"
            );

            let pool = WorkerPool::new(
                WorkerPoolConfig::from_pipeline(&config.pipeline),
                Arc::new(source),
                Arc::new(launcher),
            )?;

            let stats = pool
                .run_until(async {
                    if let Err(e) = tokio::signal::ctrl_c().await {
                        error!(error = %e, "Could not listen for Ctrl-C; stopping");
                    }
                })
                .await;

            println!("{}", serde_json::to_string_pretty(&stats)?);
            0
        }
        Commands::Health => {
            let report = HealthReport {
                snapshot: store.check_health().await,
                cache_breaker: store.cache_breaker_metrics(),
            };
            println!("{}", serde_json::to_string_pretty(&report)?);
            if report.snapshot.durable_available {
                0
            } else {
                2
            }
        }
        Commands::Sync => match store.sync_all().await {
            Ok(result) => {
                println!("{}", serde_json::to_string_pretty(&result)?);
                0
            }
            Err(e) => {
                error!(error = %e, "Sync refused");
                eprintln!("sync failed: {e}");
                2
            }
        },
        Commands::Get { key } => {
            let value = store
                .get_raw(&StoreKey::new(key.clone()))
                .await
                .with_context(|| format!("failed to read '{key}'"))?;
            match value {
                Some(value) => {
                    println!("{}", serde_json::to_string_pretty(&value)?);
                    0
                }
                None => {
                    eprintln!("no record for '{key}'");
                    3
                }
            }
        }
    };

    store.close().await;
    Ok(code)
}
