//! Funding Matrix - Main Entry Point
//!
//! Batch-job CLI: one-off historical backfill, the hourly incremental
//! update (run from an external scheduler), and the open-interest
//! ranking fetch.

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use funding_matrix::collector::{BulkCollector, UpdateOrchestrator};
use funding_matrix::config::Config;
use funding_matrix::exchange;
use funding_matrix::oi::OpenInterestJob;
use funding_matrix::store::FundingStore;
use std::path::Path;
use tracing::{info, Level};
use tracing_subscriber::EnvFilter;

/// Funding Matrix CLI
#[derive(Parser)]
#[command(name = "funding-matrix")]
#[command(version, about = "Cross-exchange perpetual funding rate collector")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Backfill historical funding rates from scratch
    Bootstrap {
        /// How many days of history to pull
        #[arg(short, long)]
        days: Option<u32>,

        /// Explicit symbols to collect (base assets, e.g. BTC ETH)
        #[arg(short, long, num_args = 1..)]
        symbols: Vec<String>,

        /// Discover the symbol universe from every enabled exchange
        #[arg(long)]
        discover: bool,
    },

    /// Run one incremental update cycle (intended for hourly scheduling)
    Update,

    /// Refresh the open-interest ranking
    Oi {
        /// How many top markets to keep
        #[arg(long)]
        top: Option<usize>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = Config::load()?;
    config.validate()?;

    init_logging(&config.storage.log_dir)?;

    if let Some(parent) = Path::new(&config.storage.database_path).parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {:?}", parent))?;
    }
    let store = FundingStore::new(&config.storage.database_path)?;

    match cli.command {
        Commands::Bootstrap {
            days,
            symbols,
            discover,
        } => run_bootstrap(&config, &store, days, symbols, discover).await,
        Commands::Update => run_update(&config, &store).await,
        Commands::Oi { top } => run_oi(&config, &store, top).await,
    }
}

async fn run_bootstrap(
    config: &Config,
    store: &FundingStore,
    days: Option<u32>,
    symbols: Vec<String>,
    discover: bool,
) -> Result<()> {
    let days = days.unwrap_or(config.collection.days_back);
    let adapters = exchange::build_enabled_adapters(&config.exchanges).await?;

    let symbols = BulkCollector::resolve_symbols(
        &adapters,
        symbols,
        discover,
        config.collection.symbols.as_ref(),
    )
    .await;

    let end_time = Utc::now().timestamp_millis();
    let start_time = end_time - i64::from(days) * 86_400_000;
    info!(
        "Bootstrap: {} symbols, {} days of history",
        symbols.len(),
        days
    );

    let collector = BulkCollector::new(store);
    let total = collector
        .collect_all(&adapters, &symbols, start_time, end_time)
        .await?;
    info!("Bootstrap complete: {} records inserted", total);

    log_exchange_status(store)?;
    Ok(())
}

async fn run_update(config: &Config, store: &FundingStore) -> Result<()> {
    let adapters = exchange::build_enabled_adapters(&config.exchanges).await?;
    let adapters = exchange::retain_allowed_hip3(adapters, &config.exchanges.hip3_allowed_deployers);

    let orchestrator = UpdateOrchestrator::new(store, config.collection.clone());
    orchestrator.run(&adapters).await?;

    log_exchange_status(store)?;
    Ok(())
}

async fn run_oi(config: &Config, store: &FundingStore, top: Option<usize>) -> Result<()> {
    let top_n = top.unwrap_or(config.open_interest.top_n);
    let job = OpenInterestJob::new(top_n, config.open_interest.workers)?;
    job.run(store).await?;
    Ok(())
}

fn log_exchange_status(store: &FundingStore) -> Result<()> {
    info!("Exchange status ({} total records):", store.get_total_records()?);
    for status in store.get_exchange_status()? {
        let freshness = status
            .latest_funding_time
            .and_then(chrono::DateTime::from_timestamp_millis)
            .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_else(|| "never".to_string());
        info!(
            "  {}: {} symbols, {} records, latest {}",
            status.exchange, status.symbols, status.records, freshness
        );
    }
    if let Some(ts) = store.get_last_update_time()? {
        if let Some(dt) = chrono::DateTime::from_timestamp_millis(ts) {
            info!("  Last collection attempt: {}", dt.format("%Y-%m-%d %H:%M"));
        }
    }
    Ok(())
}

fn init_logging(log_dir: &str) -> Result<()> {
    use tracing_subscriber::fmt::writer::MakeWriterExt;

    std::fs::create_dir_all(log_dir)?;

    let file_appender = tracing_appender::rolling::daily(log_dir, "funding-matrix.log");
    let (file_writer, _guard) = tracing_appender::non_blocking(file_appender);

    // Leak the guard to keep it alive for the program duration
    Box::leak(Box::new(_guard));

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("funding_matrix=debug".parse()?)
                .add_directive(Level::INFO.into()),
        )
        .with_writer(std::io::stdout.and(file_writer))
        .with_target(true)
        .with_thread_ids(false)
        .with_ansi(true)
        .init();

    Ok(())
}
