//! # Ad Server Entry Point
//!
//! Loads configuration, builds the serving snapshot from the store and keeps
//! it fresh: scheduled refresh plus the frequency-cap day rollover.

use adengine::config::EngineConfig;
use adengine::frequency::FrequencyCapper;
use adengine::refresh::{RefreshScheduler, RefreshService};
use adengine::storage::{SqliteStore, WarmSnapshotFile};
use adengine::{AdDecisionEngine, SnapshotCache, TrackingUrlBuilder};
use clap::Parser;
use log::{error, info, warn};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "adserver")]
#[command(about = "Real-time ad decision engine", long_about = None)]
struct Args {
    /// JSON configuration file; ADENGINE_* variables override it
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let config = match EngineConfig::load(args.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            return Err(e.into());
        }
    };

    info!("Opening store at {}", config.database_path.display());
    let store = Arc::new(SqliteStore::open(&config.database_path)?);

    let cache = Arc::new(SnapshotCache::new());
    let mut service =
        RefreshService::new(Arc::clone(&cache), store).with_timeout(config.store_timeout());
    if let Some(path) = &config.warm_snapshot_path {
        service = service.with_warm_snapshot(WarmSnapshotFile::new(path));
    }
    let service = Arc::new(service);

    match service.initial_load() {
        Ok(stats) => info!(
            "Serving snapshot v{}: {} line items, {} ad units",
            stats.version, stats.line_items, stats.ad_units
        ),
        Err(e) => warn!(
            "Initial snapshot load failed, serving nothing until the next refresh: {}",
            e
        ),
    }

    let capper = Arc::new(FrequencyCapper::new());
    let engine = Arc::new(AdDecisionEngine::new(
        Arc::clone(&cache),
        Arc::clone(&capper),
        TrackingUrlBuilder::new(config.tracking_base_url.clone()),
    ));

    let scheduler = Arc::new(RefreshScheduler::new(
        Arc::clone(&service),
        config.scheduler(),
    ));
    let refresh_task = tokio::spawn(scheduler.start());
    let rollover_task = tokio::spawn(Arc::clone(&capper).spawn_rollover(config.rollover()));

    info!(
        "Ad server ready, tracking base {}",
        config.tracking_base_url
    );

    tokio::signal::ctrl_c().await?;

    refresh_task.abort();
    rollover_task.abort();

    let stats = engine.stats();
    info!(
        "Shutting down: {} requests, {} slots, {} filled ({:.1}% fill rate)",
        stats.requests,
        stats.slots,
        stats.filled,
        stats.fill_rate() * 100.0
    );

    Ok(())
}
