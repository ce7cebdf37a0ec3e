//! # Ad Console CLI
//!
//! Operator tool for inspecting the store and trying out decisions.
//!
//! Usage:
//!   ad_console decide --request <file> [--user <id>]
//!   ad_console snapshot
//!   ad_console events [--limit N]

use adengine::config::EngineConfig;
use adengine::frequency::FrequencyCapper;
use adengine::storage::{AdminStore, SqliteStore};
use adengine::types::AdRequest;
use adengine::{AdDecisionEngine, RequestContext, SnapshotCache, TrackingUrlBuilder};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "ad_console")]
#[command(about = "Inspect ad server state and run test decisions", long_about = None)]
struct Cli {
    /// JSON configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Database path, overrides the configuration
    #[arg(long)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one ad request against the current store contents
    Decide {
        /// File holding the JSON ad request
        #[arg(short, long)]
        request: PathBuf,

        /// User id used when the request has none
        #[arg(short, long)]
        user: Option<String>,
    },

    /// Show what a snapshot built from the store would contain
    Snapshot,

    /// Show recent tracking events
    Events {
        /// Maximum number of events to show
        #[arg(short, long, default_value_t = 20)]
        limit: usize,
    },
}

fn main() -> Result<(), String> {
    let cli = Cli::parse();

    let config = EngineConfig::load(cli.config.as_deref()).map_err(|e| e.to_string())?;
    let db_path = cli.db.unwrap_or(config.database_path.clone());
    let store = Arc::new(SqliteStore::open(&db_path).map_err(|e| e.to_string())?);
    let ctx = RequestContext::with_timeout(config.store_timeout());

    match cli.command {
        Commands::Decide { request, user } => {
            let raw = std::fs::read_to_string(&request)
                .map_err(|e| format!("cannot read {}: {}", request.display(), e))?;
            let req: AdRequest = serde_json::from_str(&raw)
                .map_err(|e| format!("invalid request {}: {}", request.display(), e))?;

            let cache = Arc::new(SnapshotCache::new());
            cache
                .load(store.as_ref(), &ctx)
                .map_err(|e| e.to_string())?;
            let engine = AdDecisionEngine::new(
                cache,
                Arc::new(FrequencyCapper::new()),
                TrackingUrlBuilder::new(config.tracking_base_url.clone()),
            );

            let response = engine
                .get_ads(&req, user.as_deref())
                .map_err(|e| e.to_string())?;

            println!(
                "🎯 {} of {} slots filled\n",
                response.ads.len(),
                req.slots.len()
            );
            println!(
                "{}",
                serde_json::to_string_pretty(&response).map_err(|e| e.to_string())?
            );
        }

        Commands::Snapshot => {
            let cache = SnapshotCache::new();
            let load = cache
                .load(store.as_ref(), &ctx)
                .map_err(|e| e.to_string())?;
            let stats = cache.stats();

            println!("📊 Snapshot from {}\n", db_path.display());
            println!("Line items:      {}", stats.line_items);
            println!("Creatives:       {}", stats.creatives);
            println!("Targeting rules: {}", stats.targeting_rules);
            println!("Ad units:        {}", stats.ad_units);
            println!("Load time:       {} ms", load.duration_ms);
            println!();

            for li in cache.snapshot().line_items() {
                println!(
                    "  - {:<30} (id: {}, priority: {}, weight: {}, sov: {}%, cap: {})",
                    li.name,
                    li.id,
                    li.priority,
                    li.effective_weight(),
                    li.sov_percentage,
                    li.frequency_cap
                );
            }
        }

        Commands::Events { limit } => {
            let events = store
                .recent_events(&ctx, limit)
                .map_err(|e| e.to_string())?;

            println!("📋 Recent {} tracking events:\n", events.len());
            for event in events {
                println!(
                    "{} | {:<10} | li {} | c {} | user {} | {} {}",
                    event.created_at,
                    event.event_type.as_str(),
                    event.line_item_id,
                    event.creative_id,
                    event.user_id,
                    event.country,
                    event.ad_unit
                );
            }
        }
    }

    Ok(())
}
