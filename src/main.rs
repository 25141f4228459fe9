//! Hop Ledger - score & rank backend for the Hop Bunny web game

use clap::Parser;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use hop_ledger::{
    config::Args,
    db::mongo::MongoClient,
    db::store::{MemoryStore, MongoStore, ReferralStore, UserStore},
    server::{self, AppState},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file if present
    let _ = dotenvy::dotenv();

    // Parse command line arguments
    let args = Args::parse();

    // Initialize tracing/logging
    let log_level = args.log_level.clone();
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("hop_ledger={},info", log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Validate configuration
    if let Err(e) = args.validate() {
        error!("Configuration error: {}", e);
        std::process::exit(1);
    }

    // Print startup banner
    info!("======================================");
    info!("  Hop Ledger - Score & Rank Backend");
    info!("======================================");
    info!("Node ID: {}", args.node_id);
    info!("Listen: {}", args.listen);
    info!(
        "Mode: {}",
        if args.dev_mode {
            "DEVELOPMENT"
        } else {
            "PRODUCTION"
        }
    );
    info!("MongoDB: {}", args.mongodb_uri);
    info!("Rank cache TTL: {}s", args.rank_cache_ttl_secs);
    info!("Referral guard TTL: {}s", args.referral_guard_ttl_secs);
    info!("======================================");

    // Connect to MongoDB (optional in dev mode, falls back to memory)
    let (users, referrals, mongo_connected): (Arc<dyn UserStore>, Arc<dyn ReferralStore>, bool) =
        match MongoClient::new(&args.mongodb_uri, &args.mongodb_db).await {
            Ok(client) => {
                let store = Arc::new(MongoStore::new(&client).await?);
                info!("MongoDB connected successfully");
                (store.clone(), store, true)
            }
            Err(e) => {
                if args.dev_mode {
                    warn!("MongoDB connection failed (dev mode, using memory store): {}", e);
                    let store = Arc::new(MemoryStore::new());
                    (store.clone(), store, false)
                } else {
                    error!("MongoDB connection failed: {}", e);
                    std::process::exit(1);
                }
            }
        };

    let state = Arc::new(AppState::new(args, users, referrals, mongo_connected));

    // Warm the rank snapshot so the first score submission gets a real rank
    if state.rank.refresh().await {
        info!("Rank snapshot warmed");
    }

    server::run(state).await?;

    Ok(())
}
