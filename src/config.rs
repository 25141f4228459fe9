//! Configuration for the ledger service.
//!
//! CLI arguments and environment variable handling using clap.

use clap::Parser;
use std::net::SocketAddr;
use std::time::Duration;
use uuid::Uuid;

/// Hop Ledger - score & rank backend for the Hop Bunny web game
#[derive(Parser, Debug, Clone)]
#[command(name = "hop-ledger")]
#[command(about = "Score & rank ledger backend for the Hop Bunny web game")]
pub struct Args {
    /// Unique node identifier for this instance
    #[arg(long, env = "NODE_ID", default_value_t = Uuid::new_v4())]
    pub node_id: Uuid,

    /// Address to listen on
    #[arg(long, env = "LISTEN", default_value = "0.0.0.0:3000")]
    pub listen: SocketAddr,

    /// MongoDB connection URI
    #[arg(long, env = "MONGODB_URI", default_value = "mongodb://localhost:27017")]
    pub mongodb_uri: String,

    /// MongoDB database name
    #[arg(long, env = "MONGODB_DB", default_value = "hopbunny")]
    pub mongodb_db: String,

    /// Enable development mode (permissive auth, in-memory store fallback)
    #[arg(long, env = "DEV_MODE", default_value = "false")]
    pub dev_mode: bool,

    /// JWT secret for validating bearer tokens (required in production)
    #[arg(long, env = "JWT_SECRET")]
    pub jwt_secret: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Rank cache staleness window in seconds
    #[arg(long, env = "RANK_CACHE_TTL_SECS", default_value = "600")]
    pub rank_cache_ttl_secs: u64,

    /// Referral idempotency guard window in seconds
    #[arg(long, env = "REFERRAL_GUARD_TTL_SECS", default_value = "3600")]
    pub referral_guard_ttl_secs: u64,

    /// How often expired guard entries are swept, in seconds
    #[arg(long, env = "REFERRAL_GUARD_CLEANUP_SECS", default_value = "60")]
    pub referral_guard_cleanup_secs: u64,
}

impl Args {
    pub fn rank_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.rank_cache_ttl_secs)
    }

    pub fn referral_guard_ttl(&self) -> Duration {
        Duration::from_secs(self.referral_guard_ttl_secs)
    }

    pub fn referral_guard_cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.referral_guard_cleanup_secs)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if !self.dev_mode && self.jwt_secret.is_none() {
            return Err("JWT_SECRET is required in production mode".to_string());
        }

        if self.rank_cache_ttl_secs == 0 {
            return Err("RANK_CACHE_TTL_SECS must be greater than zero".to_string());
        }

        if self.referral_guard_ttl_secs == 0 {
            return Err("REFERRAL_GUARD_TTL_SECS must be greater than zero".to_string());
        }

        Ok(())
    }
}
