//! Health and version endpoints
//!
//! `/` keeps the legacy liveness message the game client polls for.
//! `/health` reports database mode and guard activity; `/version` returns
//! build information for deployment verification.

use hyper::{Response, StatusCode};
use serde::Serialize;
use std::sync::Arc;

use crate::routes::{json_response, FullBody};
use crate::server::AppState;

/// Health response body
#[derive(Serialize)]
pub struct HealthResponse {
    pub healthy: bool,
    pub status: &'static str,
    pub version: &'static str,
    /// Seconds since process start
    pub uptime: u64,
    pub timestamp: String,
    pub mode: String,
    #[serde(rename = "nodeId")]
    pub node_id: String,
    pub database: DatabaseHealth,
    #[serde(rename = "referralGuard")]
    pub referral_guard: GuardHealth,
}

#[derive(Serialize)]
pub struct DatabaseHealth {
    pub connected: bool,
    pub backend: &'static str,
}

#[derive(Serialize)]
pub struct GuardHealth {
    pub tracked: usize,
    pub duplicates: u64,
    pub admitted: u64,
}

/// Legacy liveness message at `/`
pub fn root_check() -> Response<FullBody> {
    json_response(
        StatusCode::OK,
        &serde_json::json!({ "message": "Hop Bunny API is running!" }),
    )
}

/// Handle health endpoint (/health)
pub fn health_check(state: &Arc<AppState>) -> Response<FullBody> {
    let guard_stats = state.guard.stats();

    let response = HealthResponse {
        healthy: true,
        status: "online",
        version: env!("CARGO_PKG_VERSION"),
        uptime: state.started_at.elapsed().as_secs(),
        timestamp: chrono::Utc::now().to_rfc3339(),
        mode: if state.args.dev_mode {
            "development".to_string()
        } else {
            "production".to_string()
        },
        node_id: state.args.node_id.to_string(),
        database: DatabaseHealth {
            connected: state.mongo_connected,
            backend: if state.mongo_connected {
                "mongodb"
            } else {
                "memory"
            },
        },
        referral_guard: GuardHealth {
            tracked: state.guard.len(),
            duplicates: guard_stats.duplicates,
            admitted: guard_stats.admitted,
        },
    };

    json_response(StatusCode::OK, &response)
}

/// Version information for deployment verification
#[derive(Serialize)]
pub struct VersionResponse {
    /// Cargo package version
    pub version: &'static str,
    /// Git commit hash (short)
    pub commit: &'static str,
    /// Git commit hash (full)
    pub commit_full: &'static str,
    /// Build timestamp
    pub build_time: &'static str,
    /// Service name
    pub service: &'static str,
}

/// Handle version endpoint (/version)
pub fn version_info() -> Response<FullBody> {
    let response = VersionResponse {
        version: env!("CARGO_PKG_VERSION"),
        commit: option_env!("GIT_COMMIT_SHORT").unwrap_or("unknown"),
        commit_full: option_env!("GIT_COMMIT_FULL").unwrap_or("unknown"),
        build_time: option_env!("BUILD_TIMESTAMP").unwrap_or("unknown"),
        service: "hop-ledger",
    };

    json_response(StatusCode::OK, &response)
}
