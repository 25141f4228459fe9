//! HTTP server implementation
//!
//! Uses hyper http1 with TokioIo for async handling. Routing is a plain
//! match over method and path.

use bytes::Bytes;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

use crate::config::Args;
use crate::db::store::{ReferralStore, UserStore};
use crate::ledger::idempotency::{GuardConfig, IdempotencyGuard};
use crate::ledger::rank::RankCache;
use crate::ledger::referral::ReferralSettlement;
use crate::ledger::score::ScoreUpdateService;
use crate::routes;
use crate::routes::FullBody;
use crate::types::LedgerError;

/// Shared application state
pub struct AppState {
    pub args: Args,
    pub users: Arc<dyn UserStore>,
    pub referrals: Arc<dyn ReferralStore>,
    pub rank: Arc<RankCache>,
    pub guard: Arc<IdempotencyGuard>,
    pub score: Arc<ScoreUpdateService>,
    pub settlement: Arc<ReferralSettlement>,
    pub mongo_connected: bool,
    pub started_at: Instant,
}

impl AppState {
    /// Wire the ledger services onto the given stores.
    pub fn new(
        args: Args,
        users: Arc<dyn UserStore>,
        referrals: Arc<dyn ReferralStore>,
        mongo_connected: bool,
    ) -> Self {
        let rank = Arc::new(RankCache::new(Arc::clone(&users), args.rank_cache_ttl()));
        let guard = Arc::new(IdempotencyGuard::new(GuardConfig {
            ttl: args.referral_guard_ttl(),
            cleanup_interval: args.referral_guard_cleanup_interval(),
            ..Default::default()
        }));
        let score = Arc::new(ScoreUpdateService::new(
            Arc::clone(&users),
            Arc::clone(&rank),
            Arc::clone(&guard),
        ));
        let settlement = Arc::new(ReferralSettlement::new(
            Arc::clone(&users),
            Arc::clone(&referrals),
            Arc::clone(&score),
        ));

        Self {
            args,
            users,
            referrals,
            rank,
            guard,
            score,
            settlement,
            mongo_connected,
            started_at: Instant::now(),
        }
    }
}

/// Start the HTTP server
pub async fn run(state: Arc<AppState>) -> Result<(), LedgerError> {
    let listener = TcpListener::bind(state.args.listen).await?;

    info!(
        "Ledger listening on {} as node {}",
        state.args.listen, state.args.node_id
    );

    if state.args.dev_mode {
        warn!("Development mode enabled - token signatures are not verified");
    }

    let _cleanup = state.guard.spawn_cleanup_task();

    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                let state = Arc::clone(&state);
                tokio::spawn(async move {
                    let io = TokioIo::new(stream);

                    let service = service_fn(move |req| {
                        let state = Arc::clone(&state);
                        async move { handle_request(state, req).await }
                    });

                    if let Err(err) = http1::Builder::new()
                        .preserve_header_case(true)
                        .title_case_headers(true)
                        .serve_connection(io, service)
                        .await
                    {
                        error!("Error serving connection from {}: {:?}", addr, err);
                    }
                });
            }
            Err(e) => {
                error!("Error accepting connection: {:?}", e);
            }
        }
    }
}

/// Route incoming HTTP requests
async fn handle_request(
    state: Arc<AppState>,
    req: Request<Incoming>,
) -> Result<Response<FullBody>, hyper::Error> {
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    let response = match (method, path.as_str()) {
        (Method::GET, "/") => routes::root_check(),
        (Method::GET, "/health") | (Method::GET, "/healthz") => routes::health_check(&state),
        (Method::GET, "/version") => routes::version_info(),

        // CORS preflight
        (Method::OPTIONS, _) => preflight_response(),

        (Method::POST, "/api/users") => routes::handle_create_user(state, req).await,
        (Method::GET, "/api/users") => routes::handle_list_users(state, req).await,

        (Method::GET, p) if p.starts_with("/api/user/") => {
            let user_id = decode_segment(&p["/api/user/".len()..]);
            routes::handle_get_user(state, &user_id).await
        }
        (Method::PUT, p) if p.starts_with("/api/user/") => {
            let user_id = decode_segment(&p["/api/user/".len()..]);
            routes::handle_update_user(state, &user_id, req).await
        }

        (Method::POST, "/api/update-score") => routes::handle_update_score(state, req).await,

        (Method::POST, "/api/referral")
        | (Method::POST, "/api/referral/process-signup-referral") => {
            routes::handle_process_referral(state, req).await
        }
        (Method::POST, "/api/referral/update-count") => {
            routes::handle_update_referral_count(state, req).await
        }
        (Method::GET, p) if p.starts_with("/api/referral/stats/") => {
            let user_id = decode_segment(&p["/api/referral/stats/".len()..]);
            routes::handle_get_referral_stats(state, &user_id).await
        }
        (Method::GET, p) if p.starts_with("/api/referral/count/") => {
            let user_id = decode_segment(&p["/api/referral/count/".len()..]);
            routes::handle_get_referral_count(state, &user_id).await
        }

        _ => not_found_response(&path),
    };

    Ok(response)
}

fn decode_segment(raw: &str) -> String {
    urlencoding::decode(raw)
        .map(|s| s.into_owned())
        .unwrap_or_else(|_| raw.to_string())
}

/// CORS preflight response
fn preflight_response() -> Response<FullBody> {
    Response::builder()
        .status(StatusCode::OK)
        .header("Access-Control-Allow-Origin", "*")
        .header("Access-Control-Allow-Headers", "*")
        .header("Access-Control-Allow-Methods", "GET, POST, PUT, OPTIONS")
        .body(Full::new(Bytes::new()))
        .unwrap()
}

/// Not found response
fn not_found_response(path: &str) -> Response<FullBody> {
    let body = serde_json::json!({
        "message": "Not Found",
        "path": path,
    });

    Response::builder()
        .status(StatusCode::NOT_FOUND)
        .header("Content-Type", "application/json")
        .header("Access-Control-Allow-Origin", "*")
        .body(Full::new(Bytes::from(body.to_string())))
        .unwrap()
}
