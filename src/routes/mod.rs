//! HTTP routes for the ledger

pub mod health;
pub mod referral;
pub mod score;
pub mod user;
pub mod users;

pub use health::{health_check, root_check, version_info};
pub use referral::{
    handle_get_referral_count, handle_get_referral_stats, handle_process_referral,
    handle_update_referral_count,
};
pub use score::handle_update_score;
pub use user::{handle_get_user, handle_update_user};
pub use users::{handle_create_user, handle_list_users};

use bytes::Bytes;
use http_body_util::Full;
use hyper::{Response, StatusCode};
use serde::Serialize;

use crate::types::LedgerError;

pub type FullBody = Full<Bytes>;

// =============================================================================
// Response Helpers
// =============================================================================

pub fn json_response<T: Serialize>(status: StatusCode, body: &T) -> Response<FullBody> {
    let json = serde_json::to_string(body).unwrap_or_else(|_| "{}".to_string());
    Response::builder()
        .status(status)
        .header("Content-Type", "application/json")
        .header("Access-Control-Allow-Origin", "*")
        .body(Full::new(Bytes::from(json)))
        .unwrap()
}

/// Error body with a `message` field, matching what the game client expects.
pub fn message_response(status: StatusCode, message: &str) -> Response<FullBody> {
    json_response(status, &serde_json::json!({ "message": message }))
}

/// Map a ledger error onto the wire.
///
/// An already-settled referral is deliberately a 200 with `success: false`
/// so the client treats it as informational rather than a failure.
pub fn ledger_error_response(err: &LedgerError) -> Response<FullBody> {
    match err {
        LedgerError::Validation(msg) => message_response(StatusCode::BAD_REQUEST, msg),
        LedgerError::NotFound(msg) => message_response(StatusCode::NOT_FOUND, msg),
        LedgerError::AlreadySettled => json_response(
            StatusCode::OK,
            &serde_json::json!({
                "message": "This referral has already been processed",
                "success": false,
            }),
        ),
        LedgerError::Database(msg) => json_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            &serde_json::json!({
                "message": "Internal server error",
                "error": msg,
            }),
        ),
        LedgerError::Io(e) => json_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            &serde_json::json!({
                "message": "Internal server error",
                "error": e.to_string(),
            }),
        ),
    }
}
