//! Referral endpoints: settlement, stats, and count maintenance

use http_body_util::BodyExt;
use hyper::body::Incoming;
use hyper::{Request, Response, StatusCode};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::db::schemas::ReferralDoc;
use crate::db::store::UserUpdate;
use crate::routes::{json_response, ledger_error_response, message_response, FullBody};
use crate::server::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProcessReferralRequest {
    #[serde(default)]
    referrer_id: Option<String>,
    #[serde(default)]
    referred_id: Option<String>,
}

/// One settled referral as returned by the stats endpoint.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ReferralRecordView {
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<String>,
    referrer_id: String,
    referred_id: String,
    referrer_username: String,
    referred_username: String,
    referrer_bonus: i64,
    referred_bonus: i64,
    status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    processed_at: Option<String>,
}

impl ReferralRecordView {
    fn from_doc(doc: &ReferralDoc) -> Self {
        Self {
            id: doc._id.map(|id| id.to_hex()),
            referrer_id: doc.referrer_id.clone(),
            referred_id: doc.referred_id.clone(),
            referrer_username: doc.referrer_username.clone(),
            referred_username: doc.referred_username.clone(),
            referrer_bonus: doc.referrer_bonus,
            referred_bonus: doc.referred_bonus,
            status: doc.status.clone(),
            processed_at: doc
                .metadata
                .created_at
                .and_then(|d| d.try_to_rfc3339_string().ok()),
        }
    }
}

/// POST /api/referral and POST /api/referral/process-signup-referral
pub async fn handle_process_referral(
    state: Arc<AppState>,
    req: Request<Incoming>,
) -> Response<FullBody> {
    let body_bytes = match req.into_body().collect().await {
        Ok(b) => b.to_bytes(),
        Err(_) => return message_response(StatusCode::BAD_REQUEST, "Invalid request body"),
    };

    let request: ProcessReferralRequest = match serde_json::from_slice(&body_bytes) {
        Ok(r) => r,
        Err(_) => {
            return message_response(
                StatusCode::BAD_REQUEST,
                "Both referrer and referred user IDs are required",
            )
        }
    };

    let (referrer_id, referred_id) = match (request.referrer_id, request.referred_id) {
        (Some(a), Some(b)) if !a.is_empty() && !b.is_empty() => (a, b),
        _ => {
            return message_response(
                StatusCode::BAD_REQUEST,
                "Both referrer and referred user IDs are required",
            )
        }
    };

    match state.settlement.settle(&referrer_id, &referred_id).await {
        Ok(result) => json_response(
            StatusCode::OK,
            &serde_json::json!({
                "message": "Referral processed successfully",
                "referrerBonus": result.referrer_bonus,
                "referredBonus": result.referred_bonus,
            }),
        ),
        Err(e) => ledger_error_response(&e),
    }
}

/// GET /api/referral/stats/:userId
pub async fn handle_get_referral_stats(
    state: Arc<AppState>,
    user_id: &str,
) -> Response<FullBody> {
    match state.settlement.summary(user_id).await {
        Ok(summary) => {
            let referrals: Vec<ReferralRecordView> = summary
                .records
                .iter()
                .map(ReferralRecordView::from_doc)
                .collect();
            json_response(
                StatusCode::OK,
                &serde_json::json!({
                    "referralCount": summary.referral_count,
                    "referralBonus": summary.referral_bonus,
                    "referrals": referrals,
                }),
            )
        }
        Err(e) => ledger_error_response(&e),
    }
}

/// GET /api/referral/count/:userId
pub async fn handle_get_referral_count(
    state: Arc<AppState>,
    user_id: &str,
) -> Response<FullBody> {
    match state.users.get_user(user_id).await {
        Ok(Some(user)) => json_response(
            StatusCode::OK,
            &serde_json::json!({
                "userId": user.user_id,
                "referralCount": user.referral_count,
            }),
        ),
        Ok(None) => message_response(StatusCode::NOT_FOUND, "User not found in database"),
        Err(e) => ledger_error_response(&e),
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpdateCountRequest {
    #[serde(default)]
    user_id: Option<String>,
    #[serde(default)]
    referral_count: Option<serde_json::Value>,
}

/// POST /api/referral/update-count
///
/// Admin backfill for documents written before referral counts existed.
pub async fn handle_update_referral_count(
    state: Arc<AppState>,
    req: Request<Incoming>,
) -> Response<FullBody> {
    let body_bytes = match req.into_body().collect().await {
        Ok(b) => b.to_bytes(),
        Err(_) => return message_response(StatusCode::BAD_REQUEST, "Invalid request body"),
    };

    let request: UpdateCountRequest = match serde_json::from_slice(&body_bytes) {
        Ok(r) => r,
        Err(_) => return message_response(StatusCode::BAD_REQUEST, "User ID is required"),
    };

    let user_id = match request.user_id.filter(|id| !id.is_empty()) {
        Some(id) => id,
        None => return message_response(StatusCode::BAD_REQUEST, "User ID is required"),
    };

    let raw_count = match &request.referral_count {
        Some(v) if !v.is_null() => v,
        _ => return message_response(StatusCode::BAD_REQUEST, "Referral count is required"),
    };

    let count = match raw_count {
        serde_json::Value::Number(n) => n.as_i64(),
        serde_json::Value::String(s) => s.trim().parse().ok(),
        _ => None,
    };
    let count = match count {
        Some(c) => c,
        None => {
            return message_response(StatusCode::BAD_REQUEST, "Referral count must be a number")
        }
    };

    match state
        .users
        .update_user(
            &user_id,
            UserUpdate {
                referral_count: Some(count),
                ..Default::default()
            },
        )
        .await
    {
        Ok(()) => json_response(
            StatusCode::OK,
            &serde_json::json!({
                "message": "Referral count updated successfully",
                "userId": user_id,
                "referralCount": count,
            }),
        ),
        Err(e) => ledger_error_response(&e),
    }
}
