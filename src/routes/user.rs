//! Single-user endpoints: profile fetch and authenticated display-field update

use http_body_util::BodyExt;
use hyper::body::Incoming;
use hyper::{Request, Response, StatusCode};
use serde::Deserialize;
use std::sync::Arc;
use tracing::warn;

use crate::auth::{extract_token_from_header, JwtValidator};
use crate::db::schemas::RANK_UNRANKED;
use crate::db::store::UserUpdate;
use crate::routes::users::UserSummary;
use crate::routes::{json_response, ledger_error_response, message_response, FullBody};
use crate::server::AppState;

/// GET /api/user/:userId
pub async fn handle_get_user(state: Arc<AppState>, user_id: &str) -> Response<FullBody> {
    let mut user = match state.users.get_user(user_id).await {
        Ok(Some(u)) => u,
        Ok(None) => return message_response(StatusCode::NOT_FOUND, "User not found in database"),
        Err(e) => return ledger_error_response(&e),
    };

    // A stored 999 means the rank was never computed. Resolve it now and
    // persist so the next read is cheap.
    if user.rank == RANK_UNRANKED {
        match state.rank.exact_rank(user_id).await {
            Ok(Some(rank)) => {
                user.rank = rank;
                if let Err(e) = state
                    .users
                    .update_user(
                        user_id,
                        UserUpdate {
                            rank: Some(rank),
                            ..Default::default()
                        },
                    )
                    .await
                {
                    warn!(user_id = %user_id, "Failed to persist on-demand rank: {}", e);
                }
            }
            Ok(None) => {}
            Err(e) => warn!(user_id = %user_id, "Rank lookup failed: {}", e),
        }
    }

    let mut body = serde_json::to_value(UserSummary::from_doc(&user)).unwrap_or_default();
    if let Some(map) = body.as_object_mut() {
        map.insert("referralBonus".into(), user.referral_bonus.into());
    }

    json_response(StatusCode::OK, &body)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpdateUserRequest {
    #[serde(default)]
    display_name: Option<String>,
    #[serde(default)]
    username: Option<String>,
}

/// PUT /api/user/:userId
///
/// The bearer token's subject must match the path. Only display fields are
/// writable here; counters belong to the score service.
pub async fn handle_update_user(
    state: Arc<AppState>,
    user_id: &str,
    req: Request<Incoming>,
) -> Response<FullBody> {
    let validator = if state.args.dev_mode {
        JwtValidator::new_dev()
    } else {
        match &state.args.jwt_secret {
            Some(secret) => JwtValidator::new(secret),
            None => {
                return message_response(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "JWT secret not configured",
                )
            }
        }
    };

    let auth_header = req
        .headers()
        .get(hyper::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok());

    let token = match extract_token_from_header(auth_header) {
        Some(t) => t,
        None => return message_response(StatusCode::UNAUTHORIZED, "Authorization token required"),
    };

    let claims = match validator.verify(token) {
        Ok(c) => c,
        Err(_) => return message_response(StatusCode::UNAUTHORIZED, "Invalid or expired token"),
    };

    if claims.sub != user_id {
        return message_response(
            StatusCode::FORBIDDEN,
            "Forbidden: Cannot update other user data",
        );
    }

    let body_bytes = match req.into_body().collect().await {
        Ok(b) => b.to_bytes(),
        Err(_) => return message_response(StatusCode::BAD_REQUEST, "Invalid request body"),
    };

    let request: UpdateUserRequest = match serde_json::from_slice(&body_bytes) {
        Ok(r) => r,
        Err(_) => return message_response(StatusCode::BAD_REQUEST, "Invalid request body"),
    };

    let update = UserUpdate {
        display_name: request.display_name.filter(|d| !d.is_empty()),
        username: request.username.filter(|u| !u.is_empty()),
        ..Default::default()
    };

    if update.display_name.is_none() && update.username.is_none() {
        return message_response(StatusCode::BAD_REQUEST, "No valid fields to update");
    }

    match state.users.update_user(user_id, update).await {
        Ok(()) => json_response(
            StatusCode::OK,
            &serde_json::json!({ "message": "User updated successfully" }),
        ),
        Err(e) => ledger_error_response(&e),
    }
}
