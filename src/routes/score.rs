//! POST /api/update-score
//!
//! Single entry point for both game scores and referral credits. The legacy
//! client sometimes sends the score as a string, so the field is accepted as
//! either and coerced.

use http_body_util::BodyExt;
use hyper::body::Incoming;
use hyper::{Request, Response, StatusCode};
use serde::Deserialize;
use std::sync::Arc;
use tracing::info;

use crate::ledger::score::{ScoreOutcome, ScoreUpdate};
use crate::routes::{json_response, ledger_error_response, message_response, FullBody};
use crate::server::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpdateScoreRequest {
    #[serde(default)]
    user_id: Option<String>,
    /// Number or numeric string
    #[serde(default)]
    score: Option<serde_json::Value>,
    #[serde(default)]
    is_referral: bool,
    #[serde(default)]
    increment_referral_count: bool,
    #[serde(default)]
    unique_request_id: Option<String>,
}

fn coerce_score(value: &serde_json::Value) -> Option<i64> {
    match value {
        serde_json::Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f.trunc() as i64)),
        serde_json::Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// POST /api/update-score
pub async fn handle_update_score(
    state: Arc<AppState>,
    req: Request<Incoming>,
) -> Response<FullBody> {
    let body_bytes = match req.into_body().collect().await {
        Ok(b) => b.to_bytes(),
        Err(_) => return message_response(StatusCode::BAD_REQUEST, "Invalid request body"),
    };

    let request: UpdateScoreRequest = match serde_json::from_slice(&body_bytes) {
        Ok(r) => r,
        Err(_) => {
            return message_response(StatusCode::BAD_REQUEST, "User ID and score are required")
        }
    };

    let user_id = match request.user_id.filter(|id| !id.is_empty()) {
        Some(id) => id,
        None => return message_response(StatusCode::BAD_REQUEST, "User ID and score are required"),
    };

    let raw_score = match &request.score {
        Some(v) if !v.is_null() => v,
        _ => return message_response(StatusCode::BAD_REQUEST, "User ID and score are required"),
    };

    let delta = match coerce_score(raw_score) {
        Some(n) => n,
        None => return message_response(StatusCode::BAD_REQUEST, "Score must be a number"),
    };

    info!(
        user_id = %user_id,
        score = delta,
        is_referral = request.is_referral,
        increment = request.increment_referral_count,
        "Score update received"
    );

    let outcome = state
        .score
        .apply(ScoreUpdate {
            user_id,
            delta,
            is_referral: request.is_referral,
            increment_referral_count: request.increment_referral_count,
            unique_request_id: request.unique_request_id,
        })
        .await;

    match outcome {
        Ok(ScoreOutcome::Duplicate) => json_response(
            StatusCode::OK,
            &serde_json::json!({
                "message": "Duplicate referral request detected and prevented",
                "isDuplicate": true,
            }),
        ),
        Ok(ScoreOutcome::Game(result)) => json_response(
            StatusCode::OK,
            &serde_json::json!({
                "message": "Score updated successfully",
                "previousScore": result.previous_score,
                "addedScore": result.added_score,
                "totalScore": result.total_score,
                "highestSingleGameScore": result.high_score,
                "gamesPlayed": result.games_played,
                "previousGamesPlayed": result.previous_games_played,
                "lastGameScore": result.last_game_score,
                "referralCount": result.referral_count,
                "rank": result.rank,
            }),
        ),
        Ok(ScoreOutcome::Referral(result)) => json_response(
            StatusCode::OK,
            &serde_json::json!({
                "message": "Referral bonus added successfully",
                "previousScore": result.previous_score,
                "addedScore": result.added_score,
                "totalScore": result.total_score,
                "previousReferralCount": result.previous_referral_count,
                "referralCount": result.referral_count,
                "highestSingleGameScore": 0,
                "gamesPlayed": result.games_played,
                "previousGamesPlayed": result.games_played,
                "lastGameScore": 0,
                "rank": result.rank,
            }),
        ),
        Err(e) => ledger_error_response(&e),
    }
}
