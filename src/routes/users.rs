//! User collection endpoints: registration and the paginated leaderboard list

use http_body_util::BodyExt;
use hyper::body::Incoming;
use hyper::{Request, Response, StatusCode};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::db::schemas::UserDoc;
use crate::db::store::{ListQuery, UserSortField, UserUpdate};
use crate::ledger::rank::dense_ranks;
use crate::routes::{json_response, ledger_error_response, message_response, FullBody};
use crate::server::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateUserRequest {
    user_id: String,
    email: String,
    username: String,
    #[serde(default)]
    display_name: Option<String>,
}

/// One user as the game client sees it.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserSummary {
    pub uid: String,
    pub email: String,
    pub username: String,
    pub display_name: String,
    /// Running total, falling back to high score for legacy documents
    pub score: i64,
    pub high_score: i64,
    pub last_game_score: i64,
    pub games_played: i64,
    pub rank: i64,
    pub referral_count: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
}

impl UserSummary {
    pub fn from_doc(user: &UserDoc) -> Self {
        Self {
            uid: user.user_id.clone(),
            email: user.email.clone(),
            username: user.username.clone(),
            display_name: user.display_name.clone(),
            score: user.current_score(),
            high_score: user.high_score,
            last_game_score: user.last_game_score,
            games_played: user.games_played,
            rank: user.rank,
            referral_count: user.referral_count,
            created_at: user
                .metadata
                .created_at
                .and_then(|d| d.try_to_rfc3339_string().ok()),
        }
    }
}

#[derive(Serialize)]
struct Pagination {
    total: u64,
    limit: i64,
    offset: u64,
    #[serde(rename = "hasMore")]
    has_more: bool,
}

#[derive(Serialize)]
struct ListUsersResponse {
    users: Vec<UserSummary>,
    pagination: Pagination,
}

/// Query parameters for listing users
#[derive(Debug)]
pub struct ListUsersQuery {
    pub limit: i64,
    pub offset: u64,
    pub sort_by: UserSortField,
    pub sort_dir: String,
    pub username: Option<String>,
}

impl ListUsersQuery {
    fn from_query_string(query: Option<&str>) -> Self {
        let mut params = Self {
            limit: 10,
            offset: 0,
            sort_by: UserSortField::HighScore,
            sort_dir: "desc".to_string(),
            username: None,
        };

        if let Some(q) = query {
            for pair in q.split('&') {
                if let Some((key, value)) = pair.split_once('=') {
                    let value = urlencoding::decode(value).unwrap_or_default();
                    match key {
                        "limit" => params.limit = value.parse().unwrap_or(10),
                        "offset" => params.offset = value.parse().unwrap_or(0),
                        "sortBy" | "sort_by" => {
                            params.sort_by = match value.as_ref() {
                                "score" => UserSortField::Score,
                                "username" => UserSortField::Username,
                                "gamesPlayed" | "games_played" => UserSortField::GamesPlayed,
                                "referralCount" | "referral_count" => UserSortField::ReferralCount,
                                _ => UserSortField::HighScore,
                            }
                        }
                        "sortDir" | "sort_dir" => params.sort_dir = value.to_string(),
                        "username" => params.username = Some(value.to_string()),
                        _ => {}
                    }
                }
            }
        }

        params
    }

    fn descending(&self) -> bool {
        self.sort_dir != "asc"
    }
}

/// POST /api/users
pub async fn handle_create_user(
    state: Arc<AppState>,
    req: Request<Incoming>,
) -> Response<FullBody> {
    let body_bytes = match req.into_body().collect().await {
        Ok(b) => b.to_bytes(),
        Err(_) => return message_response(StatusCode::BAD_REQUEST, "Invalid request body"),
    };

    let request: CreateUserRequest = match serde_json::from_slice(&body_bytes) {
        Ok(r) => r,
        Err(_) => {
            return message_response(
                StatusCode::BAD_REQUEST,
                "User ID, email, and username are required",
            )
        }
    };

    if request.user_id.is_empty() || request.email.is_empty() || request.username.is_empty() {
        return message_response(
            StatusCode::BAD_REQUEST,
            "User ID, email, and username are required",
        );
    }

    let display_name = request
        .display_name
        .filter(|d| !d.is_empty())
        .unwrap_or_else(|| request.username.clone());

    let user = UserDoc::new(request.user_id, request.email, request.username, display_name);

    match state.users.create_user(user).await {
        Ok(created) => {
            debug!(user_id = %created.user_id, "User created");
            json_response(
                StatusCode::CREATED,
                &serde_json::json!({
                    "message": "User created successfully",
                    "user": UserSummary::from_doc(&created),
                }),
            )
        }
        Err(e) => ledger_error_response(&e),
    }
}

/// GET /api/users
pub async fn handle_list_users(
    state: Arc<AppState>,
    req: Request<Incoming>,
) -> Response<FullBody> {
    let params = ListUsersQuery::from_query_string(req.uri().query());

    let query = ListQuery {
        limit: params.limit,
        offset: params.offset,
        sort_by: params.sort_by,
        descending: params.descending(),
        username: params.username.clone(),
    };

    let (users, total) = match state.users.list_users(query).await {
        Ok(result) => result,
        Err(e) => return ledger_error_response(&e),
    };

    let mut summaries: Vec<UserSummary> = users.iter().map(UserSummary::from_doc).collect();

    // A leaderboard page gets dense ranks over the returned slice; the
    // corrected ranks are persisted back without blocking the response.
    if params.sort_by == UserSortField::HighScore && params.descending() && params.offset == 0 {
        let sorted: Vec<(String, i64)> = users
            .iter()
            .map(|u| (u.user_id.clone(), u.high_score))
            .collect();
        let ranks = dense_ranks(&sorted);

        for (summary, entry) in summaries.iter_mut().zip(ranks.iter()) {
            summary.rank = entry.rank;
        }

        for (user, entry) in users.iter().zip(ranks.into_iter()) {
            if user.rank != entry.rank {
                let users_store = Arc::clone(&state.users);
                tokio::spawn(async move {
                    if let Err(e) = users_store
                        .update_user(
                            &entry.user_id,
                            UserUpdate {
                                rank: Some(entry.rank),
                                ..Default::default()
                            },
                        )
                        .await
                    {
                        warn!(user_id = %entry.user_id, "Failed to persist rank: {}", e);
                    }
                });
            }
        }
    }

    let has_more = summaries.len() as u64 + params.offset < total;

    json_response(
        StatusCode::OK,
        &ListUsersResponse {
            users: summaries,
            pagination: Pagination {
                total,
                limit: params.limit,
                offset: params.offset,
                has_more,
            },
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::schemas::RANK_UNRANKED;

    #[test]
    fn unranked_sentinel_survives_serialization() {
        let user = UserDoc::new(
            "u1".into(),
            "u1@example.com".into(),
            "u1".into(),
            "u1".into(),
        );
        let summary = UserSummary::from_doc(&user);
        assert_eq!(summary.rank, RANK_UNRANKED);

        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["rank"], 999);
        assert_eq!(json["highScore"], 0);
        assert_eq!(json["referralCount"], 0);
    }

    #[test]
    fn query_parsing_maps_camel_case_sort() {
        let q = ListUsersQuery::from_query_string(Some(
            "limit=25&offset=50&sortBy=gamesPlayed&sortDir=asc&username=bun%20ny",
        ));
        assert_eq!(q.limit, 25);
        assert_eq!(q.offset, 50);
        assert_eq!(q.sort_by, UserSortField::GamesPlayed);
        assert!(!q.descending());
        assert_eq!(q.username.as_deref(), Some("bun ny"));
    }

    #[test]
    fn query_parsing_defaults() {
        let q = ListUsersQuery::from_query_string(None);
        assert_eq!(q.limit, 10);
        assert_eq!(q.offset, 0);
        assert_eq!(q.sort_by, UserSortField::HighScore);
        assert!(q.descending());
        assert!(q.username.is_none());
    }
}
