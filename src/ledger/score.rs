//! Score update service.
//!
//! All score mutations funnel through here. Updates for the same user are
//! serialized behind a per-user async lock so two concurrent submissions
//! cannot both read the same counters and lose one of the writes. Referral
//! updates additionally pass the idempotency guard before any state is read.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::db::store::{UserStore, UserUpdate};
use crate::ledger::idempotency::IdempotencyGuard;
use crate::ledger::rank::RankCache;
use crate::types::{LedgerError, Result};

/// A single score submission.
#[derive(Debug, Clone)]
pub struct ScoreUpdate {
    pub user_id: String,
    /// Points to add. A game submission is one game's score.
    pub delta: i64,
    /// Referral credits skip game counters and touch bonus counters instead
    pub is_referral: bool,
    /// Bump referral_count along with the credit (referrer side only)
    pub increment_referral_count: bool,
    pub unique_request_id: Option<String>,
}

/// Counters after a game score was applied.
#[derive(Debug, Clone)]
pub struct GameScoreResult {
    pub user_id: String,
    pub username: String,
    pub previous_score: i64,
    pub added_score: i64,
    pub total_score: i64,
    pub high_score: i64,
    pub games_played: i64,
    pub previous_games_played: i64,
    pub last_game_score: i64,
    pub referral_count: i64,
    pub rank: i64,
}

/// Counters after a referral credit was applied.
#[derive(Debug, Clone)]
pub struct ReferralCreditResult {
    pub user_id: String,
    pub username: String,
    pub previous_score: i64,
    pub added_score: i64,
    pub total_score: i64,
    pub previous_referral_count: i64,
    pub referral_count: i64,
    pub referral_bonus: i64,
    pub games_played: i64,
    pub rank: i64,
}

/// Outcome of a score submission.
#[derive(Debug, Clone)]
pub enum ScoreOutcome {
    /// Referral request already seen within the guard window, nothing applied
    Duplicate,
    Game(GameScoreResult),
    Referral(ReferralCreditResult),
}

/// Applies score submissions against the user store.
pub struct ScoreUpdateService {
    users: Arc<dyn UserStore>,
    rank: Arc<RankCache>,
    guard: Arc<IdempotencyGuard>,
    /// Per-user write locks
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl ScoreUpdateService {
    pub fn new(
        users: Arc<dyn UserStore>,
        rank: Arc<RankCache>,
        guard: Arc<IdempotencyGuard>,
    ) -> Self {
        Self {
            users,
            rank,
            guard,
            locks: DashMap::new(),
        }
    }

    fn user_lock(&self, user_id: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(user_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Apply a score submission.
    ///
    /// Referral submissions are checked against the idempotency guard before
    /// the user is loaded, so duplicates never touch the store.
    pub async fn apply(&self, update: ScoreUpdate) -> Result<ScoreOutcome> {
        if update.user_id.is_empty() {
            return Err(LedgerError::Validation("User ID is required".into()));
        }
        if update.delta < 0 {
            return Err(LedgerError::Validation("Score must not be negative".into()));
        }

        if update.is_referral {
            let key =
                IdempotencyGuard::request_key(&update.user_id, update.unique_request_id.as_deref());
            if self.guard.check_and_mark(&key) {
                info!(user_id = %update.user_id, key = %key, "Duplicate referral request blocked");
                return Ok(ScoreOutcome::Duplicate);
            }
        }

        let user_id = update.user_id.clone();
        let lock = self.user_lock(&user_id);
        let result = {
            let _held = lock.lock().await;

            match self.users.get_user(&update.user_id).await {
                Err(e) => Err(e),
                Ok(None) => Err(LedgerError::NotFound("User not found".into())),
                Ok(Some(user)) => {
                    if update.is_referral {
                        self.apply_referral_credit(user, update).await
                    } else {
                        self.apply_game_score(user, update).await
                    }
                }
            }
        };
        drop(lock);

        // Only the map's clone remains when no other task wants this user;
        // remove_if holds the shard lock, so a concurrent user_lock cannot
        // clone the entry out from under the check.
        self.locks
            .remove_if(&user_id, |_, v| Arc::strong_count(v) == 1);

        result
    }

    async fn apply_game_score(
        &self,
        user: crate::db::schemas::UserDoc,
        update: ScoreUpdate,
    ) -> Result<ScoreOutcome> {
        let previous_score = user.current_score();
        let previous_games_played = user.games_played;

        let total_score = previous_score + update.delta;
        let high_score = user.high_score.max(update.delta);
        let games_played = previous_games_played + 1;

        let rank = self.rank.rank_of(&user.user_id, high_score).await;

        self.users
            .update_user(
                &user.user_id,
                UserUpdate {
                    score: Some(total_score),
                    high_score: Some(high_score),
                    last_game_score: Some(update.delta),
                    games_played: Some(games_played),
                    rank: Some(rank),
                    ..Default::default()
                },
            )
            .await?;

        debug!(
            user_id = %user.user_id,
            added = update.delta,
            total = total_score,
            high = high_score,
            "Game score applied"
        );

        Ok(ScoreOutcome::Game(GameScoreResult {
            user_id: user.user_id,
            username: user.username,
            previous_score,
            added_score: update.delta,
            total_score,
            high_score,
            games_played,
            previous_games_played,
            last_game_score: update.delta,
            referral_count: user.referral_count,
            rank,
        }))
    }

    async fn apply_referral_credit(
        &self,
        user: crate::db::schemas::UserDoc,
        update: ScoreUpdate,
    ) -> Result<ScoreOutcome> {
        let previous_score = user.current_score();
        let previous_referral_count = user.referral_count;

        let total_score = previous_score + update.delta;
        let referral_bonus = user.referral_bonus + update.delta;
        let referral_count = if update.increment_referral_count {
            previous_referral_count + 1
        } else {
            previous_referral_count
        };

        self.users
            .update_user(
                &user.user_id,
                UserUpdate {
                    score: Some(total_score),
                    referral_bonus: Some(referral_bonus),
                    referral_count: Some(referral_count),
                    ..Default::default()
                },
            )
            .await?;

        info!(
            user_id = %user.user_id,
            added = update.delta,
            referral_count,
            "Referral credit applied"
        );

        Ok(ScoreOutcome::Referral(ReferralCreditResult {
            user_id: user.user_id,
            username: user.username,
            previous_score,
            added_score: update.delta,
            total_score,
            previous_referral_count,
            referral_count,
            referral_bonus,
            games_played: user.games_played,
            rank: user.rank,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::schemas::UserDoc;
    use crate::db::store::MemoryStore;
    use std::time::Duration;

    async fn service_with_user(user_id: &str) -> (Arc<MemoryStore>, ScoreUpdateService) {
        let store = Arc::new(MemoryStore::default());
        store
            .create_user(UserDoc::new(
                user_id.to_string(),
                format!("{}@example.com", user_id),
                user_id.to_string(),
                user_id.to_string(),
            ))
            .await
            .unwrap();

        let rank = Arc::new(RankCache::new(store.clone(), Duration::from_secs(60)));
        let guard = Arc::new(IdempotencyGuard::with_defaults());
        let service = ScoreUpdateService::new(store.clone(), rank, guard);
        (store, service)
    }

    fn game(user_id: &str, delta: i64) -> ScoreUpdate {
        ScoreUpdate {
            user_id: user_id.to_string(),
            delta,
            is_referral: false,
            increment_referral_count: false,
            unique_request_id: None,
        }
    }

    fn referral(user_id: &str, delta: i64, increment: bool, request_id: &str) -> ScoreUpdate {
        ScoreUpdate {
            user_id: user_id.to_string(),
            delta,
            is_referral: true,
            increment_referral_count: increment,
            unique_request_id: Some(request_id.to_string()),
        }
    }

    #[tokio::test]
    async fn game_score_updates_all_counters() {
        let (store, service) = service_with_user("u1").await;

        let outcome = service.apply(game("u1", 250)).await.unwrap();
        let ScoreOutcome::Game(result) = outcome else {
            panic!("expected game outcome");
        };

        assert_eq!(result.previous_score, 0);
        assert_eq!(result.added_score, 250);
        assert_eq!(result.total_score, 250);
        assert_eq!(result.high_score, 250);
        assert_eq!(result.games_played, 1);
        assert_eq!(result.last_game_score, 250);

        let user = store.get_user("u1").await.unwrap().unwrap();
        assert_eq!(user.score, 250);
        assert_eq!(user.high_score, 250);
        assert_eq!(user.games_played, 1);
    }

    #[tokio::test]
    async fn high_score_only_rises() {
        let (store, service) = service_with_user("u1").await;

        service.apply(game("u1", 300)).await.unwrap();
        let outcome = service.apply(game("u1", 100)).await.unwrap();
        let ScoreOutcome::Game(result) = outcome else {
            panic!("expected game outcome");
        };

        assert_eq!(result.total_score, 400);
        assert_eq!(result.high_score, 300);
        assert_eq!(result.last_game_score, 100);

        let user = store.get_user("u1").await.unwrap().unwrap();
        assert_eq!(user.high_score, 300);
    }

    #[tokio::test]
    async fn referral_credit_skips_game_counters() {
        let (store, service) = service_with_user("u1").await;

        let outcome = service.apply(referral("u1", 200, false, "req-1")).await.unwrap();
        let ScoreOutcome::Referral(result) = outcome else {
            panic!("expected referral outcome");
        };

        assert_eq!(result.total_score, 200);
        assert_eq!(result.referral_bonus, 200);
        assert_eq!(result.referral_count, 0);

        let user = store.get_user("u1").await.unwrap().unwrap();
        assert_eq!(user.score, 200);
        assert_eq!(user.games_played, 0);
        assert_eq!(user.high_score, 0);
        assert_eq!(user.last_game_score, 0);
    }

    #[tokio::test]
    async fn referral_credit_can_bump_count() {
        let (store, service) = service_with_user("u1").await;

        service.apply(referral("u1", 500, true, "req-1")).await.unwrap();

        let user = store.get_user("u1").await.unwrap().unwrap();
        assert_eq!(user.referral_count, 1);
        assert_eq!(user.referral_bonus, 500);
        assert_eq!(user.score, 500);
    }

    #[tokio::test]
    async fn duplicate_referral_request_blocked() {
        let (store, service) = service_with_user("u1").await;

        service.apply(referral("u1", 500, true, "req-1")).await.unwrap();
        let outcome = service.apply(referral("u1", 500, true, "req-1")).await.unwrap();
        assert!(matches!(outcome, ScoreOutcome::Duplicate));

        // Nothing applied the second time
        let user = store.get_user("u1").await.unwrap().unwrap();
        assert_eq!(user.score, 500);
        assert_eq!(user.referral_count, 1);
    }

    #[tokio::test]
    async fn missing_user_is_not_found() {
        let (_store, service) = service_with_user("u1").await;

        let err = service.apply(game("ghost", 100)).await.unwrap_err();
        assert!(matches!(err, LedgerError::NotFound(_)));
    }

    #[tokio::test]
    async fn negative_delta_rejected() {
        let (_store, service) = service_with_user("u1").await;

        let err = service.apply(game("u1", -5)).await.unwrap_err();
        assert!(matches!(err, LedgerError::Validation(_)));
    }

    #[tokio::test]
    async fn legacy_high_score_only_user_keeps_total() {
        let (store, service) = service_with_user("u1").await;
        store
            .update_user(
                "u1",
                UserUpdate {
                    high_score: Some(400),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        // score is still 0, so the running total falls back to high_score
        let outcome = service.apply(game("u1", 100)).await.unwrap();
        let ScoreOutcome::Game(result) = outcome else {
            panic!("expected game outcome");
        };

        assert_eq!(result.previous_score, 400);
        assert_eq!(result.total_score, 500);
        assert_eq!(result.high_score, 400);
    }

    #[tokio::test]
    async fn lock_map_drains_when_uncontended() {
        let (_store, service) = service_with_user("u1").await;

        service.apply(game("u1", 100)).await.unwrap();
        service.apply(game("u1", 50)).await.unwrap();
        assert!(service.locks.is_empty());

        // Error paths release the entry too
        service.apply(game("ghost", 10)).await.unwrap_err();
        assert!(service.locks.is_empty());
    }

    #[tokio::test]
    async fn concurrent_updates_serialize_per_user() {
        let (store, service) = service_with_user("u1").await;
        let service = Arc::new(service);

        let mut handles = Vec::new();
        for _ in 0..10 {
            let svc = Arc::clone(&service);
            handles.push(tokio::spawn(async move {
                svc.apply(game("u1", 10)).await.unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let user = store.get_user("u1").await.unwrap().unwrap();
        assert_eq!(user.score, 100);
        assert_eq!(user.games_played, 10);
    }
}
