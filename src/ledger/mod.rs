//! Score and rank ledger core: rank cache, duplicate guard, score updates,
//! and referral settlement.

pub mod idempotency;
pub mod rank;
pub mod referral;
pub mod score;

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use crate::db::schemas::UserDoc;
    use crate::db::store::{MemoryStore, ReferralStore, UserStore};
    use crate::ledger::idempotency::IdempotencyGuard;
    use crate::ledger::rank::RankCache;
    use crate::ledger::referral::ReferralSettlement;
    use crate::ledger::score::{ScoreOutcome, ScoreUpdate, ScoreUpdateService};
    use crate::types::LedgerError;

    struct Harness {
        store: Arc<MemoryStore>,
        score: Arc<ScoreUpdateService>,
        settlement: ReferralSettlement,
    }

    async fn harness(user_ids: &[&str]) -> Harness {
        let store = Arc::new(MemoryStore::default());
        for id in user_ids {
            store
                .create_user(UserDoc::new(
                    id.to_string(),
                    format!("{}@example.com", id),
                    id.to_string(),
                    id.to_string(),
                ))
                .await
                .unwrap();
        }

        let rank = Arc::new(RankCache::new(store.clone(), Duration::from_secs(60)));
        let guard = Arc::new(IdempotencyGuard::with_defaults());
        let score = Arc::new(ScoreUpdateService::new(store.clone(), rank, guard));
        let settlement = ReferralSettlement::new(store.clone(), store.clone(), score.clone());

        Harness {
            store,
            score,
            settlement,
        }
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

    // Full player lifecycle: a game score, a signup referral, a retried
    // settlement, and a duplicate referral credit.
    #[tokio::test]
    async fn player_lifecycle() {
        let h = harness(&["veteran", "newcomer"]).await;

        // 1. The veteran finishes a game worth 250 points.
        let outcome = h.score.apply(game("veteran", 250)).await.unwrap();
        let ScoreOutcome::Game(result) = outcome else {
            panic!("expected game outcome");
        };
        assert_eq!(result.total_score, 250);
        assert_eq!(result.high_score, 250);
        assert_eq!(result.games_played, 1);

        // 2. The newcomer signed up through the veteran's link.
        let settled = h.settlement.settle("veteran", "newcomer").await.unwrap();
        assert_eq!(settled.referrer_bonus, 500);
        assert_eq!(settled.referred_bonus, 200);

        let veteran = h.store.get_user("veteran").await.unwrap().unwrap();
        assert_eq!(veteran.score, 750);
        assert_eq!(veteran.high_score, 250);
        assert_eq!(veteran.referral_count, 1);
        assert_eq!(veteran.games_played, 1);

        let newcomer = h.store.get_user("newcomer").await.unwrap().unwrap();
        assert_eq!(newcomer.score, 200);
        assert_eq!(newcomer.referral_count, 0);
        assert_eq!(newcomer.games_played, 0);

        // 3. The client retries the settlement; nothing moves.
        let err = h.settlement.settle("veteran", "newcomer").await.unwrap_err();
        assert!(matches!(err, LedgerError::AlreadySettled));

        let veteran = h.store.get_user("veteran").await.unwrap().unwrap();
        assert_eq!(veteran.score, 750);
        assert_eq!(veteran.referral_count, 1);

        let records = h.store.by_referrer("veteran").await.unwrap();
        assert_eq!(records.len(), 1);

        // 4. A direct referral credit retried with the same request id is
        //    absorbed by the guard.
        let credit = ScoreUpdate {
            user_id: "veteran".to_string(),
            delta: 500,
            is_referral: true,
            increment_referral_count: true,
            unique_request_id: Some("bonus-xyz".to_string()),
        };
        h.score.apply(credit.clone()).await.unwrap();
        let outcome = h.score.apply(credit).await.unwrap();
        assert!(matches!(outcome, ScoreOutcome::Duplicate));

        let veteran = h.store.get_user("veteran").await.unwrap().unwrap();
        assert_eq!(veteran.score, 1250);
        assert_eq!(veteran.referral_count, 2);
    }

    // Ranks follow high scores, dense over ties.
    #[tokio::test]
    async fn leaderboard_ranks_across_games() {
        let h = harness(&["a", "b", "c"]).await;

        h.score.apply(game("a", 500)).await.unwrap();
        h.score.apply(game("b", 500)).await.unwrap();
        h.score.apply(game("c", 300)).await.unwrap();

        let rank = Arc::new(RankCache::new(h.store.clone(), Duration::from_secs(60)));
        rank.refresh().await;

        assert_eq!(rank.exact_rank("a").await.unwrap(), Some(1));
        assert_eq!(rank.exact_rank("b").await.unwrap(), Some(1));
        assert_eq!(rank.exact_rank("c").await.unwrap(), Some(2));
    }
}
