//! Referral settlement.
//!
//! A settlement credits the referrer and the referred user exactly once per
//! pair. The referral record is inserted first as a pending claim; the unique
//! index on (referrer_id, referred_id) makes that insert the atomic
//! decision point, so two racing settlements for the same pair cannot both
//! proceed. Credits are applied after the claim and the record is then marked
//! settled.

use std::sync::Arc;

use tracing::{info, warn};

use crate::db::schemas::ReferralDoc;
use crate::db::store::{ReferralStore, UserStore};
use crate::ledger::score::{ScoreOutcome, ScoreUpdate, ScoreUpdateService};
use crate::types::{LedgerError, Result};

/// Points the referrer earns per settled referral.
pub const REFERRER_BONUS: i64 = 500;

/// Points the referred user earns for signing up through a link.
pub const REFERRED_BONUS: i64 = 200;

/// Result of a completed settlement.
#[derive(Debug, Clone)]
pub struct SettlementResult {
    pub referrer_id: String,
    pub referred_id: String,
    pub referrer_bonus: i64,
    pub referred_bonus: i64,
    pub referrer_new_count: i64,
}

/// Aggregated referral figures for one user.
#[derive(Debug, Clone)]
pub struct ReferralSummary {
    pub user_id: String,
    pub referral_count: i64,
    pub referral_bonus: i64,
    pub records: Vec<ReferralDoc>,
}

/// Settles referral pairs and reports per-user referral stats.
pub struct ReferralSettlement {
    users: Arc<dyn UserStore>,
    referrals: Arc<dyn ReferralStore>,
    score: Arc<ScoreUpdateService>,
}

impl ReferralSettlement {
    pub fn new(
        users: Arc<dyn UserStore>,
        referrals: Arc<dyn ReferralStore>,
        score: Arc<ScoreUpdateService>,
    ) -> Self {
        Self {
            users,
            referrals,
            score,
        }
    }

    /// Settle a referral pair, crediting both sides.
    pub async fn settle(&self, referrer_id: &str, referred_id: &str) -> Result<SettlementResult> {
        if referrer_id.is_empty() || referred_id.is_empty() {
            return Err(LedgerError::Validation(
                "Both referrer and referred user IDs are required".into(),
            ));
        }
        if referrer_id == referred_id {
            return Err(LedgerError::Validation(
                "Users cannot refer themselves".into(),
            ));
        }

        let (referrer, referred) = tokio::join!(
            self.users.get_user(referrer_id),
            self.users.get_user(referred_id),
        );
        let referrer = referrer?
            .ok_or_else(|| LedgerError::NotFound("Referrer user not found".into()))?;
        let referred = referred?
            .ok_or_else(|| LedgerError::NotFound("Referred user not found".into()))?;

        // Fast path before attempting the claim
        if self
            .referrals
            .find_pair(referrer_id, referred_id)
            .await?
            .is_some()
        {
            return Err(LedgerError::AlreadySettled);
        }

        self.referrals
            .claim(ReferralDoc::pending(
                referrer_id.to_string(),
                referred_id.to_string(),
                referrer.username.clone(),
                referred.username.clone(),
                REFERRER_BONUS,
                REFERRED_BONUS,
            ))
            .await?;

        info!(
            referrer_id = %referrer_id,
            referred_id = %referred_id,
            "Referral claim recorded, applying credits"
        );

        let referrer_new_count = self.credit_referrer(referrer_id, referred_id).await?;
        self.credit_referred(referrer_id, referred_id).await?;

        self.referrals.mark_settled(referrer_id, referred_id).await?;

        info!(
            referrer_id = %referrer_id,
            referred_id = %referred_id,
            referrer_bonus = REFERRER_BONUS,
            referred_bonus = REFERRED_BONUS,
            "Referral settled"
        );

        Ok(SettlementResult {
            referrer_id: referrer_id.to_string(),
            referred_id: referred_id.to_string(),
            referrer_bonus: REFERRER_BONUS,
            referred_bonus: REFERRED_BONUS,
            referrer_new_count,
        })
    }

    /// Credit the referrer with the bonus and a count bump.
    ///
    /// The settlement-scoped request id keeps client retries of the same
    /// settlement from double-crediting through the score path.
    async fn credit_referrer(&self, referrer_id: &str, referred_id: &str) -> Result<i64> {
        let request_id = format!("settle-{}-{}", referrer_id, referred_id);
        let outcome = self
            .score
            .apply(ScoreUpdate {
                user_id: referrer_id.to_string(),
                delta: REFERRER_BONUS,
                is_referral: true,
                increment_referral_count: true,
                unique_request_id: Some(request_id),
            })
            .await?;

        match outcome {
            ScoreOutcome::Referral(result) => Ok(result.referral_count),
            ScoreOutcome::Duplicate => {
                // The credit already landed on a previous attempt
                warn!(
                    referrer_id = %referrer_id,
                    "Referrer credit already applied, continuing settlement"
                );
                let user = self
                    .users
                    .get_user(referrer_id)
                    .await?
                    .ok_or_else(|| LedgerError::NotFound("Referrer user not found".into()))?;
                Ok(user.referral_count)
            }
            ScoreOutcome::Game(_) => {
                Err(LedgerError::Database("Unexpected score outcome".into()))
            }
        }
    }

    async fn credit_referred(&self, referrer_id: &str, referred_id: &str) -> Result<()> {
        let request_id = format!("settle-credit-{}-{}", referrer_id, referred_id);
        let outcome = self
            .score
            .apply(ScoreUpdate {
                user_id: referred_id.to_string(),
                delta: REFERRED_BONUS,
                is_referral: true,
                increment_referral_count: false,
                unique_request_id: Some(request_id),
            })
            .await?;

        if matches!(outcome, ScoreOutcome::Duplicate) {
            warn!(
                referred_id = %referred_id,
                "Referred credit already applied, continuing settlement"
            );
        }
        Ok(())
    }

    /// Referral stats for one user, with their settlement records.
    pub async fn summary(&self, user_id: &str) -> Result<ReferralSummary> {
        let user = self
            .users
            .get_user(user_id)
            .await?
            .ok_or_else(|| LedgerError::NotFound("User not found".into()))?;

        let records = self.referrals.by_referrer(user_id).await?;

        Ok(ReferralSummary {
            user_id: user.user_id,
            referral_count: user.referral_count,
            referral_bonus: user.referral_bonus,
            records,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::schemas::{UserDoc, REFERRAL_STATUS_SETTLED};
    use crate::db::store::MemoryStore;
    use crate::ledger::idempotency::IdempotencyGuard;
    use crate::ledger::rank::RankCache;
    use std::time::Duration;

    async fn settlement_with_users(ids: &[&str]) -> (Arc<MemoryStore>, ReferralSettlement) {
        let store = Arc::new(MemoryStore::default());
        for id in ids {
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
        let settlement = ReferralSettlement::new(store.clone(), store.clone(), score);
        (store, settlement)
    }

    #[tokio::test]
    async fn settle_credits_both_sides() {
        let (store, settlement) = settlement_with_users(&["referrer", "newcomer"]).await;

        let result = settlement.settle("referrer", "newcomer").await.unwrap();
        assert_eq!(result.referrer_bonus, 500);
        assert_eq!(result.referred_bonus, 200);
        assert_eq!(result.referrer_new_count, 1);

        let referrer = store.get_user("referrer").await.unwrap().unwrap();
        assert_eq!(referrer.score, 500);
        assert_eq!(referrer.referral_bonus, 500);
        assert_eq!(referrer.referral_count, 1);
        assert_eq!(referrer.games_played, 0);

        let newcomer = store.get_user("newcomer").await.unwrap().unwrap();
        assert_eq!(newcomer.score, 200);
        assert_eq!(newcomer.referral_bonus, 200);
        assert_eq!(newcomer.referral_count, 0);
    }

    #[tokio::test]
    async fn settle_marks_record_settled() {
        let (store, settlement) = settlement_with_users(&["referrer", "newcomer"]).await;

        settlement.settle("referrer", "newcomer").await.unwrap();

        let record = store
            .find_pair("referrer", "newcomer")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.status, REFERRAL_STATUS_SETTLED);
        assert_eq!(record.referrer_bonus, 500);
        assert_eq!(record.referred_bonus, 200);
    }

    #[tokio::test]
    async fn second_settlement_rejected() {
        let (store, settlement) = settlement_with_users(&["referrer", "newcomer"]).await;

        settlement.settle("referrer", "newcomer").await.unwrap();
        let err = settlement.settle("referrer", "newcomer").await.unwrap_err();
        assert!(matches!(err, LedgerError::AlreadySettled));

        // Credits applied exactly once
        let referrer = store.get_user("referrer").await.unwrap().unwrap();
        assert_eq!(referrer.score, 500);
        assert_eq!(referrer.referral_count, 1);

        let records = store.by_referrer("referrer").await.unwrap();
        assert_eq!(records.len(), 1);
    }

    #[tokio::test]
    async fn self_referral_rejected() {
        let (_store, settlement) = settlement_with_users(&["u1"]).await;

        let err = settlement.settle("u1", "u1").await.unwrap_err();
        assert!(matches!(err, LedgerError::Validation(_)));
    }

    #[tokio::test]
    async fn missing_referrer_reported() {
        let (_store, settlement) = settlement_with_users(&["newcomer"]).await;

        let err = settlement.settle("ghost", "newcomer").await.unwrap_err();
        match err {
            LedgerError::NotFound(msg) => assert_eq!(msg, "Referrer user not found"),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn missing_referred_reported() {
        let (_store, settlement) = settlement_with_users(&["referrer"]).await;

        let err = settlement.settle("referrer", "ghost").await.unwrap_err();
        match err {
            LedgerError::NotFound(msg) => assert_eq!(msg, "Referred user not found"),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn distinct_referred_users_settle_independently() {
        let (store, settlement) = settlement_with_users(&["referrer", "n1", "n2"]).await;

        settlement.settle("referrer", "n1").await.unwrap();
        settlement.settle("referrer", "n2").await.unwrap();

        let referrer = store.get_user("referrer").await.unwrap().unwrap();
        assert_eq!(referrer.referral_count, 2);
        assert_eq!(referrer.score, 1000);

        let summary = settlement.summary("referrer").await.unwrap();
        assert_eq!(summary.referral_count, 2);
        assert_eq!(summary.referral_bonus, 1000);
        assert_eq!(summary.records.len(), 2);
    }

    #[tokio::test]
    async fn summary_for_user_with_no_referrals() {
        let (_store, settlement) = settlement_with_users(&["u1"]).await;

        let summary = settlement.summary("u1").await.unwrap();
        assert_eq!(summary.referral_count, 0);
        assert_eq!(summary.referral_bonus, 0);
        assert!(summary.records.is_empty());
    }
}
