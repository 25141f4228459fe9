//! Referral record schema
//!
//! One document per settled referral relationship. The unique compound
//! index on (referrer_id, referred_id) is what makes settlement claims
//! atomic: the first insert for a pair wins, every later one fails with a
//! duplicate-key error.

use bson::{doc, oid::ObjectId, Document};
use mongodb::options::IndexOptions;
use serde::{Deserialize, Serialize};

use crate::db::mongo::{IntoIndexes, MutMetadata};
use crate::db::schemas::Metadata;

/// Collection name for referrals
pub const REFERRAL_COLLECTION: &str = "referrals";

/// Claim created, credits not yet confirmed
pub const REFERRAL_STATUS_PENDING: &str = "pending";
/// Both credits applied
pub const REFERRAL_STATUS_SETTLED: &str = "settled";

/// Referral document stored in MongoDB
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct ReferralDoc {
    /// MongoDB document ID
    #[serde(skip_serializing_if = "Option::is_none")]
    pub _id: Option<ObjectId>,

    /// Common metadata (created_at, updated_at, is_deleted)
    #[serde(default)]
    pub metadata: Metadata,

    pub referrer_id: String,

    pub referred_id: String,

    #[serde(default)]
    pub referrer_username: String,

    #[serde(default)]
    pub referred_username: String,

    /// Points granted to the referrer
    pub referrer_bonus: i64,

    /// Points granted to the referred user
    pub referred_bonus: i64,

    /// "pending" until both credits applied, then "settled"
    pub status: String,
}

impl ReferralDoc {
    /// Create a pending claim for a referral pair
    pub fn pending(
        referrer_id: String,
        referred_id: String,
        referrer_username: String,
        referred_username: String,
        referrer_bonus: i64,
        referred_bonus: i64,
    ) -> Self {
        Self {
            _id: None,
            metadata: Metadata::new(),
            referrer_id,
            referred_id,
            referrer_username,
            referred_username,
            referrer_bonus,
            referred_bonus,
            status: REFERRAL_STATUS_PENDING.to_string(),
        }
    }
}

impl IntoIndexes for ReferralDoc {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        vec![
            // One referral record per (referrer, referred) pair
            (
                doc! { "referrer_id": 1, "referred_id": 1 },
                Some(
                    IndexOptions::builder()
                        .unique(true)
                        .name("referral_pair_unique".to_string())
                        .build(),
                ),
            ),
            // Stats queries list referrals by referrer
            (
                doc! { "referrer_id": 1 },
                Some(
                    IndexOptions::builder()
                        .name("referrer_index".to_string())
                        .build(),
                ),
            ),
        ]
    }
}

impl MutMetadata for ReferralDoc {
    fn mut_metadata(&mut self) -> &mut Metadata {
        &mut self.metadata
    }
}
