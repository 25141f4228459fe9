//! Player record schema
//!
//! One document per player, holding the cumulative score, the best
//! single-game score, and the referral counters mutated by the ledger.

use bson::{doc, oid::ObjectId, Document};
use mongodb::options::{Collation, CollationStrength, IndexOptions};
use serde::{Deserialize, Serialize};

use crate::db::mongo::{IntoIndexes, MutMetadata};
use crate::db::schemas::Metadata;

/// Collection name for players
pub const USER_COLLECTION: &str = "users";

/// Sentinel rank for "unknown / not yet computed"
pub const RANK_UNRANKED: i64 = 999;

/// Player document stored in MongoDB
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct UserDoc {
    /// MongoDB document ID
    #[serde(skip_serializing_if = "Option::is_none")]
    pub _id: Option<ObjectId>,

    /// Common metadata (created_at, updated_at, is_deleted)
    #[serde(default)]
    pub metadata: Metadata,

    /// Stable identifier assigned by the identity provider
    pub user_id: String,

    pub email: String,

    pub username: String,

    #[serde(default)]
    pub display_name: String,

    /// Cumulative lifetime points (games + referral bonuses)
    #[serde(default)]
    pub score: i64,

    /// Best single-game score ever recorded
    #[serde(default)]
    pub high_score: i64,

    /// Score of the most recently completed game
    #[serde(default)]
    pub last_game_score: i64,

    /// Count of completed games
    #[serde(default)]
    pub games_played: i64,

    /// Last-computed dense rank by high_score, descending
    #[serde(default = "default_rank")]
    pub rank: i64,

    /// Number of users this player has successfully referred
    #[serde(default)]
    pub referral_count: i64,

    /// Cumulative points earned through referral credits
    #[serde(default)]
    pub referral_bonus: i64,
}

fn default_rank() -> i64 {
    RANK_UNRANKED
}

impl UserDoc {
    /// Create a new player document with zero-valued counters
    pub fn new(user_id: String, email: String, username: String, display_name: String) -> Self {
        Self {
            _id: None,
            metadata: Metadata::new(),
            user_id,
            email,
            username,
            display_name,
            score: 0,
            high_score: 0,
            last_game_score: 0,
            games_played: 0,
            rank: RANK_UNRANKED,
            referral_count: 0,
            referral_bonus: 0,
        }
    }

    /// Current cumulative score, falling back to `high_score` for legacy
    /// documents created before the cumulative field existed.
    pub fn current_score(&self) -> i64 {
        if self.score != 0 {
            self.score
        } else {
            self.high_score
        }
    }
}

impl IntoIndexes for UserDoc {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        vec![
            // Unique index on the identity-provider id
            (
                doc! { "user_id": 1 },
                Some(
                    IndexOptions::builder()
                        .unique(true)
                        .name("user_id_unique".to_string())
                        .build(),
                ),
            ),
            // Leaderboard queries sort by high_score descending
            (
                doc! { "high_score": -1 },
                Some(
                    IndexOptions::builder()
                        .name("high_score_desc".to_string())
                        .build(),
                ),
            ),
            // Usernames are unique regardless of case
            (
                doc! { "username": 1 },
                Some(
                    IndexOptions::builder()
                        .unique(true)
                        .collation(
                            Collation::builder()
                                .locale("en")
                                .strength(CollationStrength::Secondary)
                                .build(),
                        )
                        .name("username_unique_ci".to_string())
                        .build(),
                ),
            ),
        ]
    }
}

impl MutMetadata for UserDoc {
    fn mut_metadata(&mut self) -> &mut Metadata {
        &mut self.metadata
    }
}
