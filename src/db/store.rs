//! Storage traits and backends for users and referrals

use async_trait::async_trait;
use bson::{doc, DateTime, Document};
use dashmap::DashMap;
use tracing::warn;

use crate::db::mongo::{MongoClient, MongoCollection};
use crate::db::schemas::{
    ReferralDoc, UserDoc, REFERRAL_COLLECTION, REFERRAL_STATUS_SETTLED, USER_COLLECTION,
};
use crate::types::{LedgerError, Result};

/// Partial update applied to a user document. `None` fields are untouched.
#[derive(Debug, Default, Clone)]
pub struct UserUpdate {
    pub username: Option<String>,
    pub display_name: Option<String>,
    pub score: Option<i64>,
    pub high_score: Option<i64>,
    pub last_game_score: Option<i64>,
    pub games_played: Option<i64>,
    pub rank: Option<i64>,
    pub referral_count: Option<i64>,
    pub referral_bonus: Option<i64>,
}

impl UserUpdate {
    fn is_empty(&self) -> bool {
        self.username.is_none()
            && self.display_name.is_none()
            && self.score.is_none()
            && self.high_score.is_none()
            && self.last_game_score.is_none()
            && self.games_played.is_none()
            && self.rank.is_none()
            && self.referral_count.is_none()
            && self.referral_bonus.is_none()
    }

    fn into_set_document(self) -> Document {
        let mut set = doc! {};
        if let Some(v) = self.username {
            set.insert("username", v);
        }
        if let Some(v) = self.display_name {
            set.insert("display_name", v);
        }
        if let Some(v) = self.score {
            set.insert("score", v);
        }
        if let Some(v) = self.high_score {
            set.insert("high_score", v);
        }
        if let Some(v) = self.last_game_score {
            set.insert("last_game_score", v);
        }
        if let Some(v) = self.games_played {
            set.insert("games_played", v);
        }
        if let Some(v) = self.rank {
            set.insert("rank", v);
        }
        if let Some(v) = self.referral_count {
            set.insert("referral_count", v);
        }
        if let Some(v) = self.referral_bonus {
            set.insert("referral_bonus", v);
        }
        set
    }

    fn apply_to(&self, user: &mut UserDoc) {
        if let Some(v) = &self.username {
            user.username = v.clone();
        }
        if let Some(v) = &self.display_name {
            user.display_name = v.clone();
        }
        if let Some(v) = self.score {
            user.score = v;
        }
        if let Some(v) = self.high_score {
            user.high_score = v;
        }
        if let Some(v) = self.last_game_score {
            user.last_game_score = v;
        }
        if let Some(v) = self.games_played {
            user.games_played = v;
        }
        if let Some(v) = self.rank {
            user.rank = v;
        }
        if let Some(v) = self.referral_count {
            user.referral_count = v;
        }
        if let Some(v) = self.referral_bonus {
            user.referral_bonus = v;
        }
    }
}

/// Sort column for user listings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UserSortField {
    #[default]
    HighScore,
    Score,
    Username,
    GamesPlayed,
    ReferralCount,
}

impl UserSortField {
    pub fn column(&self) -> &'static str {
        match self {
            UserSortField::HighScore => "high_score",
            UserSortField::Score => "score",
            UserSortField::Username => "username",
            UserSortField::GamesPlayed => "games_played",
            UserSortField::ReferralCount => "referral_count",
        }
    }
}

/// Query parameters for listing users
#[derive(Debug, Clone)]
pub struct ListQuery {
    pub limit: i64,
    pub offset: u64,
    pub sort_by: UserSortField,
    pub descending: bool,
    pub username: Option<String>,
}

impl Default for ListQuery {
    fn default() -> Self {
        Self {
            limit: 50,
            offset: 0,
            sort_by: UserSortField::HighScore,
            descending: true,
            username: None,
        }
    }
}

/// Read/write access to user documents
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn get_user(&self, user_id: &str) -> Result<Option<UserDoc>>;
    async fn create_user(&self, user: UserDoc) -> Result<UserDoc>;
    async fn update_user(&self, user_id: &str, update: UserUpdate) -> Result<()>;
    async fn list_users(&self, query: ListQuery) -> Result<(Vec<UserDoc>, u64)>;
    /// All users ordered by high score descending, for rank computation
    async fn all_by_high_score(&self) -> Result<Vec<UserDoc>>;
}

/// Read/write access to referral records
#[async_trait]
pub trait ReferralStore: Send + Sync {
    async fn find_pair(&self, referrer_id: &str, referred_id: &str) -> Result<Option<ReferralDoc>>;
    /// Insert a pending referral record. Fails with `AlreadySettled` when the
    /// pair already has a record.
    async fn claim(&self, referral: ReferralDoc) -> Result<()>;
    async fn mark_settled(&self, referrer_id: &str, referred_id: &str) -> Result<()>;
    async fn by_referrer(&self, referrer_id: &str) -> Result<Vec<ReferralDoc>>;
}

/// MongoDB-backed store
pub struct MongoStore {
    users: MongoCollection<UserDoc>,
    referrals: MongoCollection<ReferralDoc>,
}

impl MongoStore {
    pub async fn new(client: &MongoClient) -> Result<Self> {
        let users = client.collection::<UserDoc>(USER_COLLECTION).await?;
        let referrals = client.collection::<ReferralDoc>(REFERRAL_COLLECTION).await?;
        Ok(Self { users, referrals })
    }
}

#[async_trait]
impl UserStore for MongoStore {
    async fn get_user(&self, user_id: &str) -> Result<Option<UserDoc>> {
        self.users.find_one(doc! { "user_id": user_id }).await
    }

    async fn create_user(&self, user: UserDoc) -> Result<UserDoc> {
        let mut user = user;
        let id = self.users.insert_one(user.clone()).await.map_err(|e| {
            if matches!(e, LedgerError::AlreadySettled) {
                LedgerError::Validation("User with this ID or username already exists".into())
            } else {
                e
            }
        })?;
        user._id = Some(id);
        Ok(user)
    }

    async fn update_user(&self, user_id: &str, update: UserUpdate) -> Result<()> {
        if update.is_empty() {
            return Ok(());
        }
        let mut set = update.into_set_document();
        set.insert("metadata.updated_at", DateTime::now());
        let result = self
            .users
            .update_one(doc! { "user_id": user_id }, doc! { "$set": set })
            .await?;
        if result.matched_count == 0 {
            return Err(LedgerError::NotFound("User not found".into()));
        }
        Ok(())
    }

    async fn list_users(&self, query: ListQuery) -> Result<(Vec<UserDoc>, u64)> {
        let mut filter = doc! {};
        if let Some(username) = &query.username {
            filter.insert("username", doc! { "$regex": username, "$options": "i" });
        }

        let direction = if query.descending { -1 } else { 1 };
        let sort = doc! { query.sort_by.column(): direction };

        let total = self.users.count(filter.clone()).await?;
        let users = self
            .users
            .find_many(filter, Some(sort), Some(query.offset), Some(query.limit))
            .await?;

        Ok((users, total))
    }

    async fn all_by_high_score(&self) -> Result<Vec<UserDoc>> {
        self.users
            .find_many(doc! {}, Some(doc! { "high_score": -1 }), None, None)
            .await
    }
}

#[async_trait]
impl ReferralStore for MongoStore {
    async fn find_pair(&self, referrer_id: &str, referred_id: &str) -> Result<Option<ReferralDoc>> {
        self.referrals
            .find_one(doc! { "referrer_id": referrer_id, "referred_id": referred_id })
            .await
    }

    async fn claim(&self, referral: ReferralDoc) -> Result<()> {
        self.referrals.insert_one(referral).await?;
        Ok(())
    }

    async fn mark_settled(&self, referrer_id: &str, referred_id: &str) -> Result<()> {
        self.referrals
            .update_one(
                doc! { "referrer_id": referrer_id, "referred_id": referred_id },
                doc! { "$set": {
                    "status": REFERRAL_STATUS_SETTLED,
                    "metadata.updated_at": DateTime::now(),
                }},
            )
            .await?;
        Ok(())
    }

    async fn by_referrer(&self, referrer_id: &str) -> Result<Vec<ReferralDoc>> {
        self.referrals
            .find_many(
                doc! { "referrer_id": referrer_id },
                Some(doc! { "metadata.created_at": -1 }),
                None,
                None,
            )
            .await
    }
}

/// In-memory store for development mode and tests
#[derive(Default)]
pub struct MemoryStore {
    users: DashMap<String, UserDoc>,
    referrals: DashMap<String, ReferralDoc>,
}

impl MemoryStore {
    pub fn new() -> Self {
        warn!("Using in-memory store, data will not survive a restart");
        Self::default()
    }

    fn pair_key(referrer_id: &str, referred_id: &str) -> String {
        format!("{}:{}", referrer_id, referred_id)
    }
}

#[async_trait]
impl UserStore for MemoryStore {
    async fn get_user(&self, user_id: &str) -> Result<Option<UserDoc>> {
        Ok(self.users.get(user_id).map(|u| u.clone()))
    }

    async fn create_user(&self, user: UserDoc) -> Result<UserDoc> {
        let taken = self
            .users
            .iter()
            .any(|u| u.username.eq_ignore_ascii_case(&user.username));
        if taken {
            return Err(LedgerError::Validation(
                "User with this ID or username already exists".into(),
            ));
        }
        match self.users.entry(user.user_id.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => Err(LedgerError::Validation(
                "User with this ID or username already exists".into(),
            )),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(user.clone());
                Ok(user)
            }
        }
    }

    async fn update_user(&self, user_id: &str, update: UserUpdate) -> Result<()> {
        let mut entry = self
            .users
            .get_mut(user_id)
            .ok_or_else(|| LedgerError::NotFound("User not found".into()))?;
        update.apply_to(&mut entry);
        Ok(())
    }

    async fn list_users(&self, query: ListQuery) -> Result<(Vec<UserDoc>, u64)> {
        let mut users: Vec<UserDoc> = self
            .users
            .iter()
            .filter(|u| match &query.username {
                Some(needle) => u.username.to_lowercase().contains(&needle.to_lowercase()),
                None => true,
            })
            .map(|u| u.clone())
            .collect();

        users.sort_by(|a, b| {
            let ord = match query.sort_by {
                UserSortField::HighScore => a.high_score.cmp(&b.high_score),
                UserSortField::Score => a.score.cmp(&b.score),
                UserSortField::Username => a.username.cmp(&b.username),
                UserSortField::GamesPlayed => a.games_played.cmp(&b.games_played),
                UserSortField::ReferralCount => a.referral_count.cmp(&b.referral_count),
            };
            if query.descending {
                ord.reverse()
            } else {
                ord
            }
        });

        let total = users.len() as u64;
        let page: Vec<UserDoc> = users
            .into_iter()
            .skip(query.offset as usize)
            .take(query.limit.max(0) as usize)
            .collect();

        Ok((page, total))
    }

    async fn all_by_high_score(&self) -> Result<Vec<UserDoc>> {
        let mut users: Vec<UserDoc> = self.users.iter().map(|u| u.clone()).collect();
        users.sort_by(|a, b| b.high_score.cmp(&a.high_score));
        Ok(users)
    }
}

#[async_trait]
impl ReferralStore for MemoryStore {
    async fn find_pair(&self, referrer_id: &str, referred_id: &str) -> Result<Option<ReferralDoc>> {
        let key = Self::pair_key(referrer_id, referred_id);
        Ok(self.referrals.get(&key).map(|r| r.clone()))
    }

    async fn claim(&self, referral: ReferralDoc) -> Result<()> {
        let key = Self::pair_key(&referral.referrer_id, &referral.referred_id);
        match self.referrals.entry(key) {
            dashmap::mapref::entry::Entry::Occupied(_) => Err(LedgerError::AlreadySettled),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(referral);
                Ok(())
            }
        }
    }

    async fn mark_settled(&self, referrer_id: &str, referred_id: &str) -> Result<()> {
        let key = Self::pair_key(referrer_id, referred_id);
        if let Some(mut entry) = self.referrals.get_mut(&key) {
            entry.status = REFERRAL_STATUS_SETTLED.to_string();
        }
        Ok(())
    }

    async fn by_referrer(&self, referrer_id: &str) -> Result<Vec<ReferralDoc>> {
        let mut records: Vec<ReferralDoc> = self
            .referrals
            .iter()
            .filter(|r| r.referrer_id == referrer_id)
            .map(|r| r.clone())
            .collect();
        records.sort_by(|a, b| b.metadata.created_at.cmp(&a.metadata.created_at));
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::schemas::ReferralDoc;

    fn user(id: &str, username: &str, high_score: i64) -> UserDoc {
        let mut u = UserDoc::new(
            id.to_string(),
            format!("{}@example.com", username),
            username.to_string(),
            username.to_string(),
        );
        u.high_score = high_score;
        u
    }

    #[tokio::test]
    async fn create_rejects_duplicate_user_id() {
        let store = MemoryStore::default();
        store.create_user(user("u1", "alice", 100)).await.unwrap();

        let err = store.create_user(user("u1", "bob", 50)).await.unwrap_err();
        assert!(matches!(err, LedgerError::Validation(_)));
    }

    #[tokio::test]
    async fn create_rejects_duplicate_username_case_insensitive() {
        let store = MemoryStore::default();
        store.create_user(user("u1", "Alice", 100)).await.unwrap();

        let err = store.create_user(user("u2", "alice", 50)).await.unwrap_err();
        assert!(matches!(err, LedgerError::Validation(_)));
    }

    #[tokio::test]
    async fn update_applies_only_provided_fields() {
        let store = MemoryStore::default();
        store.create_user(user("u1", "alice", 100)).await.unwrap();

        store
            .update_user(
                "u1",
                UserUpdate {
                    score: Some(250),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let u = store.get_user("u1").await.unwrap().unwrap();
        assert_eq!(u.score, 250);
        assert_eq!(u.high_score, 100);
        assert_eq!(u.username, "alice");
    }

    #[tokio::test]
    async fn list_sorts_and_paginates() {
        let store = MemoryStore::default();
        store.create_user(user("u1", "alice", 300)).await.unwrap();
        store.create_user(user("u2", "bob", 500)).await.unwrap();
        store.create_user(user("u3", "carol", 100)).await.unwrap();

        let (page, total) = store
            .list_users(ListQuery {
                limit: 2,
                offset: 1,
                ..Default::default()
            })
            .await
            .unwrap();

        assert_eq!(total, 3);
        assert_eq!(page.len(), 2);
        assert_eq!(page[0].user_id, "u1");
        assert_eq!(page[1].user_id, "u3");
    }

    #[tokio::test]
    async fn list_filters_by_username_substring() {
        let store = MemoryStore::default();
        store.create_user(user("u1", "alice", 300)).await.unwrap();
        store.create_user(user("u2", "malice", 500)).await.unwrap();
        store.create_user(user("u3", "bob", 100)).await.unwrap();

        let (page, total) = store
            .list_users(ListQuery {
                username: Some("ALICE".into()),
                ..Default::default()
            })
            .await
            .unwrap();

        assert_eq!(total, 2);
        assert!(page.iter().all(|u| u.username.contains("alice")));
    }

    #[tokio::test]
    async fn claim_is_exclusive_per_pair() {
        let store = MemoryStore::default();
        let record = ReferralDoc::pending(
            "r1".into(),
            "n1".into(),
            "ref".into(),
            "new".into(),
            500,
            200,
        );

        store.claim(record.clone()).await.unwrap();
        let err = store.claim(record).await.unwrap_err();
        assert!(matches!(err, LedgerError::AlreadySettled));
    }

    #[tokio::test]
    async fn mark_settled_updates_status() {
        let store = MemoryStore::default();
        store
            .claim(ReferralDoc::pending(
                "r1".into(),
                "n1".into(),
                "ref".into(),
                "new".into(),
                500,
                200,
            ))
            .await
            .unwrap();

        store.mark_settled("r1", "n1").await.unwrap();

        let record = store.find_pair("r1", "n1").await.unwrap().unwrap();
        assert_eq!(record.status, REFERRAL_STATUS_SETTLED);
    }
}
