//! Leaderboard rank cache.
//!
//! Ranks are dense over high score descending: ties share a rank and the next
//! distinct score gets rank + 1. A full recomputation reads every user, so the
//! ordering is cached and refreshed at most once per TTL. Concurrent refresh
//! attempts coalesce into a single store read.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::db::store::UserStore;
use crate::types::Result;

/// One user's position in the cached ordering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RankEntry {
    pub user_id: String,
    pub high_score: i64,
    pub rank: i64,
}

/// Assign dense ranks to users already sorted by high score descending.
///
/// `[500, 500, 300, 100]` ranks as `[1, 1, 2, 3]`.
pub fn dense_ranks(sorted: &[(String, i64)]) -> Vec<RankEntry> {
    let mut entries = Vec::with_capacity(sorted.len());
    let mut rank = 0i64;
    let mut previous_score: Option<i64> = None;

    for (user_id, high_score) in sorted {
        if previous_score != Some(*high_score) {
            rank += 1;
            previous_score = Some(*high_score);
        }
        entries.push(RankEntry {
            user_id: user_id.clone(),
            high_score: *high_score,
            rank,
        });
    }

    entries
}

#[derive(Default)]
struct Snapshot {
    entries: Vec<RankEntry>,
    taken_at: Option<Instant>,
}

impl Snapshot {
    fn is_fresh(&self, ttl: Duration) -> bool {
        self.taken_at
            .map(|at| at.elapsed() < ttl)
            .unwrap_or(false)
    }
}

/// TTL-cached leaderboard ordering.
pub struct RankCache {
    store: Arc<dyn UserStore>,
    snapshot: RwLock<Snapshot>,
    /// Set while a refresh is in flight so concurrent callers skip the read
    updating: AtomicBool,
    ttl: Duration,
}

impl RankCache {
    pub fn new(store: Arc<dyn UserStore>, ttl: Duration) -> Self {
        Self {
            store,
            snapshot: RwLock::new(Snapshot::default()),
            updating: AtomicBool::new(false),
            ttl,
        }
    }

    /// Recompute the ordering from the store.
    ///
    /// Returns `false` when another refresh was already in flight or the read
    /// failed. On failure the previous snapshot stays in place.
    pub async fn refresh(&self) -> bool {
        if self
            .updating
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("Rank refresh already in flight, coalescing");
            return false;
        }

        let result = self.store.all_by_high_score().await;
        let refreshed = match result {
            Ok(users) => {
                let sorted: Vec<(String, i64)> = users
                    .into_iter()
                    .map(|u| (u.user_id, u.high_score))
                    .collect();
                let entries = dense_ranks(&sorted);
                let mut snapshot = self.snapshot.write().await;
                debug!(users = entries.len(), "Rank snapshot refreshed");
                snapshot.entries = entries;
                snapshot.taken_at = Some(Instant::now());
                true
            }
            Err(e) => {
                warn!("Rank refresh failed, keeping previous snapshot: {}", e);
                false
            }
        };

        self.updating.store(false, Ordering::SeqCst);
        refreshed
    }

    /// Rank for a user holding the given high score.
    ///
    /// A fresh snapshot containing the user answers directly. Otherwise a
    /// background refresh is kicked off and the rank is estimated against
    /// whatever snapshot exists, so callers never block on a full store read.
    pub async fn rank_of(self: &Arc<Self>, user_id: &str, high_score: i64) -> i64 {
        {
            let snapshot = self.snapshot.read().await;
            if snapshot.is_fresh(self.ttl) {
                if let Some(entry) = snapshot.entries.iter().find(|e| e.user_id == user_id) {
                    if entry.high_score == high_score {
                        return entry.rank;
                    }
                }
            }
        }

        let cache = Arc::clone(self);
        tokio::spawn(async move {
            cache.refresh().await;
        });

        self.estimate(high_score).await
    }

    /// Force a refresh and return the exact rank for the user, if known.
    pub async fn exact_rank(&self, user_id: &str) -> Result<Option<i64>> {
        {
            let snapshot = self.snapshot.read().await;
            if snapshot.is_fresh(self.ttl) {
                return Ok(snapshot
                    .entries
                    .iter()
                    .find(|e| e.user_id == user_id)
                    .map(|e| e.rank));
            }
        }

        self.refresh().await;

        let snapshot = self.snapshot.read().await;
        Ok(snapshot
            .entries
            .iter()
            .find(|e| e.user_id == user_id)
            .map(|e| e.rank))
    }

    /// Estimate a rank for a candidate high score against the stored
    /// ordering, without requiring the user to be present.
    async fn estimate(&self, high_score: i64) -> i64 {
        let snapshot = self.snapshot.read().await;
        for entry in &snapshot.entries {
            if entry.high_score <= high_score {
                return entry.rank;
            }
        }
        snapshot.entries.len() as i64 + 1
    }
}
