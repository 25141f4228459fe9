//! In-memory duplicate guard for referral score updates.
//!
//! Each referral-flavored update carries a derived key. A key that was seen
//! within the TTL window is rejected so retried submissions do not credit a
//! user twice. Entries expire lazily on lookup and in a periodic cleanup task.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use dashmap::DashMap;
use tracing::{debug, warn};

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for the idempotency guard.
#[derive(Debug, Clone)]
pub struct GuardConfig {
    /// How long a seen key blocks repeats
    pub ttl: Duration,

    /// Maximum number of tracked keys (prevents memory exhaustion)
    pub max_entries: usize,

    /// How often the background task removes expired keys
    pub cleanup_interval: Duration,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(3600),
            max_entries: 100_000,
            cleanup_interval: Duration::from_secs(60),
        }
    }
}

// =============================================================================
// Guard Statistics
// =============================================================================

/// Statistics for the idempotency guard.
#[derive(Debug, Default)]
pub struct GuardStats {
    /// Requests rejected as duplicates
    pub duplicates: AtomicU64,

    /// Requests admitted as first-seen
    pub admitted: AtomicU64,

    /// Keys removed by expiry or capacity pressure
    pub evictions: AtomicU64,
}

impl GuardStats {
    pub fn record_duplicate(&self) {
        self.duplicates.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_admitted(&self) {
        self.admitted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_eviction(&self) {
        self.evictions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> GuardStatsSnapshot {
        GuardStatsSnapshot {
            duplicates: self.duplicates.load(Ordering::Relaxed),
            admitted: self.admitted.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of guard statistics.
#[derive(Debug, Clone)]
pub struct GuardStatsSnapshot {
    pub duplicates: u64,
    pub admitted: u64,
    pub evictions: u64,
}

// =============================================================================
// Idempotency Guard
// =============================================================================

/// Duplicate detector for referral requests.
///
/// Keys are `{user_id}_{unique_request_id}` when the client supplies a
/// request id. Entries expire after the configured TTL.
pub struct IdempotencyGuard {
    /// Seen keys mapped to their expiry instant
    seen: DashMap<String, Instant>,

    config: GuardConfig,

    stats: GuardStats,
}

impl IdempotencyGuard {
    pub fn new(config: GuardConfig) -> Self {
        Self {
            seen: DashMap::new(),
            config,
            stats: GuardStats::default(),
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(GuardConfig::default())
    }

    /// Build the dedup key for a request.
    ///
    /// Clients that omit `unique_request_id` fall back to a timestamp-derived
    /// key, which only catches same-millisecond repeats.
    pub fn request_key(user_id: &str, unique_request_id: Option<&str>) -> String {
        match unique_request_id {
            Some(id) if !id.is_empty() => format!("{}_{}", user_id, id),
            _ => {
                warn!(
                    user_id = %user_id,
                    "Referral request without uniqueRequestId, falling back to timestamp key"
                );
                let millis = SystemTime::now()
                    .duration_since(UNIX_EPOCH)
                    .map(|d| d.as_millis())
                    .unwrap_or(0);
                format!("{}_{}", user_id, millis)
            }
        }
    }

    /// Record a key and report whether it was already seen.
    ///
    /// Returns `true` when the key is a duplicate within the TTL window.
    /// Expired entries are treated as unseen and re-armed.
    pub fn check_and_mark(&self, key: &str) -> bool {
        let now = Instant::now();

        if let Some(mut entry) = self.seen.get_mut(key) {
            if now < *entry {
                self.stats.record_duplicate();
                return true;
            }
            // Expired, re-arm with a fresh window
            *entry = now + self.config.ttl;
            self.stats.record_eviction();
            self.stats.record_admitted();
            return false;
        }

        if self.seen.len() >= self.config.max_entries {
            self.evict_soonest();
        }

        self.seen.insert(key.to_string(), now + self.config.ttl);
        self.stats.record_admitted();
        false
    }

    /// Remove all expired keys. Returns the number removed.
    pub fn cleanup(&self) -> usize {
        let now = Instant::now();
        let mut removed = 0;
        self.seen.retain(|_, expires_at| {
            if now >= *expires_at {
                removed += 1;
                self.stats.record_eviction();
                false
            } else {
                true
            }
        });
        removed
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }

    pub fn stats(&self) -> GuardStatsSnapshot {
        self.stats.snapshot()
    }

    /// Spawn the periodic cleanup task.
    pub fn spawn_cleanup_task(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let guard = Arc::clone(self);
        let interval = guard.config.cleanup_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let removed = guard.cleanup();
                if removed > 0 {
                    debug!(removed, remaining = guard.len(), "Expired referral guard keys");
                }
            }
        })
    }

    /// Drop the entry closest to expiry to make room at capacity.
    fn evict_soonest(&self) {
        let soonest = self
            .seen
            .iter()
            .min_by_key(|e| *e.value())
            .map(|e| e.key().clone());

        if let Some(key) = soonest {
            self.seen.remove(&key);
            self.stats.record_eviction();
        }
    }
}

impl Default for IdempotencyGuard {
    fn default() -> Self {
        Self::with_defaults()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_request_admitted() {
        let guard = IdempotencyGuard::with_defaults();
        assert!(!guard.check_and_mark("user-1_req-1"));
    }

    #[test]
    fn test_repeat_rejected() {
        let guard = IdempotencyGuard::with_defaults();

        assert!(!guard.check_and_mark("user-1_req-1"));
        assert!(guard.check_and_mark("user-1_req-1"));
        assert!(guard.check_and_mark("user-1_req-1"));

        let stats = guard.stats();
        assert_eq!(stats.admitted, 1);
        assert_eq!(stats.duplicates, 2);
    }

    #[test]
    fn test_distinct_keys_independent() {
        let guard = IdempotencyGuard::with_defaults();

        assert!(!guard.check_and_mark("user-1_req-1"));
        assert!(!guard.check_and_mark("user-1_req-2"));
        assert!(!guard.check_and_mark("user-2_req-1"));
        assert_eq!(guard.len(), 3);
    }

    #[test]
    fn test_expired_key_readmitted() {
        let config = GuardConfig {
            ttl: Duration::from_millis(10),
            ..Default::default()
        };
        let guard = IdempotencyGuard::new(config);

        assert!(!guard.check_and_mark("user-1_req-1"));
        assert!(guard.check_and_mark("user-1_req-1"));

        std::thread::sleep(Duration::from_millis(20));

        // Window elapsed, the same key is admitted again
        assert!(!guard.check_and_mark("user-1_req-1"));
        assert!(guard.check_and_mark("user-1_req-1"));
    }

    #[test]
    fn test_cleanup_removes_expired() {
        let config = GuardConfig {
            ttl: Duration::from_millis(10),
            ..Default::default()
        };
        let guard = IdempotencyGuard::new(config);

        guard.check_and_mark("a");
        guard.check_and_mark("b");
        assert_eq!(guard.len(), 2);

        std::thread::sleep(Duration::from_millis(20));
        guard.check_and_mark("c");

        let removed = guard.cleanup();
        assert_eq!(removed, 2);
        assert_eq!(guard.len(), 1);
    }

    #[test]
    fn test_capacity_evicts_soonest_expiring() {
        let config = GuardConfig {
            max_entries: 2,
            ..Default::default()
        };
        let guard = IdempotencyGuard::new(config);

        guard.check_and_mark("a");
        std::thread::sleep(Duration::from_millis(5));
        guard.check_and_mark("b");
        guard.check_and_mark("c");

        assert_eq!(guard.len(), 2);
        // "a" expires first, so it was the one evicted
        assert!(!guard.check_and_mark("a"));
    }

    #[test]
    fn test_request_key_with_request_id() {
        let key = IdempotencyGuard::request_key("user-1", Some("abc123"));
        assert_eq!(key, "user-1_abc123");
    }

    #[test]
    fn test_request_key_empty_id_falls_back() {
        let key = IdempotencyGuard::request_key("user-1", Some(""));
        assert!(key.starts_with("user-1_"));
        assert_ne!(key, "user-1_");
    }
}
