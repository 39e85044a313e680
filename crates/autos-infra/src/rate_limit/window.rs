//! Sliding-window admission control.
//!
//! Counts requests in a trailing window per client key. Storage is pluggable
//! behind [`WindowStore`]; the in-process implementation shards ordered
//! timestamp deques across mutexes to keep lock contention down. A remote
//! sorted-set store for multi-instance deployments plugs in behind the same
//! trait.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

/// Per-key ordered timestamp storage for the sliding window.
#[async_trait]
pub trait WindowStore: Send + Sync {
    /// Atomically count entries newer than `window_start` and, when the count
    /// is below `limit`, record `now`. Returns the count before recording.
    /// Rejected requests never record a timestamp.
    async fn count_and_record_below(
        &self,
        key: &str,
        window_start: Instant,
        now: Instant,
        limit: u32,
    ) -> u32;

    /// Count entries newer than `window_start` without recording.
    async fn count(&self, key: &str, window_start: Instant) -> u32;

    /// Oldest entry still inside the window, if any. Drives the reset header.
    async fn oldest_in_window(&self, key: &str, window_start: Instant) -> Option<Instant>;

    /// Drop entries older than `horizon` across all keys.
    async fn cleanup(&self, horizon: Instant);
}

/// Sharded in-process store. Entries older than the window are purged lazily
/// on access; `cleanup` sweeps everything older than the caller's horizon.
pub struct InMemoryWindowStore {
    shards: Vec<Mutex<HashMap<String, VecDeque<Instant>>>>,
}

impl InMemoryWindowStore {
    pub fn new() -> Self {
        Self::with_shards(16)
    }

    pub fn with_shards(shard_count: usize) -> Self {
        let shards = (0..shard_count.max(1))
            .map(|_| Mutex::new(HashMap::new()))
            .collect();
        Self { shards }
    }

    fn shard_for(&self, key: &str) -> &Mutex<HashMap<String, VecDeque<Instant>>> {
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        key.hash(&mut hasher);
        &self.shards[(hasher.finish() as usize) % self.shards.len()]
    }

    fn purge(entries: &mut VecDeque<Instant>, window_start: Instant) {
        while entries.front().is_some_and(|&t| t <= window_start) {
            entries.pop_front();
        }
    }
}

impl Default for InMemoryWindowStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl WindowStore for InMemoryWindowStore {
    async fn count_and_record_below(
        &self,
        key: &str,
        window_start: Instant,
        now: Instant,
        limit: u32,
    ) -> u32 {
        let mut shard = self.shard_for(key).lock().await;
        let entries = shard.entry(key.to_string()).or_default();
        Self::purge(entries, window_start);
        let count = entries.len() as u32;
        if count < limit {
            entries.push_back(now);
        }
        count
    }

    async fn count(&self, key: &str, window_start: Instant) -> u32 {
        let mut shard = self.shard_for(key).lock().await;
        match shard.get_mut(key) {
            Some(entries) => {
                Self::purge(entries, window_start);
                entries.len() as u32
            }
            None => 0,
        }
    }

    async fn oldest_in_window(&self, key: &str, window_start: Instant) -> Option<Instant> {
        let mut shard = self.shard_for(key).lock().await;
        let entries = shard.get_mut(key)?;
        Self::purge(entries, window_start);
        entries.front().copied()
    }

    async fn cleanup(&self, horizon: Instant) {
        let mut total_dropped = 0usize;
        for shard in &self.shards {
            let mut keys = shard.lock().await;
            for entries in keys.values_mut() {
                let before = entries.len();
                Self::purge(entries, horizon);
                total_dropped += before - entries.len();
            }
            keys.retain(|_, entries| !entries.is_empty());
        }
        if total_dropped > 0 {
            tracing::debug!(dropped = total_dropped, "Purged expired rate limit entries");
        }
    }
}

/// Count-in-trailing-window limiter. `allow` records a timestamp only when the
/// request is admitted.
#[derive(Clone)]
pub struct SlidingWindowLimiter {
    store: Arc<dyn WindowStore>,
    limit: u32,
    window: Duration,
}

impl SlidingWindowLimiter {
    pub fn new(limit: u32, window: Duration) -> Self {
        Self::with_store(Arc::new(InMemoryWindowStore::new()), limit, window)
    }

    pub fn with_store(store: Arc<dyn WindowStore>, limit: u32, window: Duration) -> Self {
        Self {
            store,
            limit,
            window,
        }
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub async fn allow(&self, key: &str) -> bool {
        let now = Instant::now();
        let count = self
            .store
            .count_and_record_below(key, now - self.window, now, self.limit)
            .await;
        count < self.limit
    }

    pub async fn remaining(&self, key: &str) -> u32 {
        let now = Instant::now();
        let count = self.store.count(key, now - self.window).await;
        self.limit.saturating_sub(count)
    }

    /// Time until the oldest recorded request ages out of the window. Zero
    /// when the window is empty.
    pub async fn reset_after(&self, key: &str) -> Duration {
        let now = Instant::now();
        match self.store.oldest_in_window(key, now - self.window).await {
            Some(oldest) => (oldest + self.window).saturating_duration_since(now),
            None => Duration::ZERO,
        }
    }

    /// Sweep entries older than twice the window.
    pub async fn cleanup(&self) {
        let horizon = Instant::now() - 2 * self.window;
        self.store.cleanup(horizon).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn admits_up_to_limit_then_rejects() {
        let limiter = SlidingWindowLimiter::new(3, Duration::from_secs(60));
        for _ in 0..3 {
            assert!(limiter.allow("client-a").await);
        }
        assert!(!limiter.allow("client-a").await);
    }

    #[tokio::test]
    async fn rejection_does_not_consume_window_capacity() {
        let store = Arc::new(InMemoryWindowStore::new());
        let limiter =
            SlidingWindowLimiter::with_store(store.clone(), 2, Duration::from_secs(60));

        assert!(limiter.allow("k").await);
        assert!(limiter.allow("k").await);
        for _ in 0..5 {
            assert!(!limiter.allow("k").await);
        }

        // Only the two admitted requests are recorded.
        let now = Instant::now();
        assert_eq!(store.count("k", now - Duration::from_secs(60)).await, 2);
    }

    #[tokio::test]
    async fn keys_are_independent() {
        let limiter = SlidingWindowLimiter::new(1, Duration::from_secs(60));
        assert!(limiter.allow("a").await);
        assert!(!limiter.allow("a").await);
        assert!(limiter.allow("b").await);
    }

    #[tokio::test]
    async fn remaining_counts_down_and_floors_at_zero() {
        let limiter = SlidingWindowLimiter::new(2, Duration::from_secs(60));
        assert_eq!(limiter.remaining("k").await, 2);
        limiter.allow("k").await;
        assert_eq!(limiter.remaining("k").await, 1);
        limiter.allow("k").await;
        limiter.allow("k").await; // rejected
        assert_eq!(limiter.remaining("k").await, 0);
    }

    #[tokio::test]
    async fn window_slides_and_readmits_after_expiry() {
        let limiter = SlidingWindowLimiter::new(1, Duration::from_millis(50));
        assert!(limiter.allow("k").await);
        assert!(!limiter.allow("k").await);
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(limiter.allow("k").await);
    }

    #[tokio::test]
    async fn reset_after_tracks_oldest_entry() {
        let limiter = SlidingWindowLimiter::new(5, Duration::from_secs(60));
        assert_eq!(limiter.reset_after("k").await, Duration::ZERO);
        limiter.allow("k").await;
        let reset = limiter.reset_after("k").await;
        assert!(reset > Duration::from_secs(58) && reset <= Duration::from_secs(60));
    }

    #[tokio::test]
    async fn cleanup_drops_entries_older_than_twice_window() {
        let store = Arc::new(InMemoryWindowStore::new());
        let window = Duration::from_millis(20);
        let limiter = SlidingWindowLimiter::with_store(store.clone(), 10, window);

        limiter.allow("stale").await;
        tokio::time::sleep(Duration::from_millis(60)).await;
        limiter.cleanup().await;

        // Entry is gone even for a probe looking far back.
        let far_back = Instant::now() - Duration::from_secs(10);
        assert_eq!(store.count("stale", far_back).await, 0);
    }

    #[tokio::test]
    async fn store_purges_lazily_on_count() {
        let store = InMemoryWindowStore::with_shards(4);
        let t0 = Instant::now();
        store.count_and_record_below("k", t0 - Duration::from_secs(1), t0, 10).await;
        // A later window start excludes the recorded entry.
        assert_eq!(store.count("k", t0 + Duration::from_secs(1)).await, 0);
    }
}
