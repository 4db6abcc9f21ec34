//! Time-bounded cache keyed by resource name.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// A cached value with the moment it was stored.
#[derive(Debug, Clone)]
pub struct CacheEntry<V> {
    pub value: V,
    /// Monotonic store time; freshness is computed from this.
    pub stored_at: Instant,
    /// Wall-clock store time, for display only.
    pub cached_at: DateTime<Utc>,
}

impl<V> CacheEntry<V> {
    fn new(value: V) -> Self {
        Self {
            value,
            stored_at: Instant::now(),
            cached_at: Utc::now(),
        }
    }

    /// Time elapsed since the entry was stored.
    pub fn age(&self) -> Duration {
        Instant::now().saturating_duration_since(self.stored_at)
    }

    /// `now - stored_at < ttl`.
    pub fn is_fresh(&self, ttl: Duration) -> bool {
        self.age() < ttl
    }
}

/// Process-lifetime cache holding the last good value per key.
///
/// Writes are whole-entry replacements; there is no eviction besides
/// [`invalidate`](Self::invalidate) and [`clear`](Self::clear).
#[derive(Debug)]
pub struct TtlCache<V> {
    entries: RwLock<HashMap<String, CacheEntry<V>>>,
}

impl<V> Default for TtlCache<V> {
    fn default() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }
}

impl<V: Clone> TtlCache<V> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the entry for `key`, fresh or not.
    pub fn get(&self, key: &str) -> Option<CacheEntry<V>> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    /// Get the value for `key` only if it is younger than `ttl`.
    pub fn get_fresh(&self, key: &str, ttl: Duration) -> Option<V> {
        self.get(key)
            .filter(|entry| Self::is_fresh(entry, ttl))
            .map(|entry| entry.value)
    }

    /// Store `value` under `key`, stamped with the current time.
    pub fn put(&self, key: &str, value: V) {
        debug!(key = %key, "Caching fetched value");
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_string(), CacheEntry::new(value));
    }

    /// Remove the entry for `key`. Returns whether an entry existed.
    pub fn invalidate(&self, key: &str) -> bool {
        let removed = self
            .entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key)
            .is_some();
        if removed {
            debug!(key = %key, "Invalidated cache entry");
        }
        removed
    }

    /// Drop every entry.
    pub fn clear(&self) {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    /// `now - entry.stored_at < ttl`.
    pub fn is_fresh(entry: &CacheEntry<V>, ttl: Duration) -> bool {
        entry.is_fresh(ttl)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TTL: Duration = Duration::from_secs(60);

    #[tokio::test(start_paused = true)]
    async fn test_fresh_until_ttl() {
        let cache = TtlCache::new();
        cache.put("items", vec![1, 2, 3]);

        tokio::time::advance(Duration::from_secs(59)).await;
        assert_eq!(cache.get_fresh("items", TTL), Some(vec![1, 2, 3]));

        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(cache.get_fresh("items", TTL), None);

        // Stale entries are still readable through get()
        let entry = cache.get("items").unwrap();
        assert!(!TtlCache::is_fresh(&entry, TTL));
        assert_eq!(entry.value, vec![1, 2, 3]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_put_replaces_and_restamps() {
        let cache = TtlCache::new();
        cache.put("items", vec!["a"]);
        tokio::time::advance(Duration::from_secs(45)).await;

        cache.put("items", vec!["b"]);
        tokio::time::advance(Duration::from_secs(30)).await;

        let entry = cache.get("items").unwrap();
        assert_eq!(entry.value, vec!["b"]);
        assert_eq!(entry.age(), Duration::from_secs(30));
        assert!(entry.is_fresh(TTL));
    }

    #[test]
    fn test_invalidate() {
        let cache = TtlCache::new();
        cache.put("items", 1);
        cache.put("other", 2);

        assert!(cache.invalidate("items"));
        assert!(!cache.invalidate("items"));
        assert!(cache.get("items").is_none());
        assert!(cache.contains("other"));
        assert_eq!(cache.len(), 1);

        cache.clear();
        assert!(cache.is_empty());
    }

    #[test]
    fn test_zero_ttl_is_never_fresh() {
        let cache = TtlCache::new();
        cache.put("items", 1);
        assert_eq!(cache.get_fresh("items", Duration::ZERO), None);
    }
}
