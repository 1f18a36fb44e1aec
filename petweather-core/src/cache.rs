//! In-memory TTL cache shared by concurrent callers.

use parking_lot::Mutex;
use std::{collections::HashMap, hash::Hash, time::Duration};
use tokio::time::Instant;

use crate::model::Coordinates;

/// Cache key for weather lookups: a rounded coordinate cell or a city name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    /// Two decimal places (~1.1 km), so nearby requests share an entry.
    pub fn coords(at: Coordinates) -> Self {
        // -0.00 and 0.00 must land in the same cell.
        let lat = (at.lat * 100.0).round() / 100.0 + 0.0;
        let lon = (at.lon * 100.0).round() / 100.0 + 0.0;
        Self(format!("{lat:.2},{lon:.2}"))
    }

    pub fn city(name: &str) -> Self {
        Self(format!("city:{}", name.trim().to_lowercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone)]
struct CacheEntry<V> {
    value: V,
    captured_at: Instant,
}

/// Map with a fixed time-to-live per entry.
///
/// Expired entries are never handed out: [`TtlCache::get`] evicts them on sight.
#[derive(Debug)]
pub struct TtlCache<K, V> {
    ttl: Duration,
    entries: Mutex<HashMap<K, CacheEntry<V>>>,
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash,
    V: Clone,
{
    pub fn new(ttl: Duration) -> Self {
        Self { ttl, entries: Mutex::new(HashMap::new()) }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn get(&self, key: &K) -> Option<V> {
        self.get_with_captured(key).map(|(value, _)| value)
    }

    /// Like [`TtlCache::get`], also returning when the value was first captured.
    pub fn get_with_captured(&self, key: &K) -> Option<(V, Instant)> {
        let now = Instant::now();
        let mut entries = self.entries.lock();

        let expired = match entries.get(key) {
            None => return None,
            Some(entry) => now.saturating_duration_since(entry.captured_at) > self.ttl,
        };

        if expired {
            entries.remove(key);
            return None;
        }

        entries.get(key).map(|entry| (entry.value.clone(), entry.captured_at))
    }

    pub fn insert(&self, key: K, value: V) {
        self.insert_at(key, value, Instant::now());
    }

    /// Store a value that was captured earlier; it expires `ttl` after `captured_at`, not after now.
    pub fn insert_at(&self, key: K, value: V, captured_at: Instant) {
        let entry = CacheEntry { value, captured_at };
        self.entries.lock().insert(key, entry);
    }

    pub fn remove(&self, key: &K) -> Option<V> {
        self.entries.lock().remove(key).map(|entry| entry.value)
    }

    /// Drop every expired entry; returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|_, entry| now.saturating_duration_since(entry.captured_at) <= self.ttl);
        before - entries.len()
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    /// Number of stored entries, expired ones included until they are touched or purged.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coordinate_keys_round_to_two_decimals() {
        let a = CacheKey::coords(Coordinates { lat: 40.71284, lon: -74.00601 });
        let b = CacheKey::coords(Coordinates { lat: 40.7149, lon: -74.0098 });
        assert_eq!(a, b);
        assert_eq!(a.as_str(), "40.71,-74.01");

        let c = CacheKey::coords(Coordinates { lat: 40.716, lon: -74.006 });
        assert_ne!(a, c);
    }

    #[test]
    fn negative_zero_shares_a_cell() {
        let a = CacheKey::coords(Coordinates { lat: -0.001, lon: 0.0 });
        let b = CacheKey::coords(Coordinates { lat: 0.001, lon: -0.0 });
        assert_eq!(a, b);
        assert_eq!(a.as_str(), "0.00,0.00");
    }

    #[test]
    fn city_keys_ignore_case_and_whitespace() {
        assert_eq!(CacheKey::city("  Berlin "), CacheKey::city("berlin"));
        assert_ne!(CacheKey::city("berlin"), CacheKey::coords(Coordinates { lat: 0.0, lon: 0.0 }));
    }

    #[tokio::test(start_paused = true)]
    async fn entries_expire_after_ttl() {
        let cache = TtlCache::new(Duration::from_secs(300));
        cache.insert("k", 1);

        tokio::time::advance(Duration::from_secs(299)).await;
        assert_eq!(cache.get(&"k"), Some(1));

        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(cache.get(&"k"), None);
        assert!(cache.is_empty(), "expired entry should be evicted on read");
    }

    #[tokio::test(start_paused = true)]
    async fn entry_exactly_at_ttl_is_still_fresh() {
        let cache = TtlCache::new(Duration::from_secs(60));
        cache.insert("k", "v");

        tokio::time::advance(Duration::from_secs(60)).await;
        assert_eq!(cache.get(&"k"), Some("v"));
    }

    #[tokio::test(start_paused = true)]
    async fn insert_refreshes_timestamp() {
        let cache = TtlCache::new(Duration::from_secs(60));
        cache.insert("k", 1);
        tokio::time::advance(Duration::from_secs(50)).await;
        cache.insert("k", 2);
        tokio::time::advance(Duration::from_secs(50)).await;
        assert_eq!(cache.get(&"k"), Some(2));
    }

    #[tokio::test(start_paused = true)]
    async fn re_keyed_value_keeps_its_original_age() {
        let cache = TtlCache::new(Duration::from_secs(300));
        cache.insert("coords", 7);

        tokio::time::advance(Duration::from_secs(250)).await;
        let (value, captured) = cache.get_with_captured(&"coords").expect("fresh");
        cache.insert_at("city", value, captured);

        tokio::time::advance(Duration::from_secs(51)).await;
        assert_eq!(cache.get(&"city"), None);
        assert_eq!(cache.get(&"coords"), None);
    }

    #[tokio::test(start_paused = true)]
    async fn purge_expired_removes_only_stale_entries() {
        let cache = TtlCache::new(Duration::from_secs(60));
        cache.insert("old", 1);
        tokio::time::advance(Duration::from_secs(45)).await;
        cache.insert("new", 2);
        tokio::time::advance(Duration::from_secs(30)).await;

        assert_eq!(cache.purge_expired(), 1);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get(&"new"), Some(2));
    }

    #[test]
    fn remove_and_clear() {
        let cache = TtlCache::new(Duration::from_secs(60));
        cache.insert(1, "a");
        cache.insert(2, "b");
        assert_eq!(cache.remove(&1), Some("a"));
        cache.clear();
        assert!(cache.is_empty());
    }
}
