//! Bounded LRU cache with TTL
//!
//! Backs the receipt replay map, the request-nonce replay map, and the DNS
//! pin cache. Capacity and TTL are constructor injection points so tests can
//! shrink them. Expired entries are dropped lazily on access and can be
//! swept in bulk; overflow evicts the least-recently-used key.
//!
//! `insert_if_absent` runs check-and-insert under a single lock, which is
//! what makes the replay defense sound under concurrent verification.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

struct CacheEntry<V> {
    value: V,
    expires_at: Option<Instant>,
    last_used: u64,
}

impl<V> CacheEntry<V> {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|deadline| deadline <= now)
    }
}

struct Inner<K, V> {
    entries: HashMap<K, CacheEntry<V>>,
    // Monotonic use counter; cheaper than timestamps for LRU ordering
    tick: u64,
}

/// Cache statistics
#[derive(Default)]
pub struct CacheStats {
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    expirations: AtomicU64,
}

impl CacheStats {
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    pub fn evictions(&self) -> u64 {
        self.evictions.load(Ordering::Relaxed)
    }

    pub fn expirations(&self) -> u64 {
        self.expirations.load(Ordering::Relaxed)
    }
}

/// A bounded LRU cache with per-entry TTL.
pub struct TtlCache<K, V> {
    max_size: usize,
    default_ttl: Option<Duration>,
    inner: Mutex<Inner<K, V>>,
    stats: CacheStats,
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    /// Create a cache with a default TTL applied to every insert.
    pub fn new(max_size: usize, default_ttl: Duration) -> Self {
        Self::with_optional_ttl(max_size, Some(default_ttl))
    }

    /// Create a cache whose entries never expire unless a TTL is supplied
    /// per insert (the ISM replay set uses this).
    pub fn unbounded_ttl(max_size: usize) -> Self {
        Self::with_optional_ttl(max_size, None)
    }

    fn with_optional_ttl(max_size: usize, default_ttl: Option<Duration>) -> Self {
        Self {
            max_size: max_size.max(1),
            default_ttl,
            inner: Mutex::new(Inner {
                entries: HashMap::new(),
                tick: 0,
            }),
            stats: CacheStats::default(),
        }
    }

    /// Get a value; expired entries are removed and reported absent.
    pub fn get(&self, key: &K) -> Option<V> {
        let now = Instant::now();
        let mut inner = self.inner.lock().unwrap();

        let expired = match inner.entries.get(key) {
            Some(entry) => entry.is_expired(now),
            None => {
                self.stats.misses.fetch_add(1, Ordering::Relaxed);
                return None;
            }
        };

        if expired {
            inner.entries.remove(key);
            self.stats.expirations.fetch_add(1, Ordering::Relaxed);
            self.stats.misses.fetch_add(1, Ordering::Relaxed);
            return None;
        }

        inner.tick += 1;
        let tick = inner.tick;
        let entry = inner.entries.get_mut(key).unwrap();
        entry.last_used = tick;
        self.stats.hits.fetch_add(1, Ordering::Relaxed);
        Some(entry.value.clone())
    }

    /// Insert with the default TTL.
    pub fn insert(&self, key: K, value: V) {
        self.insert_with_ttl(key, value, self.default_ttl);
    }

    /// Insert with an explicit expiry (`None` = never expires).
    pub fn insert_with_ttl(&self, key: K, value: V, ttl: Option<Duration>) {
        let now = Instant::now();
        let mut inner = self.inner.lock().unwrap();
        self.store(&mut inner, key, value, ttl, now);
    }

    /// Atomically insert unless a live entry already exists.
    ///
    /// Returns `true` if inserted, `false` if the key was already present and
    /// unexpired. This is the replay-defense primitive: two concurrent calls
    /// with the same key cannot both observe `true`.
    pub fn insert_if_absent(&self, key: K, value: V) -> bool {
        self.insert_if_absent_with_ttl(key, value, self.default_ttl)
    }

    /// `insert_if_absent` with an explicit expiry for the new entry.
    pub fn insert_if_absent_with_ttl(&self, key: K, value: V, ttl: Option<Duration>) -> bool {
        let now = Instant::now();
        let mut inner = self.inner.lock().unwrap();

        if let Some(entry) = inner.entries.get(&key) {
            if !entry.is_expired(now) {
                return false;
            }
            inner.entries.remove(&key);
            self.stats.expirations.fetch_add(1, Ordering::Relaxed);
        }

        self.store(&mut inner, key, value, ttl, now);
        true
    }

    /// Remove a key.
    pub fn remove(&self, key: &K) -> Option<V> {
        let mut inner = self.inner.lock().unwrap();
        inner.entries.remove(key).map(|e| e.value)
    }

    /// Drop every expired entry. Cheap enough to run inline on hot paths.
    pub fn sweep_expired(&self) {
        let now = Instant::now();
        let mut inner = self.inner.lock().unwrap();
        let before = inner.entries.len();
        inner.entries.retain(|_, entry| !entry.is_expired(now));
        let removed = (before - inner.entries.len()) as u64;
        if removed > 0 {
            self.stats.expirations.fetch_add(removed, Ordering::Relaxed);
        }
    }

    /// Number of entries, including any not-yet-swept expired ones.
    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }

    fn store(&self, inner: &mut Inner<K, V>, key: K, value: V, ttl: Option<Duration>, now: Instant) {
        if inner.entries.len() >= self.max_size && !inner.entries.contains_key(&key) {
            // Prefer dropping something already expired before evicting
            let expired_key = inner
                .entries
                .iter()
                .find(|(_, e)| e.is_expired(now))
                .map(|(k, _)| k.clone());
            let victim = expired_key.or_else(|| {
                inner
                    .entries
                    .iter()
                    .min_by_key(|(_, e)| e.last_used)
                    .map(|(k, _)| k.clone())
            });
            if let Some(victim) = victim {
                inner.entries.remove(&victim);
                self.stats.evictions.fetch_add(1, Ordering::Relaxed);
            }
        }

        inner.tick += 1;
        let tick = inner.tick;
        inner.entries.insert(
            key,
            CacheEntry {
                value,
                expires_at: ttl.and_then(|ttl| now.checked_add(ttl)),
                last_used: tick,
            },
        );
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_insert_get() {
        let cache: TtlCache<String, i32> = TtlCache::new(10, Duration::from_secs(60));

        cache.insert("key1".to_string(), 100);
        cache.insert("key2".to_string(), 200);

        assert_eq!(cache.get(&"key1".to_string()), Some(100));
        assert_eq!(cache.get(&"key2".to_string()), Some(200));
        assert_eq!(cache.get(&"key3".to_string()), None);
    }

    #[test]
    fn test_lru_eviction() {
        let cache: TtlCache<i32, i32> = TtlCache::new(3, Duration::from_secs(60));

        cache.insert(1, 100);
        cache.insert(2, 200);
        cache.insert(3, 300);

        // Touch key 1 so key 2 becomes the least recently used
        cache.get(&1);

        cache.insert(4, 400);

        assert_eq!(cache.get(&1), Some(100));
        assert_eq!(cache.get(&2), None);
        assert_eq!(cache.get(&3), Some(300));
        assert_eq!(cache.get(&4), Some(400));
        assert_eq!(cache.stats().evictions(), 1);
    }

    #[test]
    fn test_ttl_expiry() {
        let cache: TtlCache<String, i32> = TtlCache::new(10, Duration::from_millis(30));

        cache.insert("key".to_string(), 100);
        assert_eq!(cache.get(&"key".to_string()), Some(100));

        std::thread::sleep(Duration::from_millis(60));
        assert_eq!(cache.get(&"key".to_string()), None);
    }

    #[test]
    fn test_insert_if_absent() {
        let cache: TtlCache<String, ()> = TtlCache::new(10, Duration::from_secs(60));

        assert!(cache.insert_if_absent("nonce".to_string(), ()));
        assert!(!cache.insert_if_absent("nonce".to_string(), ()));
        assert!(cache.insert_if_absent("other".to_string(), ()));
    }

    #[test]
    fn test_insert_if_absent_after_expiry() {
        let cache: TtlCache<String, ()> = TtlCache::new(10, Duration::from_millis(30));

        assert!(cache.insert_if_absent("nonce".to_string(), ()));
        std::thread::sleep(Duration::from_millis(60));
        assert!(cache.insert_if_absent("nonce".to_string(), ()));
    }

    #[test]
    fn test_per_entry_ttl_override() {
        let cache: TtlCache<String, i32> = TtlCache::new(10, Duration::from_secs(60));

        cache.insert_with_ttl("short".to_string(), 1, Some(Duration::from_millis(30)));
        cache.insert("long".to_string(), 2);

        std::thread::sleep(Duration::from_millis(60));
        assert_eq!(cache.get(&"short".to_string()), None);
        assert_eq!(cache.get(&"long".to_string()), Some(2));
    }

    #[test]
    fn test_no_ttl_entries_persist() {
        let cache: TtlCache<String, i32> = TtlCache::unbounded_ttl(10);
        cache.insert("key".to_string(), 1);
        std::thread::sleep(Duration::from_millis(30));
        assert_eq!(cache.get(&"key".to_string()), Some(1));
    }

    #[test]
    fn test_sweep_expired() {
        let cache: TtlCache<i32, ()> = TtlCache::new(10, Duration::from_millis(20));
        for i in 0..5 {
            cache.insert(i, ());
        }
        std::thread::sleep(Duration::from_millis(50));
        cache.sweep_expired();
        assert!(cache.is_empty());
    }

    #[test]
    fn test_capacity_is_bounded() {
        let cache: TtlCache<i32, ()> = TtlCache::new(100, Duration::from_secs(60));
        for i in 0..1_000 {
            cache.insert(i, ());
        }
        assert!(cache.len() <= 100);
    }

    #[test]
    fn test_concurrent_insert_if_absent_single_winner() {
        use std::sync::Arc;

        let cache: Arc<TtlCache<String, ()>> =
            Arc::new(TtlCache::new(100, Duration::from_secs(60)));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cache = cache.clone();
                std::thread::spawn(move || cache.insert_if_absent("same-nonce".to_string(), ()))
            })
            .collect();

        let winners = handles
            .into_iter()
            .map(|handle| handle.join().unwrap())
            .filter(|inserted| *inserted)
            .count();
        assert_eq!(winners, 1);
    }
}
