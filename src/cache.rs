//! Time-to-live memoization for query results.
//!
//! Sits in front of the store in the HTTP service. Keys are derived from
//! the query (`postcode_lookup_{code}`, `postcode_radius_{code}_{r}`,
//! `postcode_distance_{from}_{to}`); values expire a fixed duration after
//! insertion. Absent results are cached like any other value, errors never
//! are. When full, the least recently used entry is evicted.

use std::future::Future;
use std::num::NonZeroUsize;
use std::time::{Duration, Instant};

use lru::LruCache;
use tokio::sync::Mutex;

#[derive(Debug, Clone)]
struct CacheEntry<V> {
    value: V,
    expires_at: Instant,
}

/// Bounded LRU cache with a fixed time-to-live.
#[derive(Debug)]
pub struct TtlCache<V> {
    entries: Mutex<LruCache<String, CacheEntry<V>>>,
    ttl: Duration,
}

impl<V: Clone + Send + Sync> TtlCache<V> {
    pub fn new(ttl: Duration, max_entries: usize) -> Self {
        let capacity = NonZeroUsize::new(max_entries).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
            ttl,
        }
    }

    pub async fn get(&self, key: &str) -> Option<V> {
        let mut entries = self.entries.lock().await;
        let now = Instant::now();
        match entries.get(key).map(|e| (now < e.expires_at).then(|| e.value.clone())) {
            Some(Some(value)) => Some(value),
            Some(None) => {
                entries.pop(key);
                None
            }
            None => None,
        }
    }

    pub async fn insert(&self, key: String, value: V) {
        let expires_at = Instant::now() + self.ttl;
        self.entries
            .lock()
            .await
            .put(key, CacheEntry { value, expires_at });
    }

    /// Return the cached value for `key`, or compute, cache and return it.
    ///
    /// Concurrent misses on the same key may both compute; the last write
    /// wins.
    pub async fn get_or_try_insert_with<F, E>(&self, key: String, compute: F) -> Result<V, E>
    where
        F: Future<Output = Result<V, E>>,
    {
        if let Some(hit) = self.get(&key).await {
            tracing::trace!(%key, "cache hit");
            return Ok(hit);
        }

        let value = compute.await?;
        self.insert(key, value.clone()).await;
        Ok(value)
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn memoizes_until_expiry() {
        let cache: TtlCache<Option<u32>> = TtlCache::new(Duration::from_millis(50), 16);
        let calls = AtomicUsize::new(0);

        for _ in 0..3 {
            let v = cache
                .get_or_try_insert_with("postcode_lookup_M1 1AE".into(), async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, ()>(None)
                })
                .await
                .unwrap();
            assert_eq!(v, None);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        tokio::time::sleep(Duration::from_millis(120)).await;
        assert_eq!(cache.get("postcode_lookup_M1 1AE").await, None);
        cache
            .get_or_try_insert_with("postcode_lookup_M1 1AE".into(), async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok::<_, ()>(Some(7))
            })
            .await
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn errors_are_not_cached() {
        let cache: TtlCache<u32> = TtlCache::new(Duration::from_secs(60), 16);
        let err = cache
            .get_or_try_insert_with("k".into(), async { Err::<u32, &str>("boom") })
            .await;
        assert_eq!(err, Err("boom"));
        assert!(cache.is_empty().await);
    }

    #[tokio::test]
    async fn capacity_is_bounded() {
        let cache: TtlCache<u32> = TtlCache::new(Duration::from_secs(60), 2);
        cache.insert("a".into(), 1).await;
        cache.insert("b".into(), 2).await;
        cache.insert("c".into(), 3).await;

        assert_eq!(cache.len().await, 2);
        assert_eq!(cache.get("a").await, None);
        assert_eq!(cache.get("c").await, Some(3));

        // Overwriting an existing key does not evict.
        cache.insert("c".into(), 4).await;
        assert_eq!(cache.get("b").await, Some(2));
        assert_eq!(cache.get("c").await, Some(4));
    }

    #[tokio::test]
    async fn recently_read_entries_survive_eviction() {
        let cache: TtlCache<u32> = TtlCache::new(Duration::from_secs(60), 2);
        cache.insert("a".into(), 1).await;
        cache.insert("b".into(), 2).await;

        // Reading "a" makes "b" the least recently used.
        assert_eq!(cache.get("a").await, Some(1));
        cache.insert("c".into(), 3).await;

        assert_eq!(cache.get("b").await, None);
        assert_eq!(cache.get("a").await, Some(1));
        assert_eq!(cache.get("c").await, Some(3));
    }

    #[tokio::test]
    async fn expired_entries_are_dropped_on_read() {
        let cache: TtlCache<u32> = TtlCache::new(Duration::from_millis(20), 4);
        cache.insert("a".into(), 1).await;
        tokio::time::sleep(Duration::from_millis(60)).await;

        assert_eq!(cache.get("a").await, None);
        assert!(cache.is_empty().await);
    }
}
