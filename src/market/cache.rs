//! TTL response cache with single-flight producers.
//!
//! Concurrent lookups of a key that is missing or stale share one producer
//! call. A failed producer is reported to every caller that waited on it and
//! leaves nothing behind, so the next lookup invokes the producer again.

use moka::future::Cache;
use moka::Expiry;
use std::future::Future;
use std::hash::Hash;
use std::time::{Duration, Instant};
use tracing::debug;

use crate::error::{ArenaError, Result};

/// Resolved value plus the freshness data it was stored with.
#[derive(Debug, Clone)]
struct CacheEntry<V> {
    value: V,
    stored_at: Instant,
    ttl: Duration,
}

impl<V> CacheEntry<V> {
    fn is_fresh_for(&self, ttl: Duration) -> bool {
        self.stored_at.elapsed() < ttl
    }
}

/// Evicts each entry once the TTL it was stored with has elapsed.
struct StoredTtl;

impl<K, V> Expiry<K, CacheEntry<V>> for StoredTtl {
    fn expire_after_create(
        &self,
        _key: &K,
        value: &CacheEntry<V>,
        _created_at: Instant,
    ) -> Option<Duration> {
        Some(value.ttl)
    }
}

/// Memoizing cache keyed by `K`.
#[derive(Clone)]
pub struct TtlCache<K, V>
where
    K: Hash + Eq + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    inner: Cache<K, CacheEntry<V>>,
}

impl<K, V> TtlCache<K, V>
where
    K: Hash + Eq + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    pub fn new(max_entries: u64) -> Self {
        let inner = Cache::builder()
            .max_capacity(max_entries)
            .expire_after(StoredTtl)
            .build();
        Self { inner }
    }

    /// Returns the cached value for `key` if it is younger than `ttl`,
    /// otherwise runs `producer` (at most once across concurrent callers)
    /// and caches its result.
    pub async fn get<F, Fut>(&self, key: K, ttl: Duration, producer: F) -> Result<V>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V>>,
    {
        if let Some(entry) = self.inner.get(&key).await {
            if entry.is_fresh_for(ttl) {
                return Ok(entry.value);
            }
            // Fresh by its own TTL but stale for this caller
            self.inner.invalidate(&key).await;
        }

        let entry = self
            .inner
            .try_get_with(key, async move {
                let value = producer().await?;
                debug!("Cache producer resolved");
                Ok::<_, ArenaError>(CacheEntry {
                    value,
                    stored_at: Instant::now(),
                    ttl,
                })
            })
            .await
            .map_err(|shared| (*shared).clone())?;

        Ok(entry.value)
    }

    /// Removes entries whose TTL has elapsed.
    ///
    /// Expiry runs on moka's timer wheel, whose finest buckets are about one
    /// second wide, so an entry may outlive its TTL by up to that much here.
    /// `get` checks freshness itself and never serves such an entry.
    pub async fn purge_expired(&self) {
        self.inner.run_pending_tasks().await;
    }

    pub fn invalidate_all(&self) {
        self.inner.invalidate_all();
    }

    /// Approximate number of cached entries.
    pub fn entry_count(&self) -> u64 {
        self.inner.entry_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_fresh_entry_skips_producer() {
        let cache: TtlCache<String, u32> = TtlCache::new(100);
        let calls = AtomicUsize::new(0);

        for _ in 0..3 {
            let value = cache
                .get("eth".to_string(), Duration::from_secs(60), || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, ArenaError>(7)
                })
                .await
                .unwrap();
            assert_eq!(value, 7);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_stale_entry_is_refreshed() {
        let cache: TtlCache<String, u32> = TtlCache::new(100);
        let calls = Arc::new(AtomicUsize::new(0));

        let fetch = |calls: Arc<AtomicUsize>| async move {
            Ok::<_, ArenaError>(calls.fetch_add(1, Ordering::SeqCst) as u32)
        };

        let ttl = Duration::from_millis(50);
        assert_eq!(cache.get("k".into(), ttl, || fetch(calls.clone())).await.unwrap(), 0);
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(cache.get("k".into(), ttl, || fetch(calls.clone())).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_shorter_caller_ttl_forces_refresh() {
        let cache: TtlCache<String, u32> = TtlCache::new(100);
        cache
            .get("k".into(), Duration::from_secs(60), || async { Ok::<_, ArenaError>(1) })
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        let value = cache
            .get("k".into(), Duration::from_millis(10), || async { Ok::<_, ArenaError>(2) })
            .await
            .unwrap();
        assert_eq!(value, 2);
    }

    #[tokio::test]
    async fn test_failure_is_not_cached() {
        let cache: TtlCache<String, u32> = TtlCache::new(100);

        let result = cache
            .get("k".into(), Duration::from_secs(60), || async {
                Err::<u32, _>(ArenaError::TransientFetch("upstream down".into()))
            })
            .await;
        assert_eq!(result, Err(ArenaError::TransientFetch("upstream down".into())));

        let value = cache
            .get("k".into(), Duration::from_secs(60), || async { Ok::<_, ArenaError>(3) })
            .await
            .unwrap();
        assert_eq!(value, 3);
    }

    #[tokio::test]
    async fn test_invalidate_all() {
        let cache: TtlCache<String, u32> = TtlCache::new(100);
        cache
            .get("k".into(), Duration::from_secs(60), || async { Ok::<_, ArenaError>(1) })
            .await
            .unwrap();
        cache.invalidate_all();

        let value = cache
            .get("k".into(), Duration::from_secs(60), || async { Ok::<_, ArenaError>(2) })
            .await
            .unwrap();
        assert_eq!(value, 2);
    }
}
