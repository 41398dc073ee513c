//! Single-flight behaviour of the TTL response cache under concurrency.

use alphascroll::market::TtlCache;
use alphascroll::ArenaError;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

async fn slow_fetch(calls: Arc<AtomicUsize>, value: u64) -> Result<u64, ArenaError> {
    calls.fetch_add(1, Ordering::SeqCst);
    tokio::time::sleep(Duration::from_millis(100)).await;
    Ok(value)
}

#[tokio::test]
async fn test_concurrent_gets_share_one_producer_call() {
    let cache: TtlCache<String, u64> = TtlCache::new(100);
    let calls = Arc::new(AtomicUsize::new(0));
    let ttl = Duration::from_secs(60);

    let (a, b) = tokio::join!(
        cache.get("topGainers_10".to_string(), ttl, || slow_fetch(calls.clone(), 1)),
        cache.get("topGainers_10".to_string(), ttl, || slow_fetch(calls.clone(), 2)),
    );

    let (a, b) = (a.unwrap(), b.unwrap());
    assert_eq!(a, b, "both callers observe the same value");
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_many_spawned_callers_share_one_producer_call() {
    let cache: Arc<TtlCache<String, u64>> = Arc::new(TtlCache::new(100));
    let calls = Arc::new(AtomicUsize::new(0));

    let handles: Vec<_> = (0..16)
        .map(|i| {
            let cache = cache.clone();
            let calls = calls.clone();
            tokio::spawn(async move {
                cache
                    .get("mining".to_string(), Duration::from_secs(60), || slow_fetch(calls, i))
                    .await
            })
        })
        .collect();

    let mut values = Vec::new();
    for handle in handles {
        values.push(handle.await.unwrap().unwrap());
    }

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(values.windows(2).all(|pair| pair[0] == pair[1]));
}

#[tokio::test]
async fn test_distinct_keys_do_not_block_each_other() {
    let cache: TtlCache<String, u64> = TtlCache::new(100);
    let calls = Arc::new(AtomicUsize::new(0));
    let ttl = Duration::from_secs(60);

    let (a, b) = tokio::join!(
        cache.get("tokenData_btc".to_string(), ttl, || slow_fetch(calls.clone(), 1)),
        cache.get("tokenData_eth".to_string(), ttl, || slow_fetch(calls.clone(), 2)),
    );

    assert_eq!(a.unwrap(), 1);
    assert_eq!(b.unwrap(), 2);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_failure_reaches_every_waiter_and_is_not_cached() {
    let cache: TtlCache<String, u64> = TtlCache::new(100);
    let calls = Arc::new(AtomicUsize::new(0));
    let ttl = Duration::from_secs(60);

    let failing = |calls: Arc<AtomicUsize>| async move {
        calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(100)).await;
        Err::<u64, _>(ArenaError::TransientFetch("rate limited".to_string()))
    };

    let (a, b) = tokio::join!(
        cache.get("trending".to_string(), ttl, || failing(calls.clone())),
        cache.get("trending".to_string(), ttl, || failing(calls.clone())),
    );
    assert_eq!(a, Err(ArenaError::TransientFetch("rate limited".to_string())));
    assert_eq!(b, Err(ArenaError::TransientFetch("rate limited".to_string())));
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    let value = cache
        .get("trending".to_string(), ttl, || slow_fetch(calls.clone(), 9))
        .await
        .unwrap();
    assert_eq!(value, 9);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_purge_drops_expired_entries() {
    let cache: TtlCache<String, u64> = TtlCache::new(100);
    let calls = Arc::new(AtomicUsize::new(0));

    cache
        .get("marketOverview".to_string(), Duration::from_millis(30), || slow_fetch(calls.clone(), 1))
        .await
        .unwrap();
    cache.purge_expired().await;
    assert_eq!(cache.entry_count(), 1);

    // Past the timer wheel's one-second granularity
    tokio::time::sleep(Duration::from_millis(1_500)).await;
    cache.purge_expired().await;
    assert_eq!(cache.entry_count(), 0);
}
