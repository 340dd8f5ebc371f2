mod common;

use common::FlakyStore;
use lifeline::{
    CacheError, FileStore, InstantSleeper, KeyValueStore, ManualClock, MemoryStore, RetryPolicy,
    SelfHealingStore, TransportError, TtlCache,
};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct ProductDetail {
    id: u32,
    title: String,
    price_cents: u64,
}

fn lamp() -> ProductDetail {
    ProductDetail { id: 42, title: "desk lamp".into(), price_cents: 1999 }
}

fn instant_store<S: KeyValueStore + 'static>(backend: S) -> SelfHealingStore {
    SelfHealingStore::new(backend).with_sleeper(InstantSleeper)
}

#[tokio::test]
async fn value_expires_after_ttl_on_wall_clock() {
    let cache = TtlCache::new(instant_store(MemoryStore::new()));

    cache.set("42", &lamp(), Duration::from_millis(100)).await.unwrap();
    assert_eq!(cache.get::<ProductDetail>("42").await, Some(lamp()));

    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(cache.get::<ProductDetail>("42").await, None);
}

#[tokio::test]
async fn overwrite_keeps_single_entry() {
    let clock = ManualClock::new(1_000);
    let cache = TtlCache::builder(instant_store(MemoryStore::new()))
        .with_clock(clock)
        .build()
        .unwrap();

    cache.set("42", &lamp(), Duration::from_secs(60)).await.unwrap();
    let updated = ProductDetail { price_cents: 1499, ..lamp() };
    cache.set("42", &updated, Duration::from_secs(60)).await.unwrap();

    assert_eq!(cache.get::<ProductDetail>("42").await, Some(updated));
    assert_eq!(cache.metadata().await.total_entries, 1);
}

#[tokio::test]
async fn get_or_fetch_caches_successful_fetch() {
    let clock = ManualClock::new(1_000);
    let cache = TtlCache::builder(instant_store(MemoryStore::new()))
        .with_clock(clock.clone())
        .build()
        .unwrap();
    let policy = RetryPolicy::builder().with_sleeper(InstantSleeper).build().unwrap();
    let fetches = AtomicUsize::new(0);

    let fetch = || {
        let n = fetches.fetch_add(1, Ordering::SeqCst);
        async move {
            if n == 0 {
                Err(TransportError::no_response("flaky network"))
            } else {
                Ok(lamp())
            }
        }
    };

    let first = cache.get_or_fetch("42", Duration::from_secs(30), &policy, fetch).await.unwrap();
    assert_eq!(first, lamp());
    assert_eq!(fetches.load(Ordering::SeqCst), 2);

    let second = cache.get_or_fetch("42", Duration::from_secs(30), &policy, fetch).await.unwrap();
    assert_eq!(second, lamp());
    assert_eq!(fetches.load(Ordering::SeqCst), 2, "served from cache");

    clock.advance(30_001);
    cache.get_or_fetch("42", Duration::from_secs(30), &policy, fetch).await.unwrap();
    assert_eq!(fetches.load(Ordering::SeqCst), 3, "refetched after expiry");
}

#[tokio::test]
async fn get_or_fetch_propagates_client_errors_without_caching() {
    let cache = TtlCache::new(instant_store(MemoryStore::new()));
    let policy = RetryPolicy::builder().with_sleeper(InstantSleeper).build().unwrap();

    let result = cache
        .get_or_fetch("404", Duration::from_secs(30), &policy, || async {
            Err::<ProductDetail, _>(TransportError::status(404, "gone"))
        })
        .await;

    assert!(result.unwrap_err().is_inner());
    assert!(cache.keys().await.is_empty());
}

#[tokio::test]
async fn set_surfaces_persistent_write_failures() {
    let backend = FlakyStore::new();
    backend.fail_next_sets(usize::MAX);
    let cache = TtlCache::new(instant_store(backend));

    let err = cache.set("42", &lamp(), Duration::from_secs(1)).await.unwrap_err();
    assert!(matches!(err, CacheError::Write { ref key, .. } if key == "42"));
}

#[tokio::test]
async fn get_swallows_read_failures() {
    let backend = FlakyStore::new();
    let cache = TtlCache::new(instant_store(backend.clone()));
    cache.set("42", &lamp(), Duration::from_secs(60)).await.unwrap();

    backend.fail_next_gets(usize::MAX);
    assert_eq!(cache.get::<ProductDetail>("42").await, None);

    backend.fail_next_gets(0);
    assert_eq!(cache.get::<ProductDetail>("42").await, Some(lamp()));
}

#[tokio::test]
async fn file_backed_cache_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let clock = ManualClock::new(5_000);

    {
        let store = instant_store(FileStore::open(dir.path()).await.unwrap());
        let cache = TtlCache::builder(store).with_clock(clock.clone()).build().unwrap();
        cache.set("42", &lamp(), Duration::from_secs(10)).await.unwrap();
        cache.set("7", &lamp(), Duration::from_millis(1)).await.unwrap();
    }

    clock.advance(100);
    let store = instant_store(FileStore::open(dir.path()).await.unwrap());
    let cache = TtlCache::builder(store).with_clock(clock).build().unwrap();

    assert_eq!(cache.evict_expired().await, 1);
    assert_eq!(cache.get::<ProductDetail>("42").await, Some(lamp()));
    let meta = cache.metadata().await;
    assert_eq!(meta.total_entries, 1);
    assert!(meta.estimated_size_bytes > 0);
}

#[tokio::test]
async fn custom_namespace_isolates_caches() {
    let backend = MemoryStore::new();
    let products = TtlCache::builder(instant_store(backend.clone()))
        .prefix("product_detail:")
        .metadata_key("product_cache_meta")
        .build()
        .unwrap();
    let reviews = TtlCache::builder(instant_store(backend.clone()))
        .prefix("reviews:")
        .metadata_key("review_cache_meta")
        .build()
        .unwrap();

    products.set("1", &lamp(), Duration::from_secs(60)).await.unwrap();
    reviews.set("1", &vec!["great"], Duration::from_secs(60)).await.unwrap();
    reviews.clear_all().await.unwrap();

    assert_eq!(products.get::<ProductDetail>("1").await, Some(lamp()));
    assert_eq!(products.metadata().await.total_entries, 1);
    assert_eq!(reviews.metadata().await.total_entries, 0);
}
