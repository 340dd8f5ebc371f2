//! TTL cache persisted through a [`SelfHealingStore`].
//!
//! Layout in the backing store:
//! - one [`CacheEntry`] per logical key at `<prefix><key>` (default prefix `product_detail:`),
//! - one [`CacheMetadata`] record at a fixed key outside the prefix (default `cache_metadata`).
//!
//! Expiry is checked at read time: an entry is valid while `now <= expires_at_epoch_ms`. A read
//! that observes an expired entry evicts it. [`TtlCache::evict_expired`] sweeps the rest and is
//! meant to be called opportunistically (e.g. at startup); there is no background timer.
//!
//! Metadata is recomputed from scratch by enumerating the prefix after every mutation, so it is
//! never stale once a mutating call returns. The cost is O(entries) per write.
//!
//! Reads never fail: backend errors and corrupted entries turn into misses. Writes surface
//! backend failures as [`CacheError`].

use crate::clock::{Clock, SystemClock};
use crate::error::{BuildError, CacheError, Classify, ResilienceError};
use crate::healing::{LoadOptions, SaveOptions, SelfHealingStore};
use crate::repair::repair_as;
use crate::retry::RetryPolicy;
use crate::telemetry::{CacheEvent, Event, Telemetry, TelemetrySink};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

pub const DEFAULT_PREFIX: &str = "product_detail:";
pub const DEFAULT_METADATA_KEY: &str = "cache_metadata";
pub const SCHEMA_VERSION: &str = "1.0";

/// A cached value with its absolute expiry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry<T> {
    pub value: T,
    pub expires_at_epoch_ms: u64,
}

impl<T> CacheEntry<T> {
    pub fn is_valid_at(&self, now_millis: u64) -> bool {
        now_millis <= self.expires_at_epoch_ms
    }
}

/// Expiry without the payload, for sweeps that do not care about `T`.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct EntryHeader {
    expires_at_epoch_ms: u64,
}

/// Summary of the cache contents, recomputed after every mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheMetadata {
    #[serde(rename = "lastUpdatedIso")]
    pub last_updated: DateTime<Utc>,
    pub total_entries: usize,
    /// Sum of the serialized entry sizes in bytes.
    pub estimated_size_bytes: u64,
    pub schema_version: String,
}

impl CacheMetadata {
    fn empty(at: DateTime<Utc>) -> Self {
        Self {
            last_updated: at,
            total_entries: 0,
            estimated_size_bytes: 0,
            schema_version: SCHEMA_VERSION.to_string(),
        }
    }
}

/// TTL cache over a [`SelfHealingStore`]. Cheap to clone.
#[derive(Clone, Debug)]
pub struct TtlCache {
    store: SelfHealingStore,
    clock: Arc<dyn Clock>,
    prefix: String,
    metadata_key: String,
    load_options: LoadOptions,
    save_options: SaveOptions,
    telemetry: Telemetry,
}

impl TtlCache {
    /// Cache with the default prefix, metadata key and system clock.
    pub fn new(store: SelfHealingStore) -> Self {
        Self {
            store,
            clock: Arc::new(SystemClock),
            prefix: DEFAULT_PREFIX.to_string(),
            metadata_key: DEFAULT_METADATA_KEY.to_string(),
            load_options: LoadOptions::default(),
            save_options: SaveOptions::default(),
            telemetry: Telemetry::disabled(),
        }
    }

    pub fn builder(store: SelfHealingStore) -> TtlCacheBuilder {
        TtlCacheBuilder { cache: Self::new(store) }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn store(&self) -> &SelfHealingStore {
        &self.store
    }

    fn storage_key(&self, key: &str) -> String {
        format!("{}{}", self.prefix, key)
    }

    fn now(&self) -> u64 {
        self.clock.now_millis()
    }

    fn now_utc(&self) -> DateTime<Utc> {
        i64::try_from(self.now())
            .ok()
            .and_then(DateTime::from_timestamp_millis)
            .unwrap_or(DateTime::UNIX_EPOCH)
    }

    /// Value for `key` if present and not expired. Expired entries are evicted on the way out.
    pub async fn get<T>(&self, key: &str) -> Option<T>
    where
        T: Serialize + DeserializeOwned + Clone,
    {
        let storage_key = self.storage_key(key);
        let outcome = self
            .store
            .safe_load::<Option<CacheEntry<T>>>(&storage_key, None, self.load_options)
            .await;

        if !outcome.success {
            tracing::warn!(key, error = ?outcome.error, "cache: read failed, treating as miss");
            self.emit(CacheEvent::Miss { key: key.to_string() }).await;
            return None;
        }

        let entry = match outcome.data {
            Some(entry) => entry,
            None => {
                if outcome.was_repaired {
                    // unrecoverable entry was replaced by `null`; drop it entirely
                    self.discard(key, &storage_key).await;
                }
                self.emit(CacheEvent::Miss { key: key.to_string() }).await;
                return None;
            }
        };

        if entry.is_valid_at(self.now()) {
            tracing::trace!(key, "cache: hit");
            self.emit(CacheEvent::Hit { key: key.to_string() }).await;
            return Some(entry.value);
        }

        tracing::debug!(key, expired_at = entry.expires_at_epoch_ms, "cache: entry expired");
        self.discard(key, &storage_key).await;
        self.emit(CacheEvent::Expired { key: key.to_string() }).await;
        None
    }

    /// Store `value` under `key` for `ttl`, replacing any existing entry.
    pub async fn set<T>(&self, key: &str, value: &T, ttl: Duration) -> Result<(), CacheError>
    where
        T: Serialize,
    {
        let ttl_ms = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX);
        let entry = CacheEntry { value, expires_at_epoch_ms: self.now().saturating_add(ttl_ms) };
        let outcome = self.store.safe_save(&self.storage_key(key), &entry, self.save_options).await;
        if !outcome.success {
            return Err(CacheError::Write {
                key: key.to_string(),
                reason: outcome.error.unwrap_or_default(),
            });
        }
        self.refresh_metadata().await?;
        Ok(())
    }

    /// Delete `key` whether or not it has expired.
    pub async fn remove(&self, key: &str) -> Result<(), CacheError> {
        let outcome = self.store.safe_remove(&self.storage_key(key), self.save_options).await;
        if !outcome.success {
            return Err(CacheError::Delete {
                key: key.to_string(),
                reason: outcome.error.unwrap_or_default(),
            });
        }
        self.refresh_metadata().await?;
        Ok(())
    }

    /// Delete every entry under the prefix and reset the metadata.
    pub async fn clear_all(&self) -> Result<(), CacheError> {
        let keys = self.store.backend().keys(&self.prefix).await?;
        for storage_key in keys {
            let outcome = self.store.safe_remove(&storage_key, self.save_options).await;
            if !outcome.success {
                return Err(CacheError::Delete {
                    key: storage_key,
                    reason: outcome.error.unwrap_or_default(),
                });
            }
        }
        self.write_metadata(&CacheMetadata::empty(self.now_utc())).await
    }

    /// Current summary. Falls back to an empty summary if none was ever written.
    ///
    /// A corrupted record is recomputed from the entries rather than trusted.
    pub async fn metadata(&self) -> CacheMetadata {
        let fallback = CacheMetadata::empty(self.now_utc());
        let outcome = self.store.safe_load(&self.metadata_key, fallback, self.load_options).await;
        if outcome.was_repaired {
            tracing::warn!(key = %self.metadata_key, "cache: metadata record was corrupted, recomputing");
            match self.refresh_metadata().await {
                Ok(metadata) => return metadata,
                Err(e) => tracing::warn!(error = %e, "cache: metadata recompute failed"),
            }
        }
        outcome.data
    }

    /// Remove every expired entry, and entries unreadable even after repair; returns the count.
    pub async fn evict_expired(&self) -> usize {
        let keys = match self.store.backend().keys(&self.prefix).await {
            Ok(keys) => keys,
            Err(e) => {
                tracing::warn!(error = %e, "cache: sweep could not enumerate entries");
                return 0;
            }
        };

        let now = self.now();
        let mut removed = 0;
        for storage_key in keys {
            let live = match self.store.load_raw(&storage_key).await {
                Ok(Some(raw)) => self
                    .read_header(&raw)
                    .is_some_and(|header| now <= header.expires_at_epoch_ms),
                Ok(None) => continue,
                Err(e) => {
                    tracing::warn!(key = %storage_key, error = %e, "cache: sweep skipped entry");
                    continue;
                }
            };
            if !live && self.store.safe_remove(&storage_key, self.save_options).await.success {
                removed += 1;
            }
        }

        if removed > 0 {
            tracing::debug!(removed, "cache: sweep evicted entries");
            if let Err(e) = self.refresh_metadata().await {
                tracing::warn!(error = %e, "cache: metadata refresh after sweep failed");
            }
            self.emit(CacheEvent::Evicted { count: removed }).await;
        }
        removed
    }

    /// Whether `key` holds a live entry. Does not evict.
    pub async fn contains(&self, key: &str) -> bool {
        match self.store.load_raw(&self.storage_key(key)).await {
            Ok(Some(raw)) => {
                self.read_header(&raw).is_some_and(|header| self.now() <= header.expires_at_epoch_ms)
            }
            _ => false,
        }
    }

    /// Logical keys currently stored, expired or not.
    pub async fn keys(&self) -> Vec<String> {
        match self.store.backend().keys(&self.prefix).await {
            Ok(keys) => keys
                .into_iter()
                .filter_map(|k| k.strip_prefix(&self.prefix).map(str::to_string))
                .collect(),
            Err(e) => {
                tracing::warn!(error = %e, "cache: could not enumerate entries");
                Vec::new()
            }
        }
    }

    /// Serve `key` from the cache, or run `fetch` under `policy` and cache the result for `ttl`.
    ///
    /// A failed write-back is logged; the fetched value is still returned.
    pub async fn get_or_fetch<T, E, Fut, Op>(
        &self,
        key: &str,
        ttl: Duration,
        policy: &RetryPolicy,
        fetch: Op,
    ) -> Result<T, ResilienceError<E>>
    where
        T: Serialize + DeserializeOwned + Clone,
        E: Classify + std::fmt::Display,
        Fut: Future<Output = Result<T, E>>,
        Op: FnMut() -> Fut,
    {
        if let Some(value) = self.get(key).await {
            return Ok(value);
        }
        let value = policy.execute(fetch).await?;
        if let Err(e) = self.set(key, &value, ttl).await {
            tracing::warn!(key, error = %e, "cache: write-back after fetch failed");
        }
        Ok(value)
    }

    /// Expiry of a stored entry, through the same repairs a read would apply. Never writes.
    fn read_header(&self, raw: &str) -> Option<EntryHeader> {
        serde_json::from_str(raw).ok().or_else(|| {
            repair_as::<EntryHeader>(raw, false, self.load_options.repair_attempts)
                .map(|(header, _)| header)
        })
    }

    async fn discard(&self, key: &str, storage_key: &str) {
        if !self.store.safe_remove(storage_key, self.save_options).await.success {
            tracing::warn!(key, "cache: could not evict entry");
            return;
        }
        if let Err(e) = self.refresh_metadata().await {
            tracing::warn!(key, error = %e, "cache: metadata refresh after eviction failed");
        }
    }

    async fn refresh_metadata(&self) -> Result<CacheMetadata, CacheError> {
        let keys = self.store.backend().keys(&self.prefix).await?;
        let mut estimated_size_bytes = 0u64;
        for storage_key in &keys {
            if let Some(raw) = self.store.load_raw(storage_key).await? {
                estimated_size_bytes += raw.len() as u64;
            }
        }
        let metadata = CacheMetadata {
            last_updated: self.now_utc(),
            total_entries: keys.len(),
            estimated_size_bytes,
            schema_version: SCHEMA_VERSION.to_string(),
        };
        self.write_metadata(&metadata).await?;
        Ok(metadata)
    }

    async fn write_metadata(&self, metadata: &CacheMetadata) -> Result<(), CacheError> {
        let outcome = self.store.safe_save(&self.metadata_key, metadata, self.save_options).await;
        if outcome.success {
            Ok(())
        } else {
            Err(CacheError::Write {
                key: self.metadata_key.clone(),
                reason: outcome.error.unwrap_or_default(),
            })
        }
    }

    async fn emit(&self, event: CacheEvent) {
        self.telemetry.emit(Event::Cache(event)).await;
    }
}

/// Builder for [`TtlCache`].
#[derive(Debug)]
pub struct TtlCacheBuilder {
    cache: TtlCache,
}

impl TtlCacheBuilder {
    pub fn prefix(mut self, prefix: impl Into<String>) -> Self {
        self.cache.prefix = prefix.into();
        self
    }

    /// Key of the metadata record. Must not start with the entry prefix.
    pub fn metadata_key(mut self, key: impl Into<String>) -> Self {
        self.cache.metadata_key = key.into();
        self
    }

    pub fn with_clock<C>(mut self, clock: C) -> Self
    where
        C: Clock + 'static,
    {
        self.cache.clock = Arc::new(clock);
        self
    }

    pub fn load_options(mut self, opts: LoadOptions) -> Self {
        self.cache.load_options = opts;
        self
    }

    pub fn save_options(mut self, opts: SaveOptions) -> Self {
        self.cache.save_options = opts;
        self
    }

    pub fn with_sink<S>(mut self, sink: S) -> Self
    where
        S: TelemetrySink,
        S::Future: Send + 'static,
    {
        self.cache.telemetry = Telemetry::new(sink);
        self
    }

    pub fn build(self) -> Result<TtlCache, BuildError> {
        let cache = self.cache;
        if cache.prefix.is_empty() {
            return Err(BuildError::EmptyPrefix);
        }
        if cache.metadata_key.starts_with(&cache.prefix) {
            return Err(BuildError::MetadataKeyUnderPrefix {
                prefix: cache.prefix,
                metadata_key: cache.metadata_key,
            });
        }
        Ok(cache)
    }
}
