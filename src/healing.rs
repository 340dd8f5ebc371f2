//! Self-healing wrapper around a [`KeyValueStore`].
//!
//! Nothing here returns `Err`. Every operation resolves to an outcome struct the caller can
//! inspect:
//!
//! - [`SelfHealingStore::safe_load`] reads, repairs corrupted JSON in place, or replaces it with
//!   the caller's fallback. Absent keys yield the fallback without touching the store.
//! - [`SelfHealingStore::safe_save`] / [`SelfHealingStore::safe_remove`] retry transient backend
//!   failures.
//! - [`SelfHealingStore::check_health`] classifies a key without modifying it.
//!
//! Backend failures are retried with linear backoff (`100ms * attempt` by default). Corruption is
//! not an I/O failure and never consumes an I/O retry unless writing the repaired value fails.
//! These loops are not cancellable: a write always runs to completion or exhausts its retries.

use crate::backoff::Backoff;
use crate::error::StoreError;
use crate::kv::KeyValueStore;
use crate::repair::{repair_as, RepairStrategy};
use crate::telemetry::{Event, StoreEvent, Telemetry, TelemetrySink};
use crate::{Sleeper, TokioSleeper};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Base of the linear backoff between I/O retries.
pub const DEFAULT_IO_BACKOFF: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadOptions {
    /// Attempts at the whole read-and-repair sequence. `0` behaves like `1`.
    pub max_retries: usize,
    /// How many repair strategies may be tried, in their fixed order.
    pub repair_attempts: usize,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self { max_retries: 3, repair_attempts: 3 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SaveOptions {
    /// Attempts at the write or delete. `0` behaves like `1`.
    pub max_retries: usize,
}

impl Default for SaveOptions {
    fn default() -> Self {
        Self { max_retries: 3 }
    }
}

/// Result of [`SelfHealingStore::safe_load`].
#[derive(Debug, Clone, PartialEq)]
pub struct LoadOutcome<T> {
    /// False only when the backend kept failing; `data` is then the fallback.
    pub success: bool,
    pub data: T,
    /// The stored payload was corrupted and has been rewritten (repaired or replaced).
    pub was_repaired: bool,
    pub error: Option<String>,
}

/// Result of [`SelfHealingStore::safe_save`] and [`SelfHealingStore::safe_remove`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteOutcome {
    pub success: bool,
    pub error: Option<String>,
}

impl WriteOutcome {
    fn ok() -> Self {
        Self { success: true, error: None }
    }

    fn failed(error: impl ToString) -> Self {
        Self { success: false, error: Some(error.to_string()) }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecommendedAction {
    Healthy,
    Repair,
    Replace,
}

/// Diagnostic snapshot of one key. Computed on demand, never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthReport {
    pub exists: bool,
    pub is_valid: bool,
    /// Syntax normalization alone would make the payload deserialize.
    pub can_repair: bool,
    pub recommended_action: RecommendedAction,
}

/// Corruption-tolerant facade over a [`KeyValueStore`]. Cheap to clone.
#[derive(Clone)]
pub struct SelfHealingStore {
    backend: Arc<dyn KeyValueStore>,
    backoff: Backoff,
    sleeper: Arc<dyn Sleeper>,
    telemetry: Telemetry,
}

impl std::fmt::Debug for SelfHealingStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SelfHealingStore")
            .field("backend", &"<kv>")
            .field("backoff", &self.backoff)
            .field("sleeper", &self.sleeper)
            .field("telemetry", &self.telemetry)
            .finish()
    }
}

impl SelfHealingStore {
    pub fn new<S>(backend: S) -> Self
    where
        S: KeyValueStore + 'static,
    {
        Self::from_arc(Arc::new(backend))
    }

    pub fn from_arc(backend: Arc<dyn KeyValueStore>) -> Self {
        Self {
            backend,
            backoff: Backoff::linear(DEFAULT_IO_BACKOFF),
            sleeper: Arc::new(TokioSleeper),
            telemetry: Telemetry::disabled(),
        }
    }

    /// Change the linear backoff base used between I/O retries.
    pub fn with_io_backoff(mut self, base: Duration) -> Self {
        self.backoff = Backoff::linear(base);
        self
    }

    pub fn with_sleeper<S>(mut self, sleeper: S) -> Self
    where
        S: Sleeper + 'static,
    {
        self.sleeper = Arc::new(sleeper);
        self
    }

    pub fn with_sink<S>(mut self, sink: S) -> Self
    where
        S: TelemetrySink,
        S::Future: Send + 'static,
    {
        self.telemetry = Telemetry::new(sink);
        self
    }

    pub fn with_telemetry(mut self, telemetry: Telemetry) -> Self {
        self.telemetry = telemetry;
        self
    }

    pub fn backend(&self) -> &Arc<dyn KeyValueStore> {
        &self.backend
    }

    /// Raw payload, bypassing deserialization and repair.
    pub async fn load_raw(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.backend.get(key).await
    }

    /// Load `key`, repairing or replacing corrupted data.
    pub async fn safe_load<T>(&self, key: &str, fallback: T, opts: LoadOptions) -> LoadOutcome<T>
    where
        T: Serialize + DeserializeOwned + Clone,
    {
        let result = self
            .with_io_retries(key, opts.max_retries, || self.load_once(key, &fallback, opts))
            .await;
        match result {
            Ok((data, was_repaired)) => LoadOutcome { success: true, data, was_repaired, error: None },
            Err(e) => LoadOutcome {
                success: false,
                data: fallback,
                was_repaired: false,
                error: Some(e.to_string()),
            },
        }
    }

    /// Serialize and write `value` under `key`.
    pub async fn safe_save<T>(&self, key: &str, value: &T, opts: SaveOptions) -> WriteOutcome
    where
        T: Serialize + ?Sized,
    {
        let payload = match serde_json::to_string(value) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::error!(key, error = %e, "store: value is not serializable");
                return WriteOutcome::failed(e);
            }
        };
        match self.with_io_retries(key, opts.max_retries, || self.backend.set(key, &payload)).await {
            Ok(()) => WriteOutcome::ok(),
            Err(e) => WriteOutcome::failed(e),
        }
    }

    /// Delete `key`. Deleting an absent key succeeds.
    pub async fn safe_remove(&self, key: &str, opts: SaveOptions) -> WriteOutcome {
        match self.with_io_retries(key, opts.max_retries, || self.backend.delete(key)).await {
            Ok(()) => WriteOutcome::ok(),
            Err(e) => WriteOutcome::failed(e),
        }
    }

    /// Classify `key` as healthy, repairable or needing replacement, without side effects.
    ///
    /// An absent key is reported healthy: loading it simply yields the fallback. A key that cannot
    /// be read at all is reported invalid with `Replace`.
    pub async fn check_health<T>(&self, key: &str) -> HealthReport
    where
        T: DeserializeOwned,
    {
        let raw = match self.backend.get(key).await {
            Ok(Some(raw)) => raw,
            Ok(None) => {
                return HealthReport {
                    exists: false,
                    is_valid: true,
                    can_repair: false,
                    recommended_action: RecommendedAction::Healthy,
                }
            }
            Err(e) => {
                tracing::warn!(key, error = %e, "store: health check could not read key");
                return HealthReport {
                    exists: false,
                    is_valid: false,
                    can_repair: false,
                    recommended_action: RecommendedAction::Replace,
                };
            }
        };

        if serde_json::from_str::<T>(&raw).is_ok() {
            return HealthReport {
                exists: true,
                is_valid: true,
                can_repair: false,
                recommended_action: RecommendedAction::Healthy,
            };
        }
        let can_repair = RepairStrategy::NormalizeSyntax
            .candidates(&raw, false)
            .iter()
            .any(|candidate| serde_json::from_str::<T>(candidate).is_ok());
        HealthReport {
            exists: true,
            is_valid: false,
            can_repair,
            recommended_action: if can_repair {
                RecommendedAction::Repair
            } else {
                RecommendedAction::Replace
            },
        }
    }

    /// One pass of read, deserialize, repair-or-replace. Only backend failures are errors.
    async fn load_once<T>(
        &self,
        key: &str,
        fallback: &T,
        opts: LoadOptions,
    ) -> Result<(T, bool), StoreError>
    where
        T: Serialize + DeserializeOwned + Clone,
    {
        let Some(raw) = self.backend.get(key).await? else {
            return Ok((fallback.clone(), false));
        };
        if let Ok(value) = serde_json::from_str::<T>(&raw) {
            return Ok((value, false));
        }

        tracing::warn!(key, bytes = raw.len(), "store: stored payload does not deserialize");
        let expects_collection =
            serde_json::to_value(fallback).map(|v| v.is_array()).unwrap_or(false);

        let repaired = repair_as::<T>(&raw, expects_collection, opts.repair_attempts);
        if let Some((value, strategy)) = repaired {
            self.backend.set(key, &serde_json::to_string(&value)?).await?;
            tracing::info!(key, strategy = strategy.name(), "store: repaired corrupted payload");
            self.telemetry
                .emit(Event::Store(StoreEvent::Repaired { key: key.to_string(), strategy: strategy.name() }))
                .await;
            return Ok((value, true));
        }

        self.backend.set(key, &serde_json::to_string(fallback)?).await?;
        tracing::warn!(key, "store: payload unrecoverable, replaced with fallback");
        self.telemetry
            .emit(Event::Store(StoreEvent::ReplacedWithFallback { key: key.to_string() }))
            .await;
        Ok((fallback.clone(), true))
    }

    async fn with_io_retries<R, Fut, Op>(
        &self,
        key: &str,
        max_retries: usize,
        mut op: Op,
    ) -> Result<R, StoreError>
    where
        Fut: Future<Output = Result<R, StoreError>>,
        Op: FnMut() -> Fut,
    {
        let attempts = max_retries.max(1);
        let mut attempt = 1;
        loop {
            let error = match op().await {
                Ok(value) => return Ok(value),
                Err(e) => e,
            };
            if attempt >= attempts {
                tracing::error!(key, attempts, error = %error, "store: i/o retries exhausted");
                self.telemetry
                    .emit(Event::Store(StoreEvent::IoFailed {
                        key: key.to_string(),
                        attempts,
                        error: error.to_string(),
                    }))
                    .await;
                return Err(error);
            }
            tracing::debug!(key, attempt, error = %error, "store: i/o failure, retrying");
            self.telemetry
                .emit(Event::Store(StoreEvent::IoRetry {
                    key: key.to_string(),
                    attempt,
                    error: error.to_string(),
                }))
                .await;
            self.sleeper.sleep(self.backoff.delay(attempt)).await;
            attempt += 1;
        }
    }
}
