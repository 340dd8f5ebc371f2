#![allow(dead_code)]

use async_trait::async_trait;
use lifeline::{KeyValueStore, MemoryStore, StoreError};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Memory-backed store whose next N gets/sets/deletes fail with `StoreError::Unavailable`.
#[derive(Clone, Default)]
pub struct FlakyStore {
    pub inner: MemoryStore,
    failing_gets: Arc<AtomicUsize>,
    failing_sets: Arc<AtomicUsize>,
    failing_deletes: Arc<AtomicUsize>,
    set_calls: Arc<AtomicUsize>,
}

fn take(counter: &AtomicUsize) -> bool {
    counter.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1)).is_ok()
}

impl FlakyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_next_gets(&self, n: usize) {
        self.failing_gets.store(n, Ordering::SeqCst);
    }

    pub fn fail_next_sets(&self, n: usize) {
        self.failing_sets.store(n, Ordering::SeqCst);
    }

    pub fn fail_next_deletes(&self, n: usize) {
        self.failing_deletes.store(n, Ordering::SeqCst);
    }

    pub fn set_calls(&self) -> usize {
        self.set_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl KeyValueStore for FlakyStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        if take(&self.failing_gets) {
            return Err(StoreError::Unavailable(format!("get {key}")));
        }
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.set_calls.fetch_add(1, Ordering::SeqCst);
        if take(&self.failing_sets) {
            return Err(StoreError::Unavailable(format!("set {key}")));
        }
        self.inner.set(key, value).await
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        if take(&self.failing_deletes) {
            return Err(StoreError::Unavailable(format!("delete {key}")));
        }
        self.inner.delete(key).await
    }

    async fn keys(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        self.inner.keys(prefix).await
    }
}
