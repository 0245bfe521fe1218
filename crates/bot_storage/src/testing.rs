//! Store doubles for exercising fallback paths.

use crate::error::{StoreError, StoreResult};
use crate::key::StorageKey;
use crate::memory::MemoryStateStore;
use crate::store::StateStore;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

/// Memory store that can be switched off. While off, every call fails with
/// `BackendUnavailable` and is counted. Every call, failed or not, is
/// counted in [`FlakyStore::calls`].
#[derive(Debug)]
pub struct FlakyStore {
    inner: MemoryStateStore,
    available: AtomicBool,
    stall: Option<Duration>,
    failures: AtomicUsize,
    calls: AtomicUsize,
}

impl Default for FlakyStore {
    fn default() -> Self {
        Self::new()
    }
}

impl FlakyStore {
    pub fn new() -> Self {
        Self {
            inner: MemoryStateStore::new(),
            available: AtomicBool::new(true),
            stall: None,
            failures: AtomicUsize::new(0),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn unavailable() -> Self {
        let store = Self::new();
        store.set_available(false);
        store
    }

    /// Sleep this long before every call. Pair with a `TimeoutStore`.
    pub fn stalling(delay: Duration) -> Self {
        Self {
            stall: Some(delay),
            ..Self::new()
        }
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub fn failures(&self) -> usize {
        self.failures.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn inner(&self) -> &MemoryStateStore {
        &self.inner
    }

    async fn gate(&self) -> StoreResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.stall {
            tokio::time::sleep(delay).await;
        }
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            self.failures.fetch_add(1, Ordering::SeqCst);
            Err(StoreError::BackendUnavailable("connection refused".to_string()))
        }
    }
}

#[async_trait]
impl StateStore for FlakyStore {
    async fn get(&self, key: &StorageKey) -> StoreResult<Option<Vec<u8>>> {
        self.gate().await?;
        self.inner.get(key).await
    }

    async fn set(&self, key: &StorageKey, value: &[u8], ttl: Option<Duration>) -> StoreResult<()> {
        self.gate().await?;
        self.inner.set(key, value, ttl).await
    }

    async fn delete(&self, key: &StorageKey) -> StoreResult<()> {
        self.gate().await?;
        self.inner.delete(key).await
    }

    async fn increment_with_expiry(
        &self,
        key: &StorageKey,
        amount: i64,
        window: Duration,
    ) -> StoreResult<i64> {
        self.gate().await?;
        self.inner.increment_with_expiry(key, amount, window).await
    }

    async fn compare_and_set(
        &self,
        key: &StorageKey,
        expected: Option<&[u8]>,
        value: &[u8],
        ttl: Option<Duration>,
    ) -> StoreResult<bool> {
        self.gate().await?;
        self.inner.compare_and_set(key, expected, value, ttl).await
    }

    async fn compare_and_delete(&self, key: &StorageKey, expected: &[u8]) -> StoreResult<bool> {
        self.gate().await?;
        self.inner.compare_and_delete(key, expected).await
    }

    async fn ping(&self) -> StoreResult<()> {
        self.gate().await
    }
}
