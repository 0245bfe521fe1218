//! Bounded round-trips
//!
//! Wraps any [`StateStore`] so that no call can hang longer than the
//! configured limit. An elapsed call surfaces as [`StoreError::Timeout`].

use crate::error::{StoreError, StoreResult};
use crate::key::StorageKey;
use crate::store::StateStore;
use async_trait::async_trait;
use std::future::Future;
use std::time::Duration;

pub struct TimeoutStore<S> {
    inner: S,
    limit: Duration,
}

impl<S: StateStore> TimeoutStore<S> {
    pub fn new(inner: S, limit: Duration) -> Self {
        Self { inner, limit }
    }

    pub fn limit(&self) -> Duration {
        self.limit
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    async fn bounded<T>(
        &self,
        op: &'static str,
        fut: impl Future<Output = StoreResult<T>>,
    ) -> StoreResult<T> {
        match tokio::time::timeout(self.limit, fut).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(
                    op,
                    limit_ms = self.limit.as_millis() as u64,
                    "state store call timed out"
                );
                Err(StoreError::Timeout(self.limit))
            }
        }
    }
}

#[async_trait]
impl<S: StateStore> StateStore for TimeoutStore<S> {
    async fn get(&self, key: &StorageKey) -> StoreResult<Option<Vec<u8>>> {
        self.bounded("get", self.inner.get(key)).await
    }

    async fn set(&self, key: &StorageKey, value: &[u8], ttl: Option<Duration>) -> StoreResult<()> {
        self.bounded("set", self.inner.set(key, value, ttl)).await
    }

    async fn delete(&self, key: &StorageKey) -> StoreResult<()> {
        self.bounded("delete", self.inner.delete(key)).await
    }

    async fn increment_with_expiry(
        &self,
        key: &StorageKey,
        amount: i64,
        window: Duration,
    ) -> StoreResult<i64> {
        self.bounded(
            "increment_with_expiry",
            self.inner.increment_with_expiry(key, amount, window),
        )
        .await
    }

    async fn compare_and_set(
        &self,
        key: &StorageKey,
        expected: Option<&[u8]>,
        value: &[u8],
        ttl: Option<Duration>,
    ) -> StoreResult<bool> {
        self.bounded(
            "compare_and_set",
            self.inner.compare_and_set(key, expected, value, ttl),
        )
        .await
    }

    async fn compare_and_delete(&self, key: &StorageKey, expected: &[u8]) -> StoreResult<bool> {
        self.bounded(
            "compare_and_delete",
            self.inner.compare_and_delete(key, expected),
        )
        .await
    }

    async fn ping(&self) -> StoreResult<()> {
        self.bounded("ping", self.inner.ping()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::{Feature, KeyBuilder, Subject};
    use crate::memory::MemoryStateStore;
    use crate::testing::FlakyStore;

    fn key() -> StorageKey {
        KeyBuilder::default().for_subject(&Subject::new(1, 2, 3), &Feature::State, None)
    }

    #[tokio::test]
    async fn test_fast_calls_pass_through() {
        let store = TimeoutStore::new(MemoryStateStore::new(), Duration::from_millis(200));
        store.set(&key(), b"ok", None).await.unwrap();
        assert_eq!(store.get(&key()).await.unwrap(), Some(b"ok".to_vec()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_calls_time_out() {
        let store = TimeoutStore::new(
            FlakyStore::stalling(Duration::from_secs(5)),
            Duration::from_millis(100),
        );

        let err = store.get(&key()).await.unwrap_err();
        assert!(matches!(err, StoreError::Timeout(d) if d == Duration::from_millis(100)));
        assert!(err.is_unavailable());

        let err = store
            .increment_with_expiry(&key(), 1, Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(err.is_unavailable());
    }
}
