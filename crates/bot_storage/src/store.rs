//! State store contract

use crate::error::StoreResult;
use crate::key::StorageKey;
use async_trait::async_trait;
use std::time::Duration;

/// Key-value backend holding all per-subject state.
///
/// Payloads are opaque bytes. Every method is a single backend round-trip
/// and each one is atomic with respect to the key it touches.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Read a value. Expired entries read as absent.
    async fn get(&self, key: &StorageKey) -> StoreResult<Option<Vec<u8>>>;

    /// Overwrite a value. `ttl` of `None` means no expiry.
    async fn set(&self, key: &StorageKey, value: &[u8], ttl: Option<Duration>) -> StoreResult<()>;

    /// Remove a value. Removing an absent key is not an error.
    async fn delete(&self, key: &StorageKey) -> StoreResult<()>;

    /// Atomically add `amount` to the integer counter at `key`.
    ///
    /// An absent key starts at `amount` and gets `window` as its TTL. An
    /// existing key keeps its remaining TTL. Returns the new count.
    async fn increment_with_expiry(
        &self,
        key: &StorageKey,
        amount: i64,
        window: Duration,
    ) -> StoreResult<i64>;

    /// Write `value` only if the current value equals `expected`
    /// (`None` = the key must be absent). Returns whether the write happened.
    async fn compare_and_set(
        &self,
        key: &StorageKey,
        expected: Option<&[u8]>,
        value: &[u8],
        ttl: Option<Duration>,
    ) -> StoreResult<bool>;

    /// Delete `key` only if it currently holds `expected`.
    async fn compare_and_delete(&self, key: &StorageKey, expected: &[u8]) -> StoreResult<bool>;

    /// Cheap liveness probe.
    async fn ping(&self) -> StoreResult<()>;
}
