//! In-process state store
//!
//! Used for single-instance deployments and tests. Expiry is lazy: an
//! expired entry is dropped the next time its key is touched, and every
//! `sweep_every` writes the whole map is swept so keys that are never touched
//! again (old throttle windows) do not pile up.

use crate::error::{StoreError, StoreResult};
use crate::key::StorageKey;
use crate::store::StateStore;
use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Writes between two sweeps of expired entries.
pub const DEFAULT_SWEEP_EVERY: u64 = 1024;

#[derive(Debug, Clone)]
struct Slot {
    value: Vec<u8>,
    expires_at: Option<Instant>,
}

impl Slot {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|exp| now >= exp)
    }
}

#[derive(Debug)]
pub struct MemoryStateStore {
    slots: DashMap<String, Slot>,
    writes: AtomicU64,
    sweep_every: u64,
}

impl Default for MemoryStateStore {
    fn default() -> Self {
        Self {
            slots: DashMap::new(),
            writes: AtomicU64::new(0),
            sweep_every: DEFAULT_SWEEP_EVERY,
        }
    }
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sweep expired entries every `writes` writes. Clamped to at least 1.
    pub fn with_sweep_every(mut self, writes: u64) -> Self {
        self.sweep_every = writes.max(1);
        self
    }

    /// Drop every expired entry. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.slots.len();
        self.slots.retain(|_, slot| !slot.is_expired(now));
        let removed = before.saturating_sub(self.slots.len());
        if removed > 0 {
            tracing::debug!(removed, "purged expired entries");
        }
        removed
    }

    /// Must not be called while holding an entry guard.
    fn record_write(&self) {
        let writes = self.writes.fetch_add(1, Ordering::Relaxed) + 1;
        if writes % self.sweep_every == 0 {
            self.purge_expired();
        }
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.slots.iter().filter(|s| !s.value().is_expired(now)).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remaining TTL of a key, `None` if absent or without expiry.
    pub fn ttl(&self, key: &StorageKey) -> Option<Duration> {
        let now = Instant::now();
        let slot = self.slots.get(key.as_str())?;
        slot.expires_at
            .filter(|exp| *exp > now)
            .map(|exp| exp - now)
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn get(&self, key: &StorageKey) -> StoreResult<Option<Vec<u8>>> {
        let now = Instant::now();
        if let Some(slot) = self.slots.get(key.as_str()) {
            if !slot.is_expired(now) {
                return Ok(Some(slot.value.clone()));
            }
        } else {
            return Ok(None);
        }
        self.slots
            .remove_if(key.as_str(), |_, slot| slot.is_expired(now));
        Ok(None)
    }

    async fn set(&self, key: &StorageKey, value: &[u8], ttl: Option<Duration>) -> StoreResult<()> {
        let expires_at = ttl.map(|d| Instant::now() + d);
        self.slots.insert(
            key.as_str().to_string(),
            Slot {
                value: value.to_vec(),
                expires_at,
            },
        );
        self.record_write();
        Ok(())
    }

    async fn delete(&self, key: &StorageKey) -> StoreResult<()> {
        self.slots.remove(key.as_str());
        Ok(())
    }

    async fn increment_with_expiry(
        &self,
        key: &StorageKey,
        amount: i64,
        window: Duration,
    ) -> StoreResult<i64> {
        let now = Instant::now();
        // The entry guard holds the shard lock, which serializes concurrent
        // increments on the same key.
        let count = match self.slots.entry(key.as_str().to_string()) {
            Entry::Occupied(mut occupied) if !occupied.get().is_expired(now) => {
                let slot = occupied.get_mut();
                let current = parse_counter(key, &slot.value)?;
                let next = current + amount;
                slot.value = next.to_string().into_bytes();
                if slot.expires_at.is_none() {
                    slot.expires_at = Some(now + window);
                }
                Ok(next)
            }
            Entry::Occupied(mut occupied) => {
                occupied.insert(Slot {
                    value: amount.to_string().into_bytes(),
                    expires_at: Some(now + window),
                });
                Ok(amount)
            }
            Entry::Vacant(vacant) => {
                vacant.insert(Slot {
                    value: amount.to_string().into_bytes(),
                    expires_at: Some(now + window),
                });
                Ok(amount)
            }
        };
        self.record_write();
        count
    }

    async fn compare_and_set(
        &self,
        key: &StorageKey,
        expected: Option<&[u8]>,
        value: &[u8],
        ttl: Option<Duration>,
    ) -> StoreResult<bool> {
        let now = Instant::now();
        let slot = Slot {
            value: value.to_vec(),
            expires_at: ttl.map(|d| now + d),
        };
        let swapped = match self.slots.entry(key.as_str().to_string()) {
            Entry::Occupied(mut occupied) => {
                let current = Some(occupied.get())
                    .filter(|s| !s.is_expired(now))
                    .map(|s| s.value.as_slice());
                if current != expected {
                    return Ok(false);
                }
                occupied.insert(slot);
                Ok(true)
            }
            Entry::Vacant(vacant) => {
                if expected.is_some() {
                    return Ok(false);
                }
                vacant.insert(slot);
                Ok(true)
            }
        };
        self.record_write();
        swapped
    }

    async fn compare_and_delete(&self, key: &StorageKey, expected: &[u8]) -> StoreResult<bool> {
        let now = Instant::now();
        let removed = self.slots.remove_if(key.as_str(), |_, slot| {
            !slot.is_expired(now) && slot.value == expected
        });
        Ok(removed.is_some())
    }

    async fn ping(&self) -> StoreResult<()> {
        Ok(())
    }
}

fn parse_counter(key: &StorageKey, bytes: &[u8]) -> StoreResult<i64> {
    std::str::from_utf8(bytes)
        .ok()
        .and_then(|s| s.parse::<i64>().ok())
        .ok_or_else(|| StoreError::InvalidValue {
            key: key.to_string(),
            reason: "not an integer counter".to_string(),
        })
}
