//! Per-subject event isolation
//!
//! A short-lived lease in the shared backend that serializes handler bodies
//! for one subject across tasks and across processes. Acquired with
//! compare-and-set on an absent key, released with compare-and-delete on
//! the holder's token, so an expired lease taken over by someone else is
//! never released by the old holder.

use crate::error::{SessionError, SessionResult};
use bot_storage::{Feature, KeyBuilder, SharedStore, StorageKey, Subject};
use std::time::Duration;
use tokio::time::{sleep, Instant};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct IsolationConfig {
    /// Lease length. A crashed holder blocks the subject at most this long.
    pub lease: Duration,
    pub retry_interval: Duration,
    pub max_wait: Duration,
}

impl Default for IsolationConfig {
    fn default() -> Self {
        Self {
            lease: Duration::from_secs(30),
            retry_interval: Duration::from_millis(25),
            max_wait: Duration::from_secs(10),
        }
    }
}

#[derive(Clone)]
pub struct EventIsolation {
    store: SharedStore,
    keys: KeyBuilder,
    config: IsolationConfig,
}

impl EventIsolation {
    pub fn new(store: SharedStore, keys: KeyBuilder, config: IsolationConfig) -> Self {
        Self {
            store,
            keys,
            config,
        }
    }

    /// Wait for the subject's lease, retrying until `max_wait` has passed.
    pub async fn lock(&self, subject: &Subject) -> SessionResult<IsolationGuard> {
        let key = self.keys.for_subject(subject, &Feature::Lock, None);
        let token = Uuid::new_v4().to_string();
        let started = Instant::now();

        loop {
            let acquired = self
                .store
                .compare_and_set(&key, None, token.as_bytes(), Some(self.config.lease))
                .await?;
            if acquired {
                tracing::trace!(%key, "subject lock acquired");
                return Ok(IsolationGuard {
                    store: self.store.clone(),
                    key,
                    token,
                    released: false,
                });
            }
            if started.elapsed() >= self.config.max_wait {
                return Err(SessionError::LockTimeout(self.config.max_wait));
            }
            sleep(self.config.retry_interval).await;
        }
    }
}

/// Held lease. Call [`IsolationGuard::release`] when the handler is done;
/// a guard dropped without it releases in the background.
pub struct IsolationGuard {
    store: SharedStore,
    key: StorageKey,
    token: String,
    released: bool,
}

impl IsolationGuard {
    pub fn key(&self) -> &StorageKey {
        &self.key
    }

    /// Returns `false` if the lease had already expired and moved on.
    pub async fn release(mut self) -> SessionResult<bool> {
        self.released = true;
        let released = self
            .store
            .compare_and_delete(&self.key, self.token.as_bytes())
            .await?;
        if !released {
            tracing::warn!(key = %self.key, "subject lock expired before release");
        }
        Ok(released)
    }
}

impl Drop for IsolationGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let store = self.store.clone();
        let key = self.key.clone();
        let token = std::mem::take(&mut self.token);
        handle.spawn(async move {
            if let Err(e) = store.compare_and_delete(&key, token.as_bytes()).await {
                tracing::warn!(%key, error = %e, "background lock release failed");
            }
        });
    }
}
