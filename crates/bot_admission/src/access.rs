//! Eligibility gate
//!
//! Answers "is this subject allowed to talk to the bot at all" from the
//! relational store's blocked/permitted flags. Lookups go through a bounded
//! LRU cache with a short TTL; a miss performs the authoritative lookup
//! before the subject's first event is decided. Failed lookups are never
//! cached.

use crate::decision::{AccessDecision, DenyReason, FailPolicy};
use async_trait::async_trait;
use bot_storage::Subject;
use lru::LruCache;
use std::collections::HashSet;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Eligibility {
    pub user_blocked: bool,
    pub chat_permitted: bool,
}

impl Default for Eligibility {
    fn default() -> Self {
        Self {
            user_blocked: false,
            chat_permitted: true,
        }
    }
}

impl Eligibility {
    pub fn decision(&self) -> AccessDecision {
        if self.user_blocked {
            AccessDecision::Deny(DenyReason::SubjectBlocked)
        } else if !self.chat_permitted {
            AccessDecision::Deny(DenyReason::ChatNotPermitted)
        } else {
            AccessDecision::Allow
        }
    }
}

#[derive(Error, Debug)]
pub enum EligibilityError {
    #[error("Eligibility source unavailable: {0}")]
    Unavailable(String),

    #[error("Eligibility lookup timed out after {0:?}")]
    Timeout(Duration),
}

/// Read-only view of the subject profile store.
#[async_trait]
pub trait EligibilitySource: Send + Sync {
    async fn lookup(&self, user_id: i64, chat_id: i64) -> Result<Eligibility, EligibilityError>;
}

/// Fixed block/deny lists, for deployments without a profile database.
#[derive(Debug, Clone, Default)]
pub struct StaticEligibility {
    blocked_users: HashSet<i64>,
    denied_chats: HashSet<i64>,
}

impl StaticEligibility {
    pub fn new(
        blocked_users: impl IntoIterator<Item = i64>,
        denied_chats: impl IntoIterator<Item = i64>,
    ) -> Self {
        Self {
            blocked_users: blocked_users.into_iter().collect(),
            denied_chats: denied_chats.into_iter().collect(),
        }
    }
}

#[async_trait]
impl EligibilitySource for StaticEligibility {
    async fn lookup(&self, user_id: i64, chat_id: i64) -> Result<Eligibility, EligibilityError> {
        Ok(Eligibility {
            user_blocked: self.blocked_users.contains(&user_id),
            chat_permitted: !self.denied_chats.contains(&chat_id),
        })
    }
}

#[derive(Debug, Clone)]
pub struct AccessGateConfig {
    pub cache_ttl: Duration,
    pub cache_capacity: NonZeroUsize,
    pub lookup_timeout: Duration,
    pub fail_policy: FailPolicy,
}

impl Default for AccessGateConfig {
    fn default() -> Self {
        Self {
            cache_ttl: Duration::from_secs(30),
            cache_capacity: NonZeroUsize::new(10_000).unwrap_or(NonZeroUsize::MIN),
            lookup_timeout: Duration::from_millis(500),
            fail_policy: FailPolicy::Closed,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct CachedEligibility {
    eligibility: Eligibility,
    fetched_at: Instant,
}

pub struct AccessGate {
    source: Arc<dyn EligibilitySource>,
    cache: Mutex<LruCache<(i64, i64), CachedEligibility>>,
    config: AccessGateConfig,
}

impl AccessGate {
    pub fn new(source: Arc<dyn EligibilitySource>, config: AccessGateConfig) -> Self {
        Self {
            source,
            cache: Mutex::new(LruCache::new(config.cache_capacity)),
            config,
        }
    }

    pub async fn check(&self, subject: &Subject) -> AccessDecision {
        let cache_key = (subject.user_id, subject.chat_id);

        if let Some(cached) = self.cached(cache_key).await {
            return cached.decision();
        }

        let lookup = tokio::time::timeout(
            self.config.lookup_timeout,
            self.source.lookup(subject.user_id, subject.chat_id),
        )
        .await
        .unwrap_or(Err(EligibilityError::Timeout(self.config.lookup_timeout)));

        match lookup {
            Ok(eligibility) => {
                self.cache.lock().await.put(
                    cache_key,
                    CachedEligibility {
                        eligibility,
                        fetched_at: Instant::now(),
                    },
                );
                let decision = eligibility.decision();
                if let Some(reason) = decision.deny_reason() {
                    tracing::debug!(%subject, %reason, "subject ineligible");
                }
                decision
            }
            Err(e) => {
                tracing::warn!(
                    %subject,
                    error = %e,
                    policy = ?self.config.fail_policy,
                    "eligibility lookup failed, applying fallback"
                );
                self.config.fail_policy.fallback()
            }
        }
    }

    /// Forget a cached answer, e.g. after the profile store changed.
    pub async fn invalidate(&self, user_id: i64, chat_id: i64) {
        self.cache.lock().await.pop(&(user_id, chat_id));
    }

    async fn cached(&self, cache_key: (i64, i64)) -> Option<Eligibility> {
        let mut cache = self.cache.lock().await;
        let entry = *cache.get(&cache_key)?;
        if entry.fetched_at.elapsed() < self.config.cache_ttl {
            return Some(entry.eligibility);
        }
        cache.pop(&cache_key);
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    /// Counts lookups and can be made to fail or hang.
    #[derive(Default)]
    struct CountingSource {
        inner: StaticEligibility,
        calls: AtomicUsize,
        failing: AtomicBool,
        hang: bool,
    }

    #[async_trait]
    impl EligibilitySource for CountingSource {
        async fn lookup(&self, user_id: i64, chat_id: i64) -> Result<Eligibility, EligibilityError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.hang {
                tokio::time::sleep(Duration::from_secs(60)).await;
            }
            if self.failing.load(Ordering::SeqCst) {
                return Err(EligibilityError::Unavailable("db down".into()));
            }
            self.inner.lookup(user_id, chat_id).await
        }
    }

    fn gate(source: Arc<CountingSource>, config: AccessGateConfig) -> AccessGate {
        AccessGate::new(source, config)
    }

    #[tokio::test]
    async fn test_reasons() {
        let source = Arc::new(CountingSource {
            inner: StaticEligibility::new([7], [-100]),
            ..Default::default()
        });
        let g = gate(source, AccessGateConfig::default());

        assert_eq!(g.check(&Subject::new(1, 5, 5)).await, AccessDecision::Allow);
        assert_eq!(
            g.check(&Subject::new(1, 7, 7)).await,
            AccessDecision::Deny(DenyReason::SubjectBlocked)
        );
        assert_eq!(
            g.check(&Subject::new(1, -100, 5)).await,
            AccessDecision::Deny(DenyReason::ChatNotPermitted)
        );
        // blocked wins over chat
        assert_eq!(
            g.check(&Subject::new(1, -100, 7)).await,
            AccessDecision::Deny(DenyReason::SubjectBlocked)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_cache_hits_until_ttl() {
        let source = Arc::new(CountingSource::default());
        let g = gate(
            source.clone(),
            AccessGateConfig {
                cache_ttl: Duration::from_secs(30),
                ..Default::default()
            },
        );
        let s = Subject::new(1, 5, 5);

        g.check(&s).await;
        g.check(&s).await;
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);

        tokio::time::advance(Duration::from_secs(31)).await;
        g.check(&s).await;
        assert_eq!(source.calls.load(Ordering::SeqCst), 2);

        g.invalidate(5, 5).await;
        g.check(&s).await;
        assert_eq!(source.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_cache_is_bounded() {
        let source = Arc::new(CountingSource::default());
        let g = gate(
            source.clone(),
            AccessGateConfig {
                cache_capacity: NonZeroUsize::new(2).unwrap(),
                ..Default::default()
            },
        );

        for user in [1, 2, 3, 1] {
            g.check(&Subject::new(1, user, user)).await;
        }
        // user 1 was evicted by user 3
        assert_eq!(source.calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_failures_follow_policy_and_are_not_cached() {
        let source = Arc::new(CountingSource::default());
        source.failing.store(true, Ordering::SeqCst);
        let closed = gate(source.clone(), AccessGateConfig::default());
        let s = Subject::new(1, 5, 5);

        assert_eq!(
            closed.check(&s).await,
            AccessDecision::Deny(DenyReason::BackendUnavailable)
        );

        source.failing.store(false, Ordering::SeqCst);
        assert_eq!(closed.check(&s).await, AccessDecision::Allow);
        assert_eq!(source.calls.load(Ordering::SeqCst), 2);

        let open_source = Arc::new(CountingSource::default());
        open_source.failing.store(true, Ordering::SeqCst);
        let open = gate(
            open_source,
            AccessGateConfig {
                fail_policy: FailPolicy::Open,
                ..Default::default()
            },
        );
        assert_eq!(open.check(&s).await, AccessDecision::Allow);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hanging_lookup_times_out() {
        let source = Arc::new(CountingSource {
            hang: true,
            ..Default::default()
        });
        let g = gate(
            source,
            AccessGateConfig {
                lookup_timeout: Duration::from_millis(200),
                fail_policy: FailPolicy::Closed,
                ..Default::default()
            },
        );
        assert_eq!(
            g.check(&Subject::new(1, 5, 5)).await,
            AccessDecision::Deny(DenyReason::BackendUnavailable)
        );
    }
}
