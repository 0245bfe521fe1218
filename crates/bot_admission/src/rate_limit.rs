//! Fixed-window rate limiting
//!
//! Each (subject, handler tag, window index) gets its own counter, where the
//! window index is `floor(now / window)`. Admission is one atomic
//! increment-with-expiry followed by `count <= limit`, so there is no
//! read-modify-write race between concurrent events of one subject.
//!
//! A burst straddling a window boundary can see up to `2 * limit` admits in
//! one window length. That is the accepted price of a single round-trip.

use crate::clock::{Clock, SystemClock};
use crate::decision::{AccessDecision, DenyReason, FailPolicy};
use bot_storage::{Feature, KeyBuilder, SharedStore, Subject};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitRule {
    /// Admits per window. The `limit`-th event is the last one admitted.
    pub limit: u32,
    pub window: Duration,
}

impl RateLimitRule {
    pub fn new(limit: u32, window_seconds: u64) -> Self {
        Self {
            limit,
            window: Duration::from_secs(window_seconds),
        }
    }

    fn window_millis(&self) -> i64 {
        (self.window.as_millis() as i64).max(1)
    }
}

impl Default for RateLimitRule {
    fn default() -> Self {
        Self::new(3, 2)
    }
}

#[derive(Clone)]
pub struct RateLimiter {
    store: SharedStore,
    keys: KeyBuilder,
    clock: Arc<dyn Clock>,
    fail_policy: FailPolicy,
}

impl RateLimiter {
    pub fn new(store: SharedStore, keys: KeyBuilder) -> Self {
        Self {
            store,
            keys,
            clock: Arc::new(SystemClock),
            fail_policy: FailPolicy::Open,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_fail_policy(mut self, policy: FailPolicy) -> Self {
        self.fail_policy = policy;
        self
    }

    pub fn fail_policy(&self) -> FailPolicy {
        self.fail_policy
    }

    /// Count this event against `subject`'s budget for `tag` and decide.
    pub async fn admit(&self, subject: &Subject, tag: &str, rule: RateLimitRule) -> AccessDecision {
        let now_ms = self.clock.now().timestamp_millis();
        let window_ms = rule.window_millis();
        let window_index = now_ms.div_euclid(window_ms);
        let key = self.keys.for_subject(
            subject,
            &Feature::throttle(tag, window_index as u64),
            None,
        );

        let count = match self.store.increment_with_expiry(&key, 1, rule.window).await {
            Ok(count) => count,
            Err(e) => {
                let decision = self.fail_policy.fallback();
                tracing::warn!(
                    %key,
                    error = %e,
                    policy = ?self.fail_policy,
                    "rate limiter backend failed, applying fallback"
                );
                return decision;
            }
        };

        if count <= i64::from(rule.limit) {
            return AccessDecision::Allow;
        }

        let window_end_ms = (window_index + 1) * window_ms;
        let retry_after = Duration::from_millis((window_end_ms - now_ms).max(0) as u64);
        tracing::debug!(%subject, tag, count, limit = rule.limit, "rate limited");
        AccessDecision::Deny(DenyReason::RateLimited {
            count,
            limit: rule.limit,
            retry_after,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use bot_storage::testing::FlakyStore;
    use bot_storage::{MemoryStateStore, TimeoutStore};

    fn limiter(store: SharedStore, clock: Arc<ManualClock>) -> RateLimiter {
        RateLimiter::new(store, KeyBuilder::default()).with_clock(clock)
    }

    fn subject() -> Subject {
        Subject::new(1, 10, 10)
    }

    #[tokio::test]
    async fn test_limit_three_per_ten_seconds() {
        let clock = Arc::new(ManualClock::at_unix(1_700_000_000));
        let rl = limiter(Arc::new(MemoryStateStore::new()), clock.clone());
        let rule = RateLimitRule::new(3, 10);
        let s = subject();

        for _ in 0..3 {
            assert!(rl.admit(&s, "default", rule).await.is_allowed());
        }
        let denied = rl.admit(&s, "default", rule).await;
        assert!(matches!(
            denied,
            AccessDecision::Deny(DenyReason::RateLimited { count: 4, limit: 3, .. })
        ));

        clock.advance(Duration::from_secs(10));
        assert!(rl.admit(&s, "default", rule).await.is_allowed());
        // fresh counter: two more fit
        assert!(rl.admit(&s, "default", rule).await.is_allowed());
        assert!(rl.admit(&s, "default", rule).await.is_allowed());
        assert!(!rl.admit(&s, "default", rule).await.is_allowed());
    }

    #[tokio::test]
    async fn test_five_messages_in_two_seconds() {
        let clock = Arc::new(ManualClock::at_unix(1_700_000_000));
        let rl = limiter(Arc::new(MemoryStateStore::new()), clock.clone());
        let rule = RateLimitRule::new(3, 5);
        let s = subject();

        let mut outcomes = Vec::new();
        for _ in 0..5 {
            outcomes.push(rl.admit(&s, "default", rule).await.is_allowed());
            clock.advance(Duration::from_millis(400));
        }
        assert_eq!(outcomes, vec![true, true, true, false, false]);
    }

    #[tokio::test]
    async fn test_retry_after_points_at_window_end() {
        let clock = Arc::new(ManualClock::at_unix(1_700_000_000));
        let rl = limiter(Arc::new(MemoryStateStore::new()), clock.clone());
        let rule = RateLimitRule::new(1, 10);
        let s = subject();

        rl.admit(&s, "default", rule).await;
        clock.advance(Duration::from_secs(4));
        let decision = rl.admit(&s, "default", rule).await;
        match decision.deny_reason() {
            Some(DenyReason::RateLimited { retry_after, .. }) => {
                assert_eq!(*retry_after, Duration::from_secs(6));
            }
            other => panic!("expected rate limit, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_tags_and_subjects_have_separate_budgets() {
        let clock = Arc::new(ManualClock::at_unix(1_700_000_000));
        let rl = limiter(Arc::new(MemoryStateStore::new()), clock);
        let rule = RateLimitRule::new(1, 10);
        let s = subject();

        assert!(rl.admit(&s, "echo", rule).await.is_allowed());
        assert!(!rl.admit(&s, "echo", rule).await.is_allowed());
        assert!(rl.admit(&s, "help", rule).await.is_allowed());
        assert!(rl.admit(&Subject::new(1, 10, 11), "echo", rule).await.is_allowed());
        assert!(rl.admit(&Subject::new(2, 10, 10), "echo", rule).await.is_allowed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_backend_timeout_fail_closed_denies() {
        let store = TimeoutStore::new(
            FlakyStore::stalling(Duration::from_secs(30)),
            Duration::from_millis(250),
        );
        let rl = limiter(Arc::new(store), Arc::new(ManualClock::at_unix(0)))
            .with_fail_policy(FailPolicy::Closed);

        let decision = rl.admit(&subject(), "default", RateLimitRule::new(3, 10)).await;
        assert_eq!(decision, AccessDecision::Deny(DenyReason::BackendUnavailable));
    }

    #[tokio::test(start_paused = true)]
    async fn test_backend_timeout_fail_open_allows() {
        let store = TimeoutStore::new(
            FlakyStore::stalling(Duration::from_secs(30)),
            Duration::from_millis(250),
        );
        let rl = limiter(Arc::new(store), Arc::new(ManualClock::at_unix(0)))
            .with_fail_policy(FailPolicy::Open);

        let decision = rl.admit(&subject(), "default", RateLimitRule::new(3, 10)).await;
        assert_eq!(decision, AccessDecision::Allow);
    }

    #[tokio::test]
    async fn test_unreachable_backend_follows_policy() {
        let store: SharedStore = Arc::new(FlakyStore::unavailable());
        let clock = Arc::new(ManualClock::at_unix(0));
        let rule = RateLimitRule::new(1, 10);

        let open = limiter(store.clone(), clock.clone());
        assert_eq!(open.fail_policy(), FailPolicy::Open);
        assert!(open.admit(&subject(), "default", rule).await.is_allowed());

        let closed = limiter(store, clock).with_fail_policy(FailPolicy::Closed);
        assert!(!closed.admit(&subject(), "default", rule).await.is_allowed());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_burst_admits_exactly_limit() {
        let clock = Arc::new(ManualClock::at_unix(1_700_000_000));
        let rl = limiter(Arc::new(MemoryStateStore::new()), clock);
        let rule = RateLimitRule::new(5, 60);

        let mut tasks = tokio::task::JoinSet::new();
        for _ in 0..40 {
            let rl = rl.clone();
            tasks.spawn(async move { rl.admit(&subject(), "default", rule).await.is_allowed() });
        }
        let mut admitted = 0;
        while let Some(result) = tasks.join_next().await {
            if result.unwrap() {
                admitted += 1;
            }
        }
        assert_eq!(admitted, 5);
    }
}
