//! Ordered admission checks
//!
//! Checks run in registration order and the first deny wins. Registering the
//! eligibility gate before the throttle check keeps blocked subjects from
//! spending rate-limit budget.

use crate::access::AccessGate;
use crate::decision::AccessDecision;
use crate::rate_limit::{RateLimitRule, RateLimiter};
use async_trait::async_trait;
use bot_storage::Subject;
use std::sync::Arc;

/// What the admission layer needs to know about one inbound event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdmissionRequest {
    pub subject: Subject,
    /// Handler-level rate limit bucket.
    pub throttle_tag: String,
    /// Overrides the throttle check's default rule.
    pub rule: Option<RateLimitRule>,
}

impl AdmissionRequest {
    pub fn new(subject: Subject, throttle_tag: impl Into<String>) -> Self {
        Self {
            subject,
            throttle_tag: throttle_tag.into(),
            rule: None,
        }
    }

    pub fn with_rule(mut self, rule: RateLimitRule) -> Self {
        self.rule = Some(rule);
        self
    }
}

#[async_trait]
pub trait AdmissionCheck: Send + Sync {
    fn name(&self) -> &'static str;

    async fn check(&self, request: &AdmissionRequest) -> AccessDecision;
}

#[async_trait]
impl AdmissionCheck for AccessGate {
    fn name(&self) -> &'static str {
        "access_gate"
    }

    async fn check(&self, request: &AdmissionRequest) -> AccessDecision {
        AccessGate::check(self, &request.subject).await
    }
}

pub struct ThrottleCheck {
    limiter: RateLimiter,
    default_rule: RateLimitRule,
}

impl ThrottleCheck {
    pub fn new(limiter: RateLimiter, default_rule: RateLimitRule) -> Self {
        Self {
            limiter,
            default_rule,
        }
    }
}

#[async_trait]
impl AdmissionCheck for ThrottleCheck {
    fn name(&self) -> &'static str {
        "throttle"
    }

    async fn check(&self, request: &AdmissionRequest) -> AccessDecision {
        let rule = request.rule.unwrap_or(self.default_rule);
        self.limiter
            .admit(&request.subject, &request.throttle_tag, rule)
            .await
    }
}

#[derive(Clone, Default)]
pub struct AdmissionPipeline {
    checks: Vec<Arc<dyn AdmissionCheck>>,
}

impl AdmissionPipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_check(mut self, check: Arc<dyn AdmissionCheck>) -> Self {
        self.checks.push(check);
        self
    }

    pub fn len(&self) -> usize {
        self.checks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.checks.is_empty()
    }

    pub async fn admit(&self, request: &AdmissionRequest) -> AccessDecision {
        for check in &self.checks {
            let decision = check.check(request).await;
            if let Some(reason) = decision.deny_reason() {
                tracing::debug!(
                    subject = %request.subject,
                    check = check.name(),
                    %reason,
                    "event denied"
                );
                return decision;
            }
        }
        AccessDecision::Allow
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::{AccessGateConfig, StaticEligibility};
    use crate::clock::ManualClock;
    use crate::decision::DenyReason;
    use bot_storage::{Feature, KeyBuilder, MemoryStateStore, SharedStore, StateStore};

    fn build(store: SharedStore, blocked: Vec<i64>) -> AdmissionPipeline {
        let gate = AccessGate::new(
            Arc::new(StaticEligibility::new(blocked, Vec::new())),
            AccessGateConfig::default(),
        );
        let limiter = RateLimiter::new(store, KeyBuilder::default())
            .with_clock(Arc::new(ManualClock::at_unix(1_700_000_000)));
        AdmissionPipeline::new()
            .with_check(Arc::new(gate))
            .with_check(Arc::new(ThrottleCheck::new(limiter, RateLimitRule::new(2, 10))))
    }

    #[tokio::test]
    async fn test_empty_pipeline_allows() {
        let pipeline = AdmissionPipeline::new();
        assert!(pipeline.is_empty());
        let request = AdmissionRequest::new(Subject::new(1, 1, 1), "default");
        assert_eq!(pipeline.admit(&request).await, AccessDecision::Allow);
    }

    #[tokio::test]
    async fn test_blocked_subject_does_not_consume_budget() {
        let store = Arc::new(MemoryStateStore::new());
        let pipeline = build(store.clone(), vec![7]);
        let blocked = Subject::new(1, 7, 7);
        let request = AdmissionRequest::new(blocked, "default");

        for _ in 0..5 {
            assert_eq!(
                pipeline.admit(&request).await,
                AccessDecision::Deny(DenyReason::SubjectBlocked)
            );
        }
        assert!(store.is_empty());

        let window_index = 1_700_000_000_000u64 / 10_000;
        let key = KeyBuilder::default().for_subject(
            &blocked,
            &Feature::throttle("default", window_index),
            None,
        );
        assert_eq!(store.get(&key).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_throttle_after_eligibility() {
        let store = Arc::new(MemoryStateStore::new());
        let pipeline = build(store, vec![]);
        let request = AdmissionRequest::new(Subject::new(1, 5, 5), "default");

        assert!(pipeline.admit(&request).await.is_allowed());
        assert!(pipeline.admit(&request).await.is_allowed());
        let decision = pipeline.admit(&request).await;
        assert!(decision.deny_reason().is_some_and(DenyReason::is_first_throttle));
    }

    #[tokio::test]
    async fn test_request_rule_overrides_default() {
        let store = Arc::new(MemoryStateStore::new());
        let pipeline = build(store, vec![]);
        let request =
            AdmissionRequest::new(Subject::new(1, 5, 5), "echo").with_rule(RateLimitRule::new(1, 10));

        assert!(pipeline.admit(&request).await.is_allowed());
        assert!(!pipeline.admit(&request).await.is_allowed());
    }
}
