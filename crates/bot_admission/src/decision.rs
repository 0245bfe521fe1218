//! Admission outcomes

use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

/// Why an event was refused. Terminal: the event never reaches a handler.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum DenyReason {
    #[error("subject is blocked")]
    SubjectBlocked,

    #[error("chat is not permitted")]
    ChatNotPermitted,

    #[error("rate limited ({count}/{limit}), retry in {retry_after:?}")]
    RateLimited {
        count: i64,
        limit: u32,
        retry_after: Duration,
    },

    /// A dependency failed and the check is configured to fail closed.
    #[error("admission dependency unavailable")]
    BackendUnavailable,
}

impl DenyReason {
    /// Ineligible subjects, as opposed to throttled or fallback denials.
    pub fn is_ineligible(&self) -> bool {
        matches!(self, DenyReason::SubjectBlocked | DenyReason::ChatNotPermitted)
    }

    /// The first denial of a rate-limit window, the one worth telling the user about.
    pub fn is_first_throttle(&self) -> bool {
        matches!(self, DenyReason::RateLimited { count, limit, .. } if *count == i64::from(*limit) + 1)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum AccessDecision {
    Allow,
    Deny(DenyReason),
}

impl AccessDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, AccessDecision::Allow)
    }

    pub fn deny_reason(&self) -> Option<&DenyReason> {
        match self {
            AccessDecision::Allow => None,
            AccessDecision::Deny(reason) => Some(reason),
        }
    }
}

impl From<DenyReason> for AccessDecision {
    fn from(reason: DenyReason) -> Self {
        AccessDecision::Deny(reason)
    }
}

/// What to do when a check cannot reach its dependency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailPolicy {
    /// Admit the event.
    Open,
    /// Refuse with [`DenyReason::BackendUnavailable`].
    Closed,
}

impl FailPolicy {
    pub fn from_fail_open(fail_open: bool) -> Self {
        if fail_open {
            FailPolicy::Open
        } else {
            FailPolicy::Closed
        }
    }

    pub fn fallback(self) -> AccessDecision {
        match self {
            FailPolicy::Open => AccessDecision::Allow,
            FailPolicy::Closed => AccessDecision::Deny(DenyReason::BackendUnavailable),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_throttle_detection() {
        let first = DenyReason::RateLimited {
            count: 4,
            limit: 3,
            retry_after: Duration::from_secs(1),
        };
        let later = DenyReason::RateLimited {
            count: 5,
            limit: 3,
            retry_after: Duration::from_secs(1),
        };
        assert!(first.is_first_throttle());
        assert!(!later.is_first_throttle());
        assert!(!DenyReason::SubjectBlocked.is_first_throttle());
    }

    #[test]
    fn test_fail_policy_fallback() {
        assert_eq!(FailPolicy::from_fail_open(true).fallback(), AccessDecision::Allow);
        assert_eq!(
            FailPolicy::from_fail_open(false).fallback(),
            AccessDecision::Deny(DenyReason::BackendUnavailable)
        );
    }
}
