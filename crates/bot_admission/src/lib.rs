//! # Bot Admission
//!
//! Decides, before any handler runs, whether an inbound event may proceed:
//! eligibility of the subject first, then the per-handler rate limit.

pub mod access;
pub mod clock;
pub mod decision;
pub mod pipeline;
pub mod rate_limit;

// Re-exports
pub use access::{
    AccessGate, AccessGateConfig, Eligibility, EligibilityError, EligibilitySource,
    StaticEligibility,
};
pub use clock::{Clock, ManualClock, SystemClock};
pub use decision::{AccessDecision, DenyReason, FailPolicy};
pub use pipeline::{AdmissionCheck, AdmissionPipeline, AdmissionRequest, ThrottleCheck};
pub use rate_limit::{RateLimitRule, RateLimiter};
