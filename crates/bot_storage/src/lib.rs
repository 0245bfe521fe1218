//! # Bot Storage
//!
//! Key namespace and key-value backends shared by every stateful feature of
//! the bot: conversation state, throttle counters and event isolation locks.

pub mod error;
pub mod key;
pub mod memory;
pub mod redis_backend;
pub mod store;
pub mod timeout;

#[cfg(any(test, feature = "test-util"))]
pub mod testing;

// Re-exports
pub use error::{StoreError, StoreResult};
pub use key::{Feature, KeyBuilder, KeyScope, StorageKey, Subject, SubjectScope};
pub use memory::MemoryStateStore;
pub use redis_backend::RedisStateStore;
pub use store::StateStore;
pub use timeout::TimeoutStore;

use std::sync::Arc;

/// Shared handle every component holds on to.
pub type SharedStore = Arc<dyn StateStore>;
