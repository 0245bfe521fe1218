//! State store error types

use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("Backend round-trip timed out after {0:?}")]
    Timeout(Duration),

    #[error("Invalid value at {key}: {reason}")]
    InvalidValue { key: String, reason: String },
}

impl StoreError {
    /// True for failures of the backend itself (connection, pool, timeout),
    /// as opposed to a bad value sitting in a healthy backend.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, StoreError::BackendUnavailable(_) | StoreError::Timeout(_))
    }
}

impl From<deadpool_redis::redis::RedisError> for StoreError {
    fn from(error: deadpool_redis::redis::RedisError) -> Self {
        StoreError::BackendUnavailable(error.to_string())
    }
}

impl From<deadpool_redis::PoolError> for StoreError {
    fn from(error: deadpool_redis::PoolError) -> Self {
        StoreError::BackendUnavailable(error.to_string())
    }
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;
