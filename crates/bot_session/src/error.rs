//! Session error types

use bot_storage::StoreError;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("State write failed: {0}")]
    Store(#[from] StoreError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Timed out after {0:?} waiting for the subject lock")]
    LockTimeout(Duration),

    #[error("Concurrent update did not settle after {0} attempts")]
    Conflict(usize),
}

impl SessionError {
    /// The backend could not be reached, as opposed to contention or a bad value.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, SessionError::Store(e) if e.is_unavailable())
    }
}

pub type SessionResult<T> = std::result::Result<T, SessionError>;
