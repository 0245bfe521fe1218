//! # Bot Session
//!
//! Conversation state (FSM position, scratch data, locale) and per-subject
//! event isolation, both persisted through the shared state store.

pub mod codec;
pub mod error;
pub mod isolation;
pub mod state;

// Re-exports
pub use codec::StateData;
pub use error::{SessionError, SessionResult};
pub use isolation::{EventIsolation, IsolationConfig, IsolationGuard};
pub use state::ConversationState;
