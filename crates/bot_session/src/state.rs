//! Conversation state
//!
//! Per-subject FSM position, scratch data and locale. Nothing is cached in
//! process: every call is a round-trip to the shared store, so concurrent
//! events for the same subject always see the backend's view.
//!
//! Reads never fail. A backend error or an undecodable payload is logged and
//! read as "absent", which restarts the conversation. Writes return their
//! error, because a lost write desynchronizes a multi-step conversation.

use crate::codec::{self, StateData};
use crate::error::{SessionError, SessionResult};
use bot_storage::{Feature, KeyBuilder, SharedStore, StorageKey, Subject};
use std::time::Duration;

/// Bound on optimistic retries in [`ConversationState::update_data`].
pub const MAX_UPDATE_ATTEMPTS: usize = 8;

#[derive(Clone)]
pub struct ConversationState {
    store: SharedStore,
    keys: KeyBuilder,
    state_ttl: Option<Duration>,
    data_ttl: Option<Duration>,
}

impl ConversationState {
    pub fn new(store: SharedStore, keys: KeyBuilder) -> Self {
        Self {
            store,
            keys,
            state_ttl: None,
            data_ttl: None,
        }
    }

    /// Expire FSM state and data after a period without writes.
    pub fn with_ttl(mut self, state_ttl: Option<Duration>, data_ttl: Option<Duration>) -> Self {
        self.state_ttl = state_ttl;
        self.data_ttl = data_ttl;
        self
    }

    pub fn key_builder(&self) -> &KeyBuilder {
        &self.keys
    }

    fn key(&self, subject: &Subject, feature: Feature, destiny: Option<&str>) -> StorageKey {
        self.keys.for_subject(subject, &feature, destiny)
    }

    async fn read(&self, key: &StorageKey) -> Option<Vec<u8>> {
        match self.store.get(key).await {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!(%key, error = %e, "state read failed, treating as absent");
                None
            }
        }
    }

    // ========== FSM state ==========

    pub async fn get_state(&self, subject: &Subject, destiny: Option<&str>) -> Option<String> {
        let key = self.key(subject, Feature::State, destiny);
        self.read(&key).await.and_then(codec::decode_tag)
    }

    pub async fn set_state(
        &self,
        subject: &Subject,
        state: &str,
        destiny: Option<&str>,
    ) -> SessionResult<()> {
        let key = self.key(subject, Feature::State, destiny);
        if state.is_empty() {
            self.store.delete(&key).await?;
        } else {
            self.store
                .set(&key, &codec::encode_tag(state), self.state_ttl)
                .await?;
        }
        tracing::debug!(%subject, state, "fsm state set");
        Ok(())
    }

    /// Leave the FSM without touching data.
    pub async fn reset_state(&self, subject: &Subject, destiny: Option<&str>) -> SessionResult<()> {
        let key = self.key(subject, Feature::State, destiny);
        self.store.delete(&key).await?;
        Ok(())
    }

    // ========== Scratch data ==========

    pub async fn get_data(&self, subject: &Subject, destiny: Option<&str>) -> Option<StateData> {
        let key = self.key(subject, Feature::Data, destiny);
        let bytes = self.read(&key).await?;
        match codec::decode_data(&bytes) {
            Ok(data) => Some(data),
            Err(e) => {
                tracing::warn!(%key, error = %e, "stored data is undecodable, treating as absent");
                None
            }
        }
    }

    pub async fn set_data(
        &self,
        subject: &Subject,
        data: &StateData,
        destiny: Option<&str>,
    ) -> SessionResult<()> {
        let key = self.key(subject, Feature::Data, destiny);
        if data.is_empty() {
            self.store.delete(&key).await?;
        } else {
            let bytes = codec::encode_data(data)?;
            self.store.set(&key, &bytes, self.data_ttl).await?;
        }
        Ok(())
    }

    /// Merge `patch` into the stored data and return the result.
    ///
    /// Runs as a compare-and-set loop: a concurrent writer to the same key
    /// makes this attempt fail and retry on the fresh value, so no update
    /// is lost.
    pub async fn update_data(
        &self,
        subject: &Subject,
        patch: StateData,
        destiny: Option<&str>,
    ) -> SessionResult<StateData> {
        let key = self.key(subject, Feature::Data, destiny);

        for attempt in 1..=MAX_UPDATE_ATTEMPTS {
            let current = self.store.get(&key).await?;
            let mut data = match current.as_deref().map(codec::decode_data) {
                Some(Ok(data)) => data,
                Some(Err(e)) => {
                    tracing::warn!(%key, error = %e, "overwriting undecodable data");
                    StateData::new()
                }
                None => StateData::new(),
            };
            data.extend(patch.clone());

            let bytes = codec::encode_data(&data)?;
            if self
                .store
                .compare_and_set(&key, current.as_deref(), &bytes, self.data_ttl)
                .await?
            {
                return Ok(data);
            }
            tracing::debug!(%key, attempt, "data changed underneath update, retrying");
        }

        Err(SessionError::Conflict(MAX_UPDATE_ATTEMPTS))
    }

    /// Drop FSM state and data for one destiny. Locale survives.
    pub async fn clear(&self, subject: &Subject, destiny: Option<&str>) -> SessionResult<()> {
        self.reset_state(subject, destiny).await?;
        let key = self.key(subject, Feature::Data, destiny);
        self.store.delete(&key).await?;
        Ok(())
    }

    // ========== Locale ==========

    pub async fn get_locale(&self, subject: &Subject) -> Option<String> {
        let key = self.key(subject, Feature::Locale, None);
        self.read(&key).await.and_then(codec::decode_tag)
    }

    pub async fn set_locale(&self, subject: &Subject, locale: &str) -> SessionResult<()> {
        let key = self.key(subject, Feature::Locale, None);
        self.store.set(&key, &codec::encode_tag(locale), None).await?;
        tracing::debug!(%subject, locale, "locale set");
        Ok(())
    }
}
