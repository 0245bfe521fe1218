//! Storage key namespace
//!
//! Every key is laid out as
//!
//! ```text
//! {prefix}:{bot_id}:{scope tag}:{scope ids...}:{feature tag}:{feature args...}[:{destiny}]
//! ```
//!
//! The scope tag and the feature tag each fix how many segments follow them,
//! and every free-form segment is escaped, so the mapping from inputs to keys
//! is injective: two distinct inputs never share a key.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Origin of an inbound event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Subject {
    pub bot_id: i64,
    pub chat_id: i64,
    pub user_id: i64,
    /// Forum topic / thread the event belongs to, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<i64>,
}

impl Subject {
    pub fn new(bot_id: i64, chat_id: i64, user_id: i64) -> Self {
        Self {
            bot_id,
            chat_id,
            user_id,
            thread_id: None,
        }
    }

    pub fn with_thread(mut self, thread_id: i64) -> Self {
        self.thread_id = Some(thread_id);
        self
    }

    /// Private chats carry the user's own id as chat id.
    pub fn is_private(&self) -> bool {
        self.chat_id == self.user_id
    }

    /// Project this subject onto the identity parts selected by `scope`.
    ///
    /// `UserInThread` degrades to `UserInChat` when the event has no thread.
    pub fn scope(&self, scope: KeyScope) -> SubjectScope {
        match scope {
            KeyScope::Chat => SubjectScope::Chat {
                chat_id: self.chat_id,
            },
            KeyScope::User => SubjectScope::User {
                user_id: self.user_id,
            },
            KeyScope::UserInChat => SubjectScope::UserInChat {
                chat_id: self.chat_id,
                user_id: self.user_id,
            },
            KeyScope::UserInThread => match self.thread_id {
                Some(thread_id) => SubjectScope::UserInThread {
                    chat_id: self.chat_id,
                    thread_id,
                    user_id: self.user_id,
                },
                None => SubjectScope::UserInChat {
                    chat_id: self.chat_id,
                    user_id: self.user_id,
                },
            },
        }
    }
}

impl fmt::Display for Subject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.bot_id, self.chat_id, self.user_id)?;
        if let Some(thread_id) = self.thread_id {
            write!(f, "#{}", thread_id)?;
        }
        Ok(())
    }
}

/// Which identity parts a key is partitioned by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyScope {
    /// Shared by everyone in a chat.
    Chat,
    /// Follows the user across chats.
    User,
    /// One user inside one chat.
    #[default]
    UserInChat,
    /// One user inside one forum topic.
    UserInThread,
}

/// Identity parts a key is built from, already projected by a [`KeyScope`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SubjectScope {
    Chat { chat_id: i64 },
    User { user_id: i64 },
    UserInChat { chat_id: i64, user_id: i64 },
    UserInThread { chat_id: i64, thread_id: i64, user_id: i64 },
}

/// Feature namespace inside a subject's keyspace.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Feature {
    /// FSM position.
    State,
    /// Scratch data attached to the FSM.
    Data,
    /// Resolved locale.
    Locale,
    /// Fixed-window throttle counter for one handler tag.
    Throttle { tag: String, window: u64 },
    /// Event isolation lease.
    Lock,
    /// Anything else a feature wants to keep per subject.
    Custom(String),
}

impl Feature {
    pub fn throttle(tag: impl Into<String>, window: u64) -> Self {
        Feature::Throttle {
            tag: tag.into(),
            window,
        }
    }

    pub fn custom(name: impl Into<String>) -> Self {
        Feature::Custom(name.into())
    }
}

/// A fully qualified key in the state backend.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StorageKey(String);

impl StorageKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for StorageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for StorageKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

const SEPARATOR: char = ':';

/// Builds [`StorageKey`]s. Pure and stateless apart from its settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyBuilder {
    prefix: String,
    scope: KeyScope,
}

impl Default for KeyBuilder {
    fn default() -> Self {
        Self::new("bot")
    }
}

impl KeyBuilder {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            scope: KeyScope::default(),
        }
    }

    pub fn with_scope(mut self, scope: KeyScope) -> Self {
        self.scope = scope;
        self
    }

    pub fn scope(&self) -> KeyScope {
        self.scope
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Key for `subject` projected through this builder's scope strategy.
    pub fn for_subject(
        &self,
        subject: &Subject,
        feature: &Feature,
        destiny: Option<&str>,
    ) -> StorageKey {
        self.build(subject.bot_id, &subject.scope(self.scope), feature, destiny)
    }

    pub fn build(
        &self,
        bot_id: i64,
        scope: &SubjectScope,
        feature: &Feature,
        destiny: Option<&str>,
    ) -> StorageKey {
        let mut key = String::with_capacity(64);
        push_escaped(&mut key, &self.prefix);
        push_raw(&mut key, bot_id);

        match scope {
            SubjectScope::Chat { chat_id } => {
                push_raw(&mut key, "c");
                push_raw(&mut key, chat_id);
            }
            SubjectScope::User { user_id } => {
                push_raw(&mut key, "u");
                push_raw(&mut key, user_id);
            }
            SubjectScope::UserInChat { chat_id, user_id } => {
                push_raw(&mut key, "cu");
                push_raw(&mut key, chat_id);
                push_raw(&mut key, user_id);
            }
            SubjectScope::UserInThread {
                chat_id,
                thread_id,
                user_id,
            } => {
                push_raw(&mut key, "ctu");
                push_raw(&mut key, chat_id);
                push_raw(&mut key, thread_id);
                push_raw(&mut key, user_id);
            }
        }

        match feature {
            Feature::State => push_raw(&mut key, "state"),
            Feature::Data => push_raw(&mut key, "data"),
            Feature::Locale => push_raw(&mut key, "locale"),
            Feature::Lock => push_raw(&mut key, "lock"),
            Feature::Throttle { tag, window } => {
                push_raw(&mut key, "throttle");
                push_escaped(&mut key, tag);
                push_raw(&mut key, window);
            }
            Feature::Custom(name) => {
                push_raw(&mut key, "x");
                push_escaped(&mut key, name);
            }
        }

        if let Some(destiny) = destiny {
            push_escaped(&mut key, destiny);
        }

        StorageKey(key)
    }
}

fn push_raw(key: &mut String, segment: impl fmt::Display) {
    use std::fmt::Write;
    if !key.is_empty() {
        key.push(SEPARATOR);
    }
    // Writing into a String cannot fail.
    let _ = write!(key, "{}", segment);
}

fn push_escaped(key: &mut String, segment: &str) {
    if !key.is_empty() {
        key.push(SEPARATOR);
    }
    for ch in segment.chars() {
        if ch == SEPARATOR || ch == '\\' {
            key.push('\\');
        }
        key.push(ch);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use std::collections::HashSet;

    fn subject() -> Subject {
        Subject::new(42, -1001, 7)
    }

    #[test]
    fn test_build_is_deterministic() {
        let builder = KeyBuilder::default();
        let a = builder.for_subject(&subject(), &Feature::State, None);
        let b = builder.for_subject(&subject(), &Feature::State, None);
        assert_eq!(a, b);
        assert_eq!(a.as_str(), "bot:42:cu:-1001:7:state");
    }

    #[test]
    fn test_layout_matches_namespace() {
        let builder = KeyBuilder::default();
        let s = subject();
        assert_eq!(
            builder.for_subject(&s, &Feature::throttle("echo", 9), None).as_str(),
            "bot:42:cu:-1001:7:throttle:echo:9"
        );
        assert_eq!(
            builder.for_subject(&s, &Feature::Data, Some("topic")).as_str(),
            "bot:42:cu:-1001:7:data:topic"
        );
        assert_eq!(
            builder.for_subject(&s, &Feature::Locale, None).as_str(),
            "bot:42:cu:-1001:7:locale"
        );
    }

    #[test]
    fn test_features_never_share_a_key() {
        let builder = KeyBuilder::default();
        let s = subject();
        let keys: HashSet<_> = [
            Feature::State,
            Feature::Data,
            Feature::Locale,
            Feature::Lock,
            Feature::throttle("default", 1),
            Feature::custom("state"),
        ]
        .iter()
        .map(|feature| builder.for_subject(&s, feature, None))
        .collect();
        assert_eq!(keys.len(), 6);
    }

    #[test]
    fn test_bot_id_partitions_keys() {
        let builder = KeyBuilder::default();
        let a = builder.for_subject(&Subject::new(1, 5, 5), &Feature::State, None);
        let b = builder.for_subject(&Subject::new(2, 5, 5), &Feature::State, None);
        assert_ne!(a, b);
    }

    #[test]
    fn test_private_chat_scopes_do_not_collide() {
        // chat_id == user_id in private chats
        let s = Subject::new(1, 77, 77);
        let keys: HashSet<_> = [KeyScope::Chat, KeyScope::User, KeyScope::UserInChat]
            .into_iter()
            .map(|scope| {
                KeyBuilder::default()
                    .with_scope(scope)
                    .for_subject(&s, &Feature::State, None)
            })
            .collect();
        assert_eq!(keys.len(), 3);
    }

    #[test]
    fn test_thread_scope_falls_back_without_thread() {
        let builder = KeyBuilder::default().with_scope(KeyScope::UserInThread);
        let plain = builder.for_subject(&subject(), &Feature::State, None);
        let threaded = builder.for_subject(&subject().with_thread(3), &Feature::State, None);
        assert_eq!(plain.as_str(), "bot:42:cu:-1001:7:state");
        assert_eq!(threaded.as_str(), "bot:42:ctu:-1001:3:7:state");
    }

    #[test]
    fn test_separator_in_free_text_is_escaped() {
        let builder = KeyBuilder::default();
        let s = subject();
        // Unescaped, both of these would render "...:x:a:b".
        let joined = builder.for_subject(&s, &Feature::custom("a:b"), None);
        let split = builder.for_subject(&s, &Feature::custom("a"), Some("b"));
        assert_ne!(joined, split);
        assert_eq!(joined.as_str(), "bot:42:cu:-1001:7:x:a\\:b");
    }

    #[test]
    fn test_default_destiny_differs_from_named_destiny() {
        let builder = KeyBuilder::default();
        let s = subject();
        let none = builder.for_subject(&s, &Feature::Data, None);
        let named = builder.for_subject(&s, &Feature::Data, Some(""));
        assert_ne!(none, named);
    }

    #[test]
    fn test_no_collisions_across_random_sample() {
        let mut rng = StdRng::seed_from_u64(0x5eed);
        let builder = KeyBuilder::default();
        let tags = ["state", "data", "locale", "throttle", ":", "\\", "a:b", ""];
        let mut inputs = HashSet::new();
        let mut keys = HashSet::new();

        while inputs.len() < 12_000 {
            let subject = Subject::new(
                rng.gen_range(-3..3),
                rng.gen_range(-50..50),
                rng.gen_range(-50..50),
            );
            let feature = match rng.gen_range(0..6) {
                0 => Feature::State,
                1 => Feature::Data,
                2 => Feature::Locale,
                3 => Feature::Lock,
                4 => Feature::throttle(tags[rng.gen_range(0..tags.len())], rng.gen_range(0..4)),
                _ => Feature::custom(tags[rng.gen_range(0..tags.len())]),
            };
            let destiny = match rng.gen_range(0..3) {
                0 => None,
                _ => Some(tags[rng.gen_range(0..tags.len())].to_string()),
            };
            let scope = match rng.gen_range(0..3) {
                0 => KeyScope::Chat,
                1 => KeyScope::User,
                _ => KeyScope::UserInChat,
            };
            let projected = subject.scope(scope);
            if inputs.insert((subject.bot_id, projected, feature.clone(), destiny.clone())) {
                keys.insert(builder.build(subject.bot_id, &projected, &feature, destiny.as_deref()));
            }
        }

        assert_eq!(keys.len(), inputs.len());
    }
}
