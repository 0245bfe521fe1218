//! Inbound event model
//!
//! One JSON object per line on the ingress stream, e.g.
//! `{"chat_id":-100,"user_id":7,"type":"message","text":"/echo hi"}`.

use bot_storage::Subject;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventPayload {
    Message { text: String },
    Callback { data: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncomingEvent {
    pub chat_id: i64,
    #[serde(default = "default_chat_type")]
    pub chat_type: String,
    pub user_id: i64,
    #[serde(default)]
    pub user_name: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub thread_id: Option<i64>,
    #[serde(default)]
    pub date: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub payload: EventPayload,
}

fn default_chat_type() -> String {
    "private".to_string()
}

/// A `/command args` split off a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandInvocation<'a> {
    pub name: &'a str,
    pub args: &'a str,
}

impl IncomingEvent {
    pub fn message(chat_id: i64, user_id: i64, text: impl Into<String>) -> Self {
        Self {
            chat_id,
            chat_type: if chat_id == user_id {
                default_chat_type()
            } else {
                "group".to_string()
            },
            user_id,
            user_name: None,
            username: None,
            thread_id: None,
            date: None,
            payload: EventPayload::Message { text: text.into() },
        }
    }

    pub fn callback(chat_id: i64, user_id: i64, data: impl Into<String>) -> Self {
        Self {
            payload: EventPayload::Callback { data: data.into() },
            ..Self::message(chat_id, user_id, String::new())
        }
    }

    pub fn with_thread(mut self, thread_id: i64) -> Self {
        self.thread_id = Some(thread_id);
        self
    }

    pub fn subject(&self, bot_id: i64) -> Subject {
        let subject = Subject::new(bot_id, self.chat_id, self.user_id);
        match self.thread_id {
            Some(thread_id) => subject.with_thread(thread_id),
            None => subject,
        }
    }

    pub fn text(&self) -> Option<&str> {
        match &self.payload {
            EventPayload::Message { text } => Some(text),
            EventPayload::Callback { .. } => None,
        }
    }

    /// `/name@botname rest` → (`name`, `rest`). Names are matched case-insensitively
    /// by the router, so they are returned as written.
    pub fn command(&self) -> Option<CommandInvocation<'_>> {
        let text = self.text()?.trim_start();
        let body = text.strip_prefix('/')?;
        let (head, args) = match body.split_once(char::is_whitespace) {
            Some((head, rest)) => (head, rest.trim()),
            None => (body, ""),
        };
        let name = head.split('@').next().unwrap_or(head);
        if name.is_empty() {
            return None;
        }
        Some(CommandInvocation { name, args })
    }
}

pub fn decode_event(line: &str) -> Result<IncomingEvent, serde_json::Error> {
    serde_json::from_str(line)
}
