//! Outbound transport seam
//!
//! Handlers never talk to a chat platform directly; they hand an
//! [`OutgoingMessage`] to a [`Transport`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Mutex as StdMutex;
use thiserror::Error;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;

use crate::event::IncomingEvent;

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Failed to encode outgoing message: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("Failed to write outgoing message: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutgoingMessage {
    pub chat_id: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<i64>,
    pub text: String,
}

impl OutgoingMessage {
    /// Answer in the chat (and topic) the event came from.
    pub fn reply_to(event: &IncomingEvent, text: impl Into<String>) -> Self {
        Self {
            chat_id: event.chat_id,
            thread_id: event.thread_id,
            text: text.into(),
        }
    }
}

#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, message: OutgoingMessage) -> Result<(), TransportError>;
}

/// Writes one JSON object per line.
pub struct JsonLinesTransport<W> {
    writer: Mutex<W>,
}

impl<W> JsonLinesTransport<W>
where
    W: AsyncWrite + Unpin + Send,
{
    pub fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }

    pub fn into_inner(self) -> W {
        self.writer.into_inner()
    }
}

pub type StdoutTransport = JsonLinesTransport<tokio::io::Stdout>;

impl StdoutTransport {
    pub fn stdout() -> Self {
        Self::new(tokio::io::stdout())
    }
}

#[async_trait]
impl<W> Transport for JsonLinesTransport<W>
where
    W: AsyncWrite + Unpin + Send,
{
    async fn send(&self, message: OutgoingMessage) -> Result<(), TransportError> {
        let mut line = serde_json::to_vec(&message)?;
        line.push(b'\n');
        let mut writer = self.writer.lock().await;
        writer.write_all(&line).await?;
        writer.flush().await?;
        Ok(())
    }
}

/// Keeps sent messages in memory, for embedding and tests.
#[derive(Debug, Default)]
pub struct MemoryTransport {
    sent: StdMutex<Vec<OutgoingMessage>>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<OutgoingMessage> {
        self.sent
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn take(&self) -> Vec<OutgoingMessage> {
        std::mem::take(&mut *self.sent.lock().unwrap_or_else(|poisoned| poisoned.into_inner()))
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn send(&self, message: OutgoingMessage) -> Result<(), TransportError> {
        self.sent
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(message);
        Ok(())
    }
}
