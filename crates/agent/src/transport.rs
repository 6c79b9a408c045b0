use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use leadwise_core::{ConnectionEvent, QuickReplyMenu};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Destination {
    /// A client chat, written to on behalf of the business connection.
    Client { connection_id: String, chat_id: i64 },
    /// An operator chat, written to directly by the bot identity.
    Operator { chat_id: i64 },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReplyMarkup {
    /// Leave whatever keyboard the chat currently shows.
    Keep,
    Menu(QuickReplyMenu),
    Remove,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutboundMessage {
    pub destination: Destination,
    pub text: String,
    pub markup: ReplyMarkup,
}

impl OutboundMessage {
    pub fn to_client(
        connection_id: impl Into<String>,
        chat_id: i64,
        text: impl Into<String>,
        markup: ReplyMarkup,
    ) -> Self {
        Self {
            destination: Destination::Client { connection_id: connection_id.into(), chat_id },
            text: text.into(),
            markup,
        }
    }

    pub fn to_operator(chat_id: i64, text: impl Into<String>) -> Self {
        Self {
            destination: Destination::Operator { chat_id },
            text: text.into(),
            markup: ReplyMarkup::Keep,
        }
    }
}

#[async_trait]
pub trait MessageSender: Send + Sync {
    async fn send(&self, message: &OutboundMessage) -> Result<()>;
}

/// Reads the current state of a business connection from the messaging platform.
#[async_trait]
pub trait ConnectionLookup: Send + Sync {
    async fn fetch_connection(&self, connection_id: &str) -> Result<ConnectionEvent>;
}

/// Keeps every message instead of delivering it; used by the smoke command and tests.
#[derive(Default)]
pub struct RecordingMessageSender {
    sent: Mutex<Vec<OutboundMessage>>,
    failing: AtomicBool,
}

impl RecordingMessageSender {
    pub fn sent(&self) -> Vec<OutboundMessage> {
        self.sent.lock().map(|sent| sent.clone()).unwrap_or_default()
    }

    pub fn to_operator(&self) -> Vec<OutboundMessage> {
        self.sent()
            .into_iter()
            .filter(|message| matches!(message.destination, Destination::Operator { .. }))
            .collect()
    }

    pub fn to_clients(&self) -> Vec<OutboundMessage> {
        self.sent()
            .into_iter()
            .filter(|message| matches!(message.destination, Destination::Client { .. }))
            .collect()
    }

    /// While set, every send fails and nothing is recorded.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl MessageSender for RecordingMessageSender {
    async fn send(&self, message: &OutboundMessage) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(anyhow!("delivery disabled"));
        }
        self.sent
            .lock()
            .map_err(|_| anyhow!("recording sender lock poisoned"))?
            .push(message.clone());
        Ok(())
    }
}

/// Answers lookups from a fixed table; unknown ids fail.
#[derive(Default)]
pub struct StaticConnectionLookup {
    connections: HashMap<String, ConnectionEvent>,
}

impl StaticConnectionLookup {
    pub fn new(connections: impl IntoIterator<Item = ConnectionEvent>) -> Self {
        Self {
            connections: connections
                .into_iter()
                .map(|event| (event.connection_id.clone(), event))
                .collect(),
        }
    }
}

#[async_trait]
impl ConnectionLookup for StaticConnectionLookup {
    async fn fetch_connection(&self, connection_id: &str) -> Result<ConnectionEvent> {
        self.connections
            .get(connection_id)
            .cloned()
            .ok_or_else(|| anyhow!("business connection `{connection_id}` is unknown"))
    }
}
