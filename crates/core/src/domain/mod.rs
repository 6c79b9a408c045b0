pub mod client;
pub mod connection;
pub mod escalation;
pub mod knowledge;
pub mod lead;

use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifies one conversation: a client chat seen through one business connection.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConversationKey {
    pub connection_id: String,
    pub client_chat_id: i64,
}

impl ConversationKey {
    pub fn new(connection_id: impl Into<String>, client_chat_id: i64) -> Self {
        Self { connection_id: connection_id.into(), client_chat_id }
    }
}

impl fmt::Display for ConversationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.connection_id, self.client_chat_id)
    }
}
