use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A business identity link that lets the service read and answer chats on its behalf.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Connection {
    pub id: String,
    pub owner_user_id: Option<i64>,
    /// Direct chat with the owner, preferred destination for operator alerts.
    pub owner_chat_id: Option<i64>,
    pub can_reply: bool,
    pub updated_at: DateTime<Utc>,
}

impl Connection {
    /// Whether a lookup from the messaging platform is still needed.
    pub fn is_incomplete(&self) -> bool {
        self.owner_user_id.is_none()
    }
}

/// Connection metadata as reported by the messaging platform.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionEvent {
    pub connection_id: String,
    pub owner_user_id: Option<i64>,
    pub owner_chat_id: Option<i64>,
    pub can_reply: bool,
}

impl ConnectionEvent {
    pub fn into_connection(self, now: DateTime<Utc>) -> Connection {
        Connection {
            id: self.connection_id,
            owner_user_id: self.owner_user_id,
            owner_chat_id: self.owner_chat_id,
            can_reply: self.can_reply,
            updated_at: now,
        }
    }
}
