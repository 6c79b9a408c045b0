use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::ConversationKey;

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientProfile {
    pub username: Option<String>,
    pub full_name: Option<String>,
}

impl ClientProfile {
    pub fn display_name(&self) -> &str {
        self.full_name.as_deref().filter(|name| !name.trim().is_empty()).unwrap_or("без имени")
    }

    pub fn username_label(&self) -> String {
        match self.username.as_deref().filter(|name| !name.is_empty()) {
            Some(username) => format!("@{username}"),
            None => "нет username".to_string(),
        }
    }

    /// Link an operator can open to reach the client directly.
    pub fn contact_link(&self, client_chat_id: i64) -> String {
        match self.username.as_deref().filter(|name| !name.is_empty()) {
            Some(username) => format!("https://t.me/{username}"),
            None => format!("tg://user?id={client_chat_id}"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Client {
    pub key: ConversationKey,
    pub profile: ClientProfile,
    pub first_seen_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
}

/// Result of recording a client message; `inserted` marks the first contact.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClientUpsert {
    pub client: Client,
    pub inserted: bool,
}
