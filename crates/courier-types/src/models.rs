use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Conversations are keyed by the store's integer row id.
pub type ConversationId = i64;

/// Liveness of the single connection to the event source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Offline,
    Reconnecting,
    Connected,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Offline => "offline",
            Self::Reconnecting => "reconnecting",
            Self::Connected => "connected",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A message that has been committed to the store. Immutable once written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredMessage {
    pub id: i64,
    pub conversation_id: ConversationId,
    #[serde(rename = "ts", serialize_with = "crate::events::rfc3339_millis")]
    pub timestamp: DateTime<Utc>,
    pub sender: String,
    pub body: String,
}

/// Derived per-conversation state, updated alongside every stored message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationSummary {
    pub id: ConversationId,
    pub title: String,
    #[serde(serialize_with = "crate::events::rfc3339_millis")]
    pub last_message_at: DateTime<Utc>,
    pub unread_count: u32,
}
