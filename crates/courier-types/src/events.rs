use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize, Serializer};

use crate::models::{ConnectionState, ConversationId, StoredMessage};

/// Event kind literal for chat messages on the wire.
pub const NEW_MESSAGE: &str = "new-message";

/// Events sent by the event source over the persistent connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", content = "data")]
pub enum WireEvent {
    /// A chat message for one conversation
    #[serde(rename = "new-message")]
    NewMessage(MessageEnvelope),
}

/// A validated `new-message` event.
///
/// Only the codec builds these from untrusted input; by the time one exists
/// every field has passed validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageEnvelope {
    pub conversation_id: ConversationId,
    #[serde(rename = "ts", serialize_with = "rfc3339_millis")]
    pub timestamp: DateTime<Utc>,
    pub sender: String,
    pub body: String,
}

impl MessageEnvelope {
    /// Wire text for this envelope, as the event source emits it.
    pub fn to_frame(&self) -> String {
        // Serializing plain strings and integers cannot fail.
        serde_json::to_string(&WireEvent::NewMessage(self.clone())).unwrap_or_default()
    }
}

/// Canonical timestamp rendering used on the wire and in the store.
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub(crate) fn rfc3339_millis<S: Serializer>(ts: &DateTime<Utc>, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(&format_timestamp(ts))
}

/// Notifications pushed to the consuming application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "kebab-case")]
pub enum BoundaryEvent {
    /// The connection moved to a new state
    StateChanged { state: ConnectionState },

    /// A message was committed to the store
    MessageReceived {
        message: StoredMessage,
        #[serde(rename = "conversationId")]
        conversation_id: ConversationId,
    },
}
