//! Database row types, mapped directly from SQLite rows.
//! Distinct from courier-types models to keep the DB layer independent.
use anyhow::{Result, anyhow};
use chrono::{DateTime, Utc};

use courier_types::models::{ConversationSummary, StoredMessage};

pub struct ConversationRow {
    pub id: i64,
    pub title: String,
    pub last_message_at: String,
    pub unread_count: i64,
}

pub struct MessageRow {
    pub id: i64,
    pub conversation_id: i64,
    pub ts: String,
    pub sender: String,
    pub body: String,
}

pub(crate) fn parse_ts(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| anyhow!("Bad stored timestamp {:?}: {}", raw, e))
}

impl TryFrom<ConversationRow> for ConversationSummary {
    type Error = anyhow::Error;

    fn try_from(row: ConversationRow) -> Result<Self> {
        Ok(Self {
            id: row.id,
            title: row.title,
            last_message_at: parse_ts(&row.last_message_at)?,
            unread_count: u32::try_from(row.unread_count)
                .map_err(|e| anyhow!("Bad stored unread count {}: {}", row.unread_count, e))?,
        })
    }
}

impl TryFrom<MessageRow> for StoredMessage {
    type Error = anyhow::Error;

    fn try_from(row: MessageRow) -> Result<Self> {
        Ok(Self {
            id: row.id,
            conversation_id: row.conversation_id,
            timestamp: parse_ts(&row.ts)?,
            sender: row.sender,
            body: row.body,
        })
    }
}
