use crate::Database;
use crate::models::{ConversationRow, MessageRow};
use anyhow::{Result, bail};
use chrono::{DateTime, Utc};
use rusqlite::{Connection, Row};

use courier_types::events::{MessageEnvelope, format_timestamp};
use courier_types::models::{ConversationId, ConversationSummary, StoredMessage};

impl Database {
    // -- Delivery --

    /// Persist one inbound message and bump its conversation summary as a
    /// single transaction. Either both writes land or neither does.
    pub fn record_delivery(
        &self,
        envelope: &MessageEnvelope,
        increment_unread: bool,
    ) -> Result<StoredMessage> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let message = insert_message(
                &tx,
                envelope.conversation_id,
                &envelope.sender,
                &envelope.body,
                &envelope.timestamp,
            )?;
            update_conversation_summary(
                &tx,
                envelope.conversation_id,
                &envelope.timestamp,
                increment_unread,
            )?;
            tx.commit()?;
            Ok(message)
        })
    }

    // -- Conversations --

    pub fn create_conversation(&self, title: &str, last_message_at: &DateTime<Utc>) -> Result<ConversationId> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO conversations (title, last_message_at) VALUES (?1, ?2)",
                (title, format_timestamp(last_message_at)),
            )?;
            Ok(conn.last_insert_rowid())
        })
    }

    pub fn get_conversation(&self, id: ConversationId) -> Result<Option<ConversationSummary>> {
        self.with_conn(|conn| {
            let row = conn
                .query_row(
                    "SELECT id, title, last_message_at, unread_count FROM conversations WHERE id = ?1",
                    [id],
                    conversation_row,
                )
                .optional()?;
            row.map(ConversationSummary::try_from).transpose()
        })
    }

    /// Most recently active first.
    pub fn get_conversations(&self, limit: u32, offset: u32) -> Result<Vec<ConversationSummary>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, title, last_message_at, unread_count FROM conversations
                 ORDER BY last_message_at DESC
                 LIMIT ?1 OFFSET ?2",
            )?;
            let rows = stmt
                .query_map([limit, offset], conversation_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            rows.into_iter().map(ConversationSummary::try_from).collect()
        })
    }

    pub fn count_conversations(&self) -> Result<u64> {
        self.with_conn(|conn| {
            let count: i64 = conn.query_row("SELECT COUNT(*) FROM conversations", [], |row| row.get(0))?;
            Ok(count as u64)
        })
    }

    pub fn conversation_ids(&self) -> Result<Vec<ConversationId>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT id FROM conversations ORDER BY id")?;
            let ids = stmt
                .query_map([], |row| row.get(0))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(ids)
        })
    }

    /// Reset the unread counter. Returns false if the conversation is unknown.
    pub fn mark_conversation_read(&self, id: ConversationId) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE conversations SET unread_count = 0, updated_at = datetime('now') WHERE id = ?1",
                [id],
            )?;
            Ok(changed > 0)
        })
    }

    // -- Messages --

    /// Newest first.
    pub fn get_messages(&self, conversation_id: ConversationId, limit: u32, offset: u32) -> Result<Vec<StoredMessage>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, conversation_id, ts, sender, body FROM messages
                 WHERE conversation_id = ?1
                 ORDER BY ts DESC, id DESC
                 LIMIT ?2 OFFSET ?3",
            )?;
            let rows = stmt
                .query_map(rusqlite::params![conversation_id, limit, offset], message_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            rows.into_iter().map(StoredMessage::try_from).collect()
        })
    }

    /// Case-insensitive substring search over message bodies in one conversation.
    pub fn search_messages(&self, conversation_id: ConversationId, term: &str, limit: u32) -> Result<Vec<StoredMessage>> {
        let pattern = format!("%{}%", escape_like(term));
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, conversation_id, ts, sender, body FROM messages
                 WHERE conversation_id = ?1 AND body LIKE ?2 ESCAPE '\\'
                 ORDER BY ts DESC, id DESC
                 LIMIT ?3",
            )?;
            let rows = stmt
                .query_map(rusqlite::params![conversation_id, pattern, limit], message_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            rows.into_iter().map(StoredMessage::try_from).collect()
        })
    }

    pub fn count_messages(&self, conversation_id: ConversationId) -> Result<u64> {
        self.with_conn(|conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM messages WHERE conversation_id = ?1",
                [conversation_id],
                |row| row.get(0),
            )?;
            Ok(count as u64)
        })
    }
}

/// Append a message row. Callers wanting the summary kept in step must run
/// this inside the same transaction as [`update_conversation_summary`].
pub fn insert_message(
    conn: &Connection,
    conversation_id: ConversationId,
    sender: &str,
    body: &str,
    timestamp: &DateTime<Utc>,
) -> Result<StoredMessage> {
    conn.execute(
        "INSERT INTO messages (conversation_id, ts, sender, body) VALUES (?1, ?2, ?3, ?4)",
        rusqlite::params![conversation_id, format_timestamp(timestamp), sender, body],
    )?;

    Ok(StoredMessage {
        id: conn.last_insert_rowid(),
        conversation_id,
        timestamp: *timestamp,
        sender: sender.to_string(),
        body: body.to_string(),
    })
}

/// Move `last_message_at` to the message time and optionally bump the unread
/// counter. Fails if the conversation does not exist.
pub fn update_conversation_summary(
    conn: &Connection,
    conversation_id: ConversationId,
    last_message_at: &DateTime<Utc>,
    increment_unread: bool,
) -> Result<()> {
    let changed = conn.execute(
        "UPDATE conversations
         SET last_message_at = ?2,
             unread_count = unread_count + ?3,
             updated_at = datetime('now')
         WHERE id = ?1",
        rusqlite::params![conversation_id, format_timestamp(last_message_at), increment_unread as i64],
    )?;

    if changed == 0 {
        bail!("Conversation not found: {}", conversation_id);
    }
    Ok(())
}

fn conversation_row(row: &Row<'_>) -> rusqlite::Result<ConversationRow> {
    Ok(ConversationRow {
        id: row.get(0)?,
        title: row.get(1)?,
        last_message_at: row.get(2)?,
        unread_count: row.get(3)?,
    })
}

fn message_row(row: &Row<'_>) -> rusqlite::Result<MessageRow> {
    Ok(MessageRow {
        id: row.get(0)?,
        conversation_id: row.get(1)?,
        ts: row.get(2)?,
        sender: row.get(3)?,
        body: row.get(4)?,
    })
}

fn escape_like(term: &str) -> String {
    let mut out = String::with_capacity(term.len());
    for c in term.chars() {
        if matches!(c, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// Extension trait for optional query results
trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts(h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 15, h, 0, 0).unwrap()
    }

    fn envelope(conversation_id: ConversationId, body: &str) -> MessageEnvelope {
        MessageEnvelope {
            conversation_id,
            timestamp: ts(10),
            sender: "Alice".into(),
            body: body.into(),
        }
    }

    #[test]
    fn delivery_updates_summary() {
        let db = Database::open_in_memory().unwrap();
        let id = db.create_conversation("Alice", &ts(8)).unwrap();

        let stored = db.record_delivery(&envelope(id, "hi"), true).unwrap();
        assert_eq!(stored.conversation_id, id);
        assert_eq!(stored.body, "hi");

        let summary = db.get_conversation(id).unwrap().unwrap();
        assert_eq!(summary.unread_count, 1);
        assert_eq!(summary.last_message_at, ts(10));

        db.record_delivery(&envelope(id, "again"), false).unwrap();
        let summary = db.get_conversation(id).unwrap().unwrap();
        assert_eq!(summary.unread_count, 1);
        assert_eq!(db.count_messages(id).unwrap(), 2);
    }

    #[test]
    fn message_ids_are_monotonic() {
        let db = Database::open_in_memory().unwrap();
        let id = db.create_conversation("Bob", &ts(8)).unwrap();

        let first = db.record_delivery(&envelope(id, "one"), true).unwrap();
        let second = db.record_delivery(&envelope(id, "two"), true).unwrap();
        assert!(second.id > first.id);
    }

    #[test]
    fn unknown_conversation_commits_nothing() {
        let db = Database::open_in_memory().unwrap();
        let known = db.create_conversation("Carol", &ts(8)).unwrap();

        assert!(db.record_delivery(&envelope(known + 100, "lost"), true).is_err());
        assert_eq!(db.count_messages(known + 100).unwrap(), 0);
    }

    #[test]
    fn failed_summary_update_rolls_back_insert() {
        let db = Database::open_in_memory().unwrap();
        let id = db.create_conversation("Dave", &ts(8)).unwrap();

        db.with_conn(|conn| {
            conn.execute_batch(
                "CREATE TRIGGER fail_summary BEFORE UPDATE ON conversations
                 BEGIN SELECT RAISE(ABORT, 'summary write failed'); END;",
            )?;
            Ok(())
        })
        .unwrap();

        assert!(db.record_delivery(&envelope(id, "hi"), true).is_err());
        assert_eq!(db.count_messages(id).unwrap(), 0);

        let summary = db.get_conversation(id).unwrap().unwrap();
        assert_eq!(summary.unread_count, 0);
        assert_eq!(summary.last_message_at, ts(8));
    }

    #[test]
    fn conversations_order_and_mark_read() {
        let db = Database::open_in_memory().unwrap();
        let older = db.create_conversation("Older", &ts(1)).unwrap();
        let newer = db.create_conversation("Newer", &ts(2)).unwrap();

        let page = db.get_conversations(10, 0).unwrap();
        assert_eq!(page.iter().map(|c| c.id).collect::<Vec<_>>(), vec![newer, older]);

        db.record_delivery(&envelope(older, "bump"), true).unwrap();
        let page = db.get_conversations(1, 0).unwrap();
        assert_eq!(page[0].id, older);
        assert_eq!(page[0].unread_count, 1);

        assert!(db.mark_conversation_read(older).unwrap());
        assert_eq!(db.get_conversation(older).unwrap().unwrap().unread_count, 0);
        assert!(!db.mark_conversation_read(9999).unwrap());
    }

    #[test]
    fn search_treats_wildcards_literally() {
        let db = Database::open_in_memory().unwrap();
        let id = db.create_conversation("Eve", &ts(1)).unwrap();
        db.record_delivery(&envelope(id, "100% sure"), true).unwrap();
        db.record_delivery(&envelope(id, "100 percent"), true).unwrap();

        let hits = db.search_messages(id, "100%", 10).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].body, "100% sure");

        let hits = db.search_messages(id, "PERCENT", 10).unwrap();
        assert_eq!(hits.len(), 1);
    }
}
