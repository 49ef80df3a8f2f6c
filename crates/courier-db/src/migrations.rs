use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS conversations (
            id              INTEGER PRIMARY KEY AUTOINCREMENT,
            title           TEXT NOT NULL,
            last_message_at TEXT NOT NULL,
            unread_count    INTEGER NOT NULL DEFAULT 0,
            created_at      TEXT NOT NULL DEFAULT (datetime('now')),
            updated_at      TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS messages (
            id              INTEGER PRIMARY KEY AUTOINCREMENT,
            conversation_id INTEGER NOT NULL REFERENCES conversations(id) ON DELETE CASCADE,
            ts              TEXT NOT NULL,
            sender          TEXT NOT NULL,
            body            TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_messages_conversation_ts
            ON messages(conversation_id, ts DESC);

        CREATE INDEX IF NOT EXISTS idx_conversations_last_message_at
            ON conversations(last_message_at DESC);
        ",
    )?;

    info!("Database migrations complete");
    Ok(())
}
