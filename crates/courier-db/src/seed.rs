use anyhow::Result;
use chrono::{Duration, Utc};
use rand::Rng;
use rand::seq::IndexedRandom;
use tracing::info;

use courier_types::events::format_timestamp;

use crate::Database;
use crate::queries::insert_message;

const FIRST_NAMES: &[&str] = &[
    "James", "Mary", "John", "Patricia", "Robert", "Jennifer", "Michael", "Linda",
    "William", "Barbara", "David", "Elizabeth", "Richard", "Susan", "Joseph", "Jessica",
];

const LAST_NAMES: &[&str] = &[
    "Smith", "Johnson", "Williams", "Brown", "Jones", "Garcia", "Miller", "Davis",
    "Martinez", "Wilson", "Anderson", "Taylor",
];

const BODIES: &[&str] = &[
    "Hey! How are you?",
    "Did you see the news today?",
    "Let's catch up soon",
    "Thanks for your help!",
    "Can we schedule a meeting?",
    "That sounds great!",
    "Perfect, see you then",
    "What do you think?",
    "Good morning!",
    "Have a great day!",
];

impl Database {
    /// Populate demo conversations with some history, unless the store
    /// already holds at least `conversations` of them. Returns how many
    /// conversations were created.
    pub fn seed(&self, conversations: u32, messages_per_conversation: u32) -> Result<u32> {
        let existing = self.count_conversations()?;
        if existing >= conversations as u64 {
            info!("Database already seeded ({} conversations)", existing);
            return Ok(0);
        }
        let to_create = conversations - existing as u32;

        info!("Seeding {} conversations", to_create);
        let mut rng = rand::rng();
        let now = Utc::now();

        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            for _ in 0..to_create {
                let title = random_name(&mut rng);
                let unread: u32 = rng.random_range(0..5);
                let mut latest = now - Duration::days(30);

                tx.execute(
                    "INSERT INTO conversations (title, last_message_at, unread_count) VALUES (?1, ?2, ?3)",
                    rusqlite::params![title, format_timestamp(&latest), unread],
                )?;
                let id = tx.last_insert_rowid();

                for _ in 0..messages_per_conversation {
                    let sender = if rng.random_bool(0.5) {
                        "me".to_string()
                    } else {
                        random_name(&mut rng)
                    };
                    let body = BODIES.choose(&mut rng).copied().unwrap_or_default();
                    let ts = now - Duration::hours(rng.random_range(0..720));
                    insert_message(&tx, id, &sender, body, &ts)?;
                    latest = latest.max(ts);
                }

                tx.execute(
                    "UPDATE conversations SET last_message_at = ?2 WHERE id = ?1",
                    rusqlite::params![id, format_timestamp(&latest)],
                )?;
            }
            tx.commit()?;
            Ok(())
        })?;

        info!("Seeding complete");
        Ok(to_create)
    }
}

fn random_name(rng: &mut impl Rng) -> String {
    let first = FIRST_NAMES.choose(&mut *rng).copied().unwrap_or_default();
    let last = LAST_NAMES.choose(&mut *rng).copied().unwrap_or_default();
    format!("{} {}", first, last)
}
