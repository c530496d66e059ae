//! Append-only per-conversation message log.
//!
//! Ordering contract: within a conversation, `created_at_ms` is monotonically
//! non-decreasing and `seq` is a strictly increasing insertion counter, so
//! `(created_at_ms, seq)` gives a stable total order even when two appends
//! land in the same millisecond or a clock steps backwards. Both values are
//! assigned inside a single blocking section that holds the connection lock,
//! so concurrent senders cannot interleave between the read and the insert.

use chrono::Utc;
use uuid::Uuid;

use crate::db::models::MessageRow;
use crate::db::DbPool;
use crate::error::AppError;

/// A conversation reference: a direct user pair or a group.
#[derive(Debug, Clone)]
pub enum Conversation {
    Direct { a: String, b: String },
    Group { group_id: String },
}

impl Conversation {
    pub fn direct(a: &str, b: &str) -> Self {
        Conversation::Direct {
            a: a.to_string(),
            b: b.to_string(),
        }
    }

    pub fn group(group_id: &str) -> Self {
        Conversation::Group {
            group_id: group_id.to_string(),
        }
    }

    /// Storage key. Direct pairs are keyed order-independently.
    pub fn key(&self) -> String {
        match self {
            Conversation::Direct { a, b } => {
                let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
                format!("dm:{lo}:{hi}")
            }
            Conversation::Group { group_id } => format!("group:{group_id}"),
        }
    }
}

/// A message as submitted by an authorized sender, before the store
/// assigns id, timestamp, and sequence.
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub sender_id: String,
    pub conversation: Conversation,
    pub text: Option<String>,
    pub image: Option<String>,
}

#[derive(Clone)]
pub struct ConversationStore {
    db: DbPool,
}

impl ConversationStore {
    pub fn new(db: DbPool) -> Self {
        Self { db }
    }

    /// Persist a message: assign id, timestamp, and per-conversation sequence,
    /// insert, and return the stored row. Messages are immutable afterwards.
    pub async fn append(&self, message: NewMessage) -> Result<MessageRow, AppError> {
        let db = self.db.clone();

        tokio::task::spawn_blocking(move || {
            let conn = db
                .lock()
                .map_err(|_| AppError::Internal("db lock poisoned".into()))?;

            let key = message.conversation.key();

            // Last (timestamp, seq) in this conversation; ties and clock
            // regressions are absorbed by max() and the seq counter.
            let (last_ts, last_seq): (i64, i64) = conn.query_row(
                "SELECT COALESCE(MAX(created_at_ms), 0), COALESCE(MAX(seq), 0)
                 FROM messages WHERE conversation_key = ?1",
                rusqlite::params![key],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )?;

            let created_at_ms = Utc::now().timestamp_millis().max(last_ts);
            let seq = last_seq + 1;

            let (recipient_id, group_id, is_group) = match &message.conversation {
                Conversation::Direct { a, b } => {
                    let peer = if *a == message.sender_id { b } else { a };
                    (Some(peer.clone()), None, false)
                }
                Conversation::Group { group_id } => (None, Some(group_id.clone()), true),
            };

            let row = MessageRow {
                id: Uuid::now_v7().to_string(),
                sender_id: message.sender_id,
                recipient_id,
                group_id,
                is_group,
                text: message.text,
                image: message.image,
                created_at_ms,
                seq,
            };

            conn.execute(
                "INSERT INTO messages (id, conversation_key, sender_id, recipient_id, group_id, is_group, text, image, created_at_ms, seq)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                rusqlite::params![
                    row.id,
                    key,
                    row.sender_id,
                    row.recipient_id,
                    row.group_id,
                    row.is_group,
                    row.text,
                    row.image,
                    row.created_at_ms,
                    row.seq,
                ],
            )?;

            Ok(row)
        })
        .await?
    }

    /// Full conversation history, ascending by `(created_at_ms, seq)`.
    /// Re-queryable; removed group members are rejected before this is called.
    pub async fn list_by_conversation(
        &self,
        conversation: &Conversation,
    ) -> Result<Vec<MessageRow>, AppError> {
        let db = self.db.clone();
        let key = conversation.key();

        tokio::task::spawn_blocking(move || {
            let conn = db
                .lock()
                .map_err(|_| AppError::Internal("db lock poisoned".into()))?;

            let mut stmt = conn.prepare(
                "SELECT id, sender_id, recipient_id, group_id, is_group, text, image, created_at_ms, seq
                 FROM messages
                 WHERE conversation_key = ?1
                 ORDER BY created_at_ms ASC, seq ASC",
            )?;

            let messages = stmt
                .query_map(rusqlite::params![key], |row| {
                    Ok(MessageRow {
                        id: row.get(0)?,
                        sender_id: row.get(1)?,
                        recipient_id: row.get(2)?,
                        group_id: row.get(3)?,
                        is_group: row.get(4)?,
                        text: row.get(5)?,
                        image: row.get(6)?,
                        created_at_ms: row.get(7)?,
                        seq: row.get(8)?,
                    })
                })?
                .collect::<Result<Vec<_>, _>>()?;

            Ok(messages)
        })
        .await?
    }

    /// Remove a single message from the log. Only the sender may delete.
    pub async fn delete_message(&self, message_id: &str, requester_id: &str) -> Result<(), AppError> {
        let db = self.db.clone();
        let message_id = message_id.to_string();
        let requester_id = requester_id.to_string();

        tokio::task::spawn_blocking(move || {
            let conn = db
                .lock()
                .map_err(|_| AppError::Internal("db lock poisoned".into()))?;

            let sender_id: String = conn
                .query_row(
                    "SELECT sender_id FROM messages WHERE id = ?1",
                    rusqlite::params![message_id],
                    |row| row.get(0),
                )
                .map_err(|e| match e {
                    rusqlite::Error::QueryReturnedNoRows => AppError::NotFound("message"),
                    other => AppError::from(other),
                })?;

            if sender_id != requester_id {
                return Err(AppError::Forbidden("only the sender can delete a message"));
            }

            conn.execute(
                "DELETE FROM messages WHERE id = ?1",
                rusqlite::params![message_id],
            )?;

            Ok(())
        })
        .await?
    }
}
