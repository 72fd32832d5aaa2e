use chrono::{DateTime, Utc};
use tracing::instrument;

use parley_core::delivery::{record_seen, DeliveryStatus, SeenEntry};
use parley_core::ids::{ChatId, MessageId, UserId};
use parley_core::message::{Attachment, ChatMessage, MessageType};

use crate::database::Database;
use crate::error::StoreError;
use crate::row_helpers;

/// Fields for a message about to be persisted.
pub struct NewMessage {
    pub chat_id: ChatId,
    pub sender_id: UserId,
    pub body: String,
    pub message_type: MessageType,
    pub attachment: Option<Attachment>,
    pub reply_to: Option<MessageId>,
    /// Client-supplied send time; defaults to server time when absent.
    pub timestamp: Option<DateTime<Utc>>,
}

pub struct MessageRepo {
    db: Database,
}

impl MessageRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Persist a new message with initial status `sent`.
    #[instrument(skip(self, new), fields(chat_id = %new.chat_id, sender_id = %new.sender_id))]
    pub fn insert(&self, new: NewMessage) -> Result<ChatMessage, StoreError> {
        let id = MessageId::new();
        let timestamp = new.timestamp.unwrap_or_else(Utc::now);
        let attachment_json = new
            .attachment
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO messages (id, chat_id, sender_id, body, message_type, attachment, reply_to, status, seen_by, timestamp)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 'sent', '[]', ?8)",
                rusqlite::params![
                    id.as_str(),
                    new.chat_id.as_str(),
                    new.sender_id.as_str(),
                    new.body,
                    new.message_type.to_string(),
                    attachment_json,
                    new.reply_to.as_ref().map(|r| r.as_str()),
                    timestamp.to_rfc3339(),
                ],
            )?;

            Ok(ChatMessage {
                id,
                chat_id: new.chat_id,
                sender_id: new.sender_id,
                body: new.body,
                message_type: new.message_type,
                attachment: new.attachment,
                reply_to: new.reply_to,
                status: DeliveryStatus::Sent,
                seen_at: None,
                seen_by: Vec::new(),
                timestamp,
            })
        })
    }

    /// Get a message by ID.
    #[instrument(skip(self), fields(message_id = %id))]
    pub fn get(&self, id: &MessageId) -> Result<ChatMessage, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!("{SELECT_COLUMNS} WHERE id = ?1"))?;
            let mut rows = stmt.query([id.as_str()])?;
            match rows.next()? {
                Some(row) => row_to_message(row),
                None => Err(StoreError::NotFound(format!("message {id}"))),
            }
        })
    }

    /// All messages of a chat in send order.
    #[instrument(skip(self), fields(chat_id = %chat_id))]
    pub fn list(&self, chat_id: &ChatId) -> Result<Vec<ChatMessage>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt =
                conn.prepare(&format!("{SELECT_COLUMNS} WHERE chat_id = ?1 ORDER BY timestamp"))?;
            let mut rows = stmt.query([chat_id.as_str()])?;
            let mut messages = Vec::new();
            while let Some(row) = rows.next()? {
                messages.push(row_to_message(row)?);
            }
            Ok(messages)
        })
    }

    /// Flip every `sent` message not authored by `actor` to `delivered`.
    /// Already-delivered and read messages are untouched, so repeated calls
    /// are no-ops. Returns the number of rows changed.
    #[instrument(skip(self), fields(chat_id = %chat_id, user_id = %actor))]
    pub fn mark_delivered(&self, chat_id: &ChatId, actor: &UserId) -> Result<u64, StoreError> {
        self.db.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE messages SET status = 'delivered'
                 WHERE chat_id = ?1 AND sender_id != ?2 AND status = 'sent'",
                rusqlite::params![chat_id.as_str(), actor.as_str()],
            )?;
            Ok(changed as u64)
        })
    }

    /// Record `actor` as a reader of every message in the chat they did not
    /// send and have not yet seen.
    ///
    /// For each such message: the actor is appended to the seen ledger,
    /// `seen_at` is set only if this is the first read, and `status` becomes
    /// `read` if it was not already. Messages already carrying the actor in
    /// `seen_by` are skipped and not counted, which makes duplicate
    /// read-receipts (e.g. a reconnect replaying `mark_read`) no-ops.
    ///
    /// Returns the number of messages that gained a ledger entry, and the
    /// receipt timestamp used for them.
    #[instrument(skip(self, username), fields(chat_id = %chat_id, user_id = %actor))]
    pub fn mark_read(
        &self,
        chat_id: &ChatId,
        actor: &UserId,
        username: &str,
    ) -> Result<(u64, DateTime<Utc>), StoreError> {
        let now = Utc::now();

        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, seen_at, seen_by, timestamp FROM messages
                 WHERE chat_id = ?1 AND sender_id != ?2",
            )?;
            let mut rows = stmt.query(rusqlite::params![chat_id.as_str(), actor.as_str()])?;

            let mut candidates = Vec::new();
            while let Some(row) = rows.next()? {
                let id: String = row_helpers::get(row, 0, "messages", "id")?;
                let seen_at: Option<String> = row_helpers::get_opt(row, 1, "messages", "seen_at")?;
                let seen_by: String = row_helpers::get(row, 2, "messages", "seen_by")?;
                let timestamp: String = row_helpers::get(row, 3, "messages", "timestamp")?;
                candidates.push((id, seen_at, seen_by, timestamp));
            }
            drop(rows);
            drop(stmt);

            let mut updated = 0u64;
            for (id, seen_at, seen_by_raw, timestamp) in candidates {
                let fallback = seen_at
                    .as_deref()
                    .unwrap_or(timestamp.as_str());
                let mut ledger = parse_seen_by(&seen_by_raw, fallback)?;
                let added = record_seen(
                    &mut ledger,
                    SeenEntry {
                        user_id: actor.clone(),
                        username: username.to_string(),
                        seen_at: now,
                    },
                );
                if !added {
                    continue;
                }

                let ledger_json = serde_json::to_string(&ledger)?;
                conn.execute(
                    "UPDATE messages SET status = 'read',
                        seen_at = COALESCE(seen_at, ?1),
                        seen_by = ?2
                     WHERE id = ?3",
                    rusqlite::params![now.to_rfc3339(), ledger_json, id],
                )?;
                updated += 1;
            }

            Ok((updated, now))
        })
    }

    /// Administrative status override. Rejects any transition that would
    /// regress the lifecycle; nothing is written on rejection.
    #[instrument(skip(self), fields(message_id = %id, status = %status))]
    pub fn update_status(
        &self,
        id: &MessageId,
        status: DeliveryStatus,
    ) -> Result<(), StoreError> {
        let current = self.get(id)?.status;
        current.transition_to(status)?;

        self.db.with_conn(|conn| {
            conn.execute(
                "UPDATE messages SET status = ?1 WHERE id = ?2",
                rusqlite::params![status.to_string(), id.as_str()],
            )?;
            Ok(())
        })
    }
}

const SELECT_COLUMNS: &str =
    "SELECT id, chat_id, sender_id, body, message_type, attachment, reply_to, status, seen_at, seen_by, timestamp
     FROM messages";

fn row_to_message(row: &rusqlite::Row<'_>) -> Result<ChatMessage, StoreError> {
    let message_type_str: String = row_helpers::get(row, 4, "messages", "message_type")?;
    let attachment_raw: Option<String> = row_helpers::get_opt(row, 5, "messages", "attachment")?;
    let status_str: String = row_helpers::get(row, 7, "messages", "status")?;
    let seen_at_raw: Option<String> = row_helpers::get_opt(row, 8, "messages", "seen_at")?;
    let seen_by_raw: String = row_helpers::get(row, 9, "messages", "seen_by")?;
    let timestamp_raw: String = row_helpers::get(row, 10, "messages", "timestamp")?;

    let seen_at = seen_at_raw
        .as_deref()
        .map(|raw| parse_timestamp(raw, "seen_at"))
        .transpose()?;
    let seen_by_fallback = seen_at_raw.as_deref().unwrap_or(timestamp_raw.as_str());

    Ok(ChatMessage {
        id: MessageId::from_raw(row_helpers::get::<String>(row, 0, "messages", "id")?),
        chat_id: ChatId::from_raw(row_helpers::get::<String>(row, 1, "messages", "chat_id")?),
        sender_id: UserId::from_raw(row_helpers::get::<String>(row, 2, "messages", "sender_id")?),
        body: row_helpers::get(row, 3, "messages", "body")?,
        message_type: row_helpers::parse_enum(&message_type_str, "messages", "message_type")?,
        attachment: attachment_raw
            .as_deref()
            .map(|raw| row_helpers::parse_json(raw, "messages", "attachment"))
            .transpose()?,
        reply_to: row_helpers::get_opt::<String>(row, 6, "messages", "reply_to")?
            .map(MessageId::from_raw),
        status: row_helpers::parse_enum(&status_str, "messages", "status")?,
        seen_at,
        seen_by: parse_seen_by(&seen_by_raw, seen_by_fallback)?,
        timestamp: parse_timestamp(&timestamp_raw, "timestamp")?,
    })
}

/// Parse the seen ledger, normalizing the historical scalar shape (a bare
/// reader id string) into a single-entry list. The normalization happens
/// once here at load; everything downstream only ever sees a list.
fn parse_seen_by(raw: &str, seen_at_fallback: &str) -> Result<Vec<SeenEntry>, StoreError> {
    let value: serde_json::Value = row_helpers::parse_json(raw, "messages", "seen_by")?;
    match value {
        serde_json::Value::String(reader) => {
            let seen_at = parse_timestamp(seen_at_fallback, "seen_by")?;
            Ok(vec![SeenEntry {
                user_id: UserId::from_raw(reader.clone()),
                username: reader,
                seen_at,
            }])
        }
        other => serde_json::from_value(other).map_err(|e| StoreError::CorruptRow {
            table: "messages",
            column: "seen_by",
            detail: format!("invalid ledger: {e}"),
        }),
    }
}

fn parse_timestamp(raw: &str, column: &'static str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::CorruptRow {
            table: "messages",
            column,
            detail: e.to_string(),
        })
}
