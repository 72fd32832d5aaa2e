use chrono::{DateTime, Utc};
use tracing::instrument;

use parley_core::chat::{Chat, ChatKind};
use parley_core::ids::{ChatId, OrgId, UserId};

use crate::database::Database;
use crate::error::StoreError;
use crate::row_helpers;

pub struct ChatRepo {
    db: Database,
}

impl ChatRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Create a chat with its durable participant list.
    #[instrument(skip(self, participants), fields(kind = %kind, org_id = %organization_id))]
    pub fn create(
        &self,
        kind: ChatKind,
        name: Option<&str>,
        participants: &[UserId],
        organization_id: &OrgId,
    ) -> Result<Chat, StoreError> {
        let id = ChatId::new();
        let now = Utc::now();
        let participants_json = serde_json::to_string(participants)?;

        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO chats (id, kind, name, participants, organization_id, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                rusqlite::params![
                    id.as_str(),
                    kind.to_string(),
                    name,
                    participants_json,
                    organization_id.as_str(),
                    now.to_rfc3339(),
                ],
            )?;

            Ok(Chat {
                id,
                kind,
                name: name.map(String::from),
                participants: participants.to_vec(),
                organization_id: organization_id.clone(),
                last_message: None,
                created_at: now,
            })
        })
    }

    /// Get a chat by ID.
    #[instrument(skip(self), fields(chat_id = %id))]
    pub fn get(&self, id: &ChatId) -> Result<Chat, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, kind, name, participants, organization_id, last_message, created_at
                 FROM chats WHERE id = ?1",
            )?;
            let mut rows = stmt.query([id.as_str()])?;
            match rows.next()? {
                Some(row) => row_to_chat(row),
                None => Err(StoreError::NotFound(format!("chat {id}"))),
            }
        })
    }

    /// Durable participant list (not the live room membership).
    pub fn participants(&self, id: &ChatId) -> Result<Vec<UserId>, StoreError> {
        Ok(self.get(id)?.participants)
    }

    /// Whether a user is a persisted participant of the chat.
    pub fn is_participant(&self, id: &ChatId, user_id: &UserId) -> Result<bool, StoreError> {
        Ok(self.participants(id)?.contains(user_id))
    }
}

fn row_to_chat(row: &rusqlite::Row<'_>) -> Result<Chat, StoreError> {
    let kind_str: String = row_helpers::get(row, 1, "chats", "kind")?;
    let participants_raw: String = row_helpers::get(row, 3, "chats", "participants")?;
    let created_raw: String = row_helpers::get(row, 6, "chats", "created_at")?;

    Ok(Chat {
        id: ChatId::from_raw(row_helpers::get::<String>(row, 0, "chats", "id")?),
        kind: row_helpers::parse_enum(&kind_str, "chats", "kind")?,
        name: row_helpers::get_opt(row, 2, "chats", "name")?,
        participants: row_helpers::parse_json(&participants_raw, "chats", "participants")?,
        organization_id: OrgId::from_raw(row_helpers::get::<String>(row, 4, "chats", "organization_id")?),
        last_message: row_helpers::get_opt(row, 5, "chats", "last_message")?,
        created_at: parse_timestamp(&created_raw)?,
    })
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::CorruptRow {
            table: "chats",
            column: "created_at",
            detail: e.to_string(),
        })
}
