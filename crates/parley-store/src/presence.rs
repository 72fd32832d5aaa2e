use chrono::{DateTime, Utc};
use tracing::instrument;

use parley_core::ids::{ChatId, UserId};
use parley_core::presence::Presence;

use crate::database::Database;
use crate::error::StoreError;
use crate::row_helpers;

/// Presence rows exist for display purposes only; the connection registry
/// remains the source of truth for actual liveness.
pub struct PresenceRepo {
    db: Database,
}

impl PresenceRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Record connect/disconnect. Going offline also clears the typing
    /// indicator and current chat, matching a full disconnect cleanup.
    #[instrument(skip(self), fields(user_id = %user_id, is_online))]
    pub fn set_online(&self, user_id: &UserId, is_online: bool) -> Result<(), StoreError> {
        let now = Utc::now().to_rfc3339();
        self.db.with_conn(|conn| {
            if is_online {
                conn.execute(
                    "INSERT INTO presence (user_id, is_online, last_seen)
                     VALUES (?1, 1, ?2)
                     ON CONFLICT(user_id) DO UPDATE SET is_online = 1, last_seen = ?2",
                    rusqlite::params![user_id.as_str(), now],
                )?;
            } else {
                conn.execute(
                    "INSERT INTO presence (user_id, is_online, last_seen, is_typing, current_chat_id)
                     VALUES (?1, 0, ?2, 0, NULL)
                     ON CONFLICT(user_id) DO UPDATE SET
                        is_online = 0, last_seen = ?2, is_typing = 0, current_chat_id = NULL",
                    rusqlite::params![user_id.as_str(), now],
                )?;
            }
            Ok(())
        })
    }

    /// Record a typing indicator. Typing binds the user to a chat; stopping
    /// clears the binding.
    #[instrument(skip(self), fields(user_id = %user_id, is_typing))]
    pub fn set_typing(
        &self,
        user_id: &UserId,
        chat_id: Option<&ChatId>,
        is_typing: bool,
    ) -> Result<(), StoreError> {
        let current_chat = if is_typing { chat_id.map(|c| c.as_str()) } else { None };
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO presence (user_id, is_typing, current_chat_id)
                 VALUES (?1, ?2, ?3)
                 ON CONFLICT(user_id) DO UPDATE SET is_typing = ?2, current_chat_id = ?3",
                rusqlite::params![user_id.as_str(), is_typing as i64, current_chat],
            )?;
            Ok(())
        })
    }

    /// Presence snapshot; offline default for users never seen.
    pub fn get(&self, user_id: &UserId) -> Result<Presence, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT user_id, is_online, last_seen, is_typing, current_chat_id
                 FROM presence WHERE user_id = ?1",
            )?;
            let mut rows = stmt.query([user_id.as_str()])?;
            match rows.next()? {
                Some(row) => row_to_presence(row),
                None => Ok(Presence::offline(user_id.clone())),
            }
        })
    }
}

fn row_to_presence(row: &rusqlite::Row<'_>) -> Result<Presence, StoreError> {
    let last_seen_raw: Option<String> = row_helpers::get_opt(row, 2, "presence", "last_seen")?;
    let last_seen = last_seen_raw
        .as_deref()
        .map(parse_timestamp)
        .transpose()?;

    Ok(Presence {
        user_id: UserId::from_raw(row_helpers::get::<String>(row, 0, "presence", "user_id")?),
        is_online: row_helpers::get::<i64>(row, 1, "presence", "is_online")? != 0,
        last_seen,
        is_typing: row_helpers::get::<i64>(row, 3, "presence", "is_typing")? != 0,
        current_chat_id: row_helpers::get_opt::<String>(row, 4, "presence", "current_chat_id")?
            .map(ChatId::from_raw),
    })
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::CorruptRow {
            table: "presence",
            column: "last_seen",
            detail: e.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> (PresenceRepo, UserId) {
        let db = Database::in_memory().unwrap();
        (PresenceRepo::new(db), UserId::from_raw("user_a"))
    }

    #[test]
    fn unknown_user_is_offline() {
        let (repo, user) = setup();
        let p = repo.get(&user).unwrap();
        assert!(!p.is_online);
        assert!(p.last_seen.is_none());
    }

    #[test]
    fn connect_sets_online_and_last_seen() {
        let (repo, user) = setup();
        repo.set_online(&user, true).unwrap();
        let p = repo.get(&user).unwrap();
        assert!(p.is_online);
        assert!(p.last_seen.is_some());
    }

    #[test]
    fn disconnect_clears_typing_state() {
        let (repo, user) = setup();
        let chat = ChatId::from_raw("c1");
        repo.set_online(&user, true).unwrap();
        repo.set_typing(&user, Some(&chat), true).unwrap();

        let typing = repo.get(&user).unwrap();
        assert!(typing.is_typing);
        assert_eq!(typing.current_chat_id, Some(chat));

        repo.set_online(&user, false).unwrap();
        let p = repo.get(&user).unwrap();
        assert!(!p.is_online);
        assert!(!p.is_typing);
        assert!(p.current_chat_id.is_none());
        assert!(p.last_seen.is_some());
    }

    #[test]
    fn stop_typing_clears_current_chat() {
        let (repo, user) = setup();
        let chat = ChatId::from_raw("c1");
        repo.set_typing(&user, Some(&chat), true).unwrap();
        repo.set_typing(&user, Some(&chat), false).unwrap();

        let p = repo.get(&user).unwrap();
        assert!(!p.is_typing);
        assert!(p.current_chat_id.is_none());
    }
}
