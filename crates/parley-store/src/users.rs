use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::instrument;

use parley_core::ids::{OrgId, UserId};
use parley_core::principal::Role;

use crate::database::Database;
use crate::error::StoreError;
use crate::row_helpers;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UserRow {
    pub id: UserId,
    pub username: String,
    pub email: String,
    pub role: Role,
    pub organization_id: Option<OrgId>,
    pub created_at: String,
}

pub struct UserRepo {
    db: Database,
}

impl UserRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Create a new user.
    #[instrument(skip(self), fields(email))]
    pub fn create(
        &self,
        username: &str,
        email: &str,
        role: Role,
        organization_id: Option<&OrgId>,
    ) -> Result<UserRow, StoreError> {
        let id = UserId::new();
        let now = Utc::now().to_rfc3339();

        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO users (id, username, email, role, organization_id, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                rusqlite::params![
                    id.as_str(),
                    username,
                    email,
                    role.to_string(),
                    organization_id.map(|o| o.as_str()),
                    now,
                ],
            )?;

            Ok(UserRow {
                id,
                username: username.to_string(),
                email: email.to_string(),
                role,
                organization_id: organization_id.cloned(),
                created_at: now,
            })
        })
    }

    /// Get a user by ID.
    #[instrument(skip(self), fields(user_id = %id))]
    pub fn get(&self, id: &UserId) -> Result<UserRow, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, username, email, role, organization_id, created_at
                 FROM users WHERE id = ?1",
            )?;
            let mut rows = stmt.query([id.as_str()])?;
            match rows.next()? {
                Some(row) => row_to_user(row),
                None => Err(StoreError::NotFound(format!("user {id}"))),
            }
        })
    }

    /// Display name for broadcasts and notifications. Falls back to the
    /// email local part for accounts without a username.
    pub fn display_name(&self, id: &UserId) -> Result<String, StoreError> {
        let user = self.get(id)?;
        if !user.username.is_empty() {
            return Ok(user.username);
        }
        Ok(user
            .email
            .split('@')
            .next()
            .unwrap_or(user.email.as_str())
            .to_string())
    }

    /// All user ids belonging to an organization, for org-wide fan-out.
    #[instrument(skip(self), fields(org_id = %org_id))]
    pub fn org_user_ids(&self, org_id: &OrgId) -> Result<Vec<UserId>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id FROM users WHERE organization_id = ?1 ORDER BY created_at",
            )?;
            let mut rows = stmt.query([org_id.as_str()])?;
            let mut ids = Vec::new();
            while let Some(row) = rows.next()? {
                let raw: String = row_helpers::get(row, 0, "users", "id")?;
                ids.push(UserId::from_raw(raw));
            }
            Ok(ids)
        })
    }
}

fn row_to_user(row: &rusqlite::Row<'_>) -> Result<UserRow, StoreError> {
    let role_str: String = row_helpers::get(row, 3, "users", "role")?;
    Ok(UserRow {
        id: UserId::from_raw(row_helpers::get::<String>(row, 0, "users", "id")?),
        username: row_helpers::get(row, 1, "users", "username")?,
        email: row_helpers::get(row, 2, "users", "email")?,
        role: row_helpers::parse_enum(&role_str, "users", "role")?,
        organization_id: row_helpers::get_opt::<String>(row, 4, "users", "organization_id")?
            .map(OrgId::from_raw),
        created_at: row_helpers::get(row, 5, "users", "created_at")?,
    })
}
