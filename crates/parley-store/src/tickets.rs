use chrono::{DateTime, Utc};
use tracing::instrument;

use parley_core::ids::{OrgId, TicketId, UserId};
use parley_core::ticket::{Ticket, TicketAttachment, TicketMessage, TicketNote, TicketStatus};

use crate::database::Database;
use crate::error::StoreError;
use crate::row_helpers;

/// Fields for a ticket about to be created.
pub struct NewTicket {
    pub name: String,
    pub body: String,
    pub organization_id: OrgId,
    pub created_by: UserId,
    pub assigned_to: Option<UserId>,
}

/// Partial update applied by PATCH.
#[derive(Default)]
pub struct TicketPatch {
    pub status: Option<TicketStatus>,
    pub assigned_to: Option<UserId>,
}

pub struct TicketRepo {
    db: Database,
}

impl TicketRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Create a ticket with a sequential human-facing id (TKT-001, ...).
    #[instrument(skip(self, new), fields(org_id = %new.organization_id))]
    pub fn create(&self, new: NewTicket) -> Result<Ticket, StoreError> {
        let now = Utc::now();

        self.db.with_conn(|conn| {
            let count: i64 =
                conn.query_row("SELECT COUNT(*) FROM tickets", [], |row| row.get(0))?;
            let id = TicketId::from_raw(format!("TKT-{:03}", count + 1));

            conn.execute(
                "INSERT INTO tickets (id, name, body, status, organization_id, created_by, assigned_to, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)",
                rusqlite::params![
                    id.as_str(),
                    new.name,
                    new.body,
                    TicketStatus::Open.to_string(),
                    new.organization_id.as_str(),
                    new.created_by.as_str(),
                    new.assigned_to.as_ref().map(|u| u.as_str()),
                    now.to_rfc3339(),
                ],
            )?;

            Ok(Ticket {
                id,
                name: new.name,
                body: new.body,
                status: TicketStatus::Open,
                organization_id: new.organization_id,
                created_by: new.created_by,
                assigned_to: new.assigned_to,
                notes: Vec::new(),
                communication: Vec::new(),
                created_at: now,
                updated_at: now,
            })
        })
    }

    /// Get a ticket by ID.
    #[instrument(skip(self), fields(ticket_id = %id))]
    pub fn get(&self, id: &TicketId) -> Result<Ticket, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!("{SELECT_COLUMNS} WHERE id = ?1"))?;
            let mut rows = stmt.query([id.as_str()])?;
            match rows.next()? {
                Some(row) => row_to_ticket(row),
                None => Err(StoreError::NotFound(format!("ticket {id}"))),
            }
        })
    }

    /// All tickets of an organization, newest first.
    #[instrument(skip(self), fields(org_id = %org_id))]
    pub fn list_by_org(&self, org_id: &OrgId) -> Result<Vec<Ticket>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "{SELECT_COLUMNS} WHERE organization_id = ?1 ORDER BY created_at DESC"
            ))?;
            let mut rows = stmt.query([org_id.as_str()])?;
            let mut tickets = Vec::new();
            while let Some(row) = rows.next()? {
                tickets.push(row_to_ticket(row)?);
            }
            Ok(tickets)
        })
    }

    /// Apply a partial update (status and/or assignee).
    #[instrument(skip(self, patch), fields(ticket_id = %id))]
    pub fn update(&self, id: &TicketId, patch: TicketPatch) -> Result<Ticket, StoreError> {
        // Existence check up front so PATCH on a missing ticket is NotFound,
        // not a zero-row update.
        let current = self.get(id)?;
        let status = patch.status.unwrap_or(current.status);
        let assigned_to = patch.assigned_to.or(current.assigned_to);
        let now = Utc::now();

        self.db.with_conn(|conn| {
            conn.execute(
                "UPDATE tickets SET status = ?1, assigned_to = ?2, updated_at = ?3 WHERE id = ?4",
                rusqlite::params![
                    status.to_string(),
                    assigned_to.as_ref().map(|u| u.as_str()),
                    now.to_rfc3339(),
                    id.as_str(),
                ],
            )?;
            Ok(())
        })?;

        self.get(id)
    }

    /// Append an internal note.
    #[instrument(skip(self, author, content), fields(ticket_id = %id))]
    pub fn add_note(
        &self,
        id: &TicketId,
        author: &str,
        author_id: &UserId,
        content: &str,
    ) -> Result<Ticket, StoreError> {
        let now = Utc::now();
        let note = TicketNote {
            id: format!("N-{}", now.timestamp_millis()),
            author: author.to_string(),
            author_id: author_id.clone(),
            content: content.to_string(),
            created_at: now,
        };

        let mut ticket = self.get(id)?;
        ticket.notes.push(note);
        self.write_thread(id, "notes", &serde_json::to_string(&ticket.notes)?, now)?;
        self.get(id)
    }

    /// Append a message to the communication thread.
    #[instrument(skip(self, author, content, attachment), fields(ticket_id = %id))]
    pub fn add_message(
        &self,
        id: &TicketId,
        author: &str,
        author_id: &UserId,
        content: &str,
        attachment: Option<TicketAttachment>,
    ) -> Result<Ticket, StoreError> {
        let now = Utc::now();
        let message = TicketMessage {
            id: format!("C-{}", now.timestamp_millis()),
            author: author.to_string(),
            author_id: author_id.clone(),
            content: content.to_string(),
            attachment,
            created_at: now,
        };

        let mut ticket = self.get(id)?;
        ticket.communication.push(message);
        self.write_thread(
            id,
            "communication",
            &serde_json::to_string(&ticket.communication)?,
            now,
        )?;
        self.get(id)
    }

    fn write_thread(
        &self,
        id: &TicketId,
        column: &'static str,
        json: &str,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.db.with_conn(|conn| {
            conn.execute(
                &format!("UPDATE tickets SET {column} = ?1, updated_at = ?2 WHERE id = ?3"),
                rusqlite::params![json, now.to_rfc3339(), id.as_str()],
            )?;
            Ok(())
        })
    }
}

const SELECT_COLUMNS: &str =
    "SELECT id, name, body, status, organization_id, created_by, assigned_to, notes, communication, created_at, updated_at
     FROM tickets";

fn row_to_ticket(row: &rusqlite::Row<'_>) -> Result<Ticket, StoreError> {
    let status_str: String = row_helpers::get(row, 3, "tickets", "status")?;
    let notes_raw: String = row_helpers::get(row, 7, "tickets", "notes")?;
    let communication_raw: String = row_helpers::get(row, 8, "tickets", "communication")?;
    let created_raw: String = row_helpers::get(row, 9, "tickets", "created_at")?;
    let updated_raw: String = row_helpers::get(row, 10, "tickets", "updated_at")?;

    Ok(Ticket {
        id: TicketId::from_raw(row_helpers::get::<String>(row, 0, "tickets", "id")?),
        name: row_helpers::get(row, 1, "tickets", "name")?,
        body: row_helpers::get(row, 2, "tickets", "body")?,
        status: row_helpers::parse_enum(&status_str, "tickets", "status")?,
        organization_id: OrgId::from_raw(row_helpers::get::<String>(row, 4, "tickets", "organization_id")?),
        created_by: UserId::from_raw(row_helpers::get::<String>(row, 5, "tickets", "created_by")?),
        assigned_to: row_helpers::get_opt::<String>(row, 6, "tickets", "assigned_to")?
            .map(UserId::from_raw),
        notes: row_helpers::parse_json(&notes_raw, "tickets", "notes")?,
        communication: row_helpers::parse_json(&communication_raw, "tickets", "communication")?,
        created_at: parse_timestamp(&created_raw, "created_at")?,
        updated_at: parse_timestamp(&updated_raw, "updated_at")?,
    })
}

fn parse_timestamp(raw: &str, column: &'static str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::CorruptRow {
            table: "tickets",
            column,
            detail: e.to_string(),
        })
}
