//! Ticket routes. The CRUD itself is plumbing; the part this subsystem
//! cares about is that every mutation fans a lifecycle event out to the
//! organization's live connections, off the request path.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use tracing::warn;

use parley_core::events::ServerEvent;
use parley_core::ids::{OrgId, TicketId, UserId};
use parley_core::ticket::{Ticket, TicketAttachment, TicketStatus};
use parley_store::tickets::{NewTicket, TicketPatch};

use crate::auth::AuthPrincipal;
use crate::error::ApiError;
use crate::server::AppState;

#[derive(Deserialize)]
pub struct CreateTicketBody {
    pub name: String,
    pub body: String,
    #[serde(default)]
    pub assigned_to: Option<String>,
}

#[derive(Deserialize)]
pub struct UpdateTicketBody {
    #[serde(default)]
    pub status: Option<TicketStatus>,
    #[serde(default)]
    pub assigned_to: Option<String>,
}

#[derive(Deserialize)]
pub struct NoteBody {
    pub content: String,
}

#[derive(Deserialize)]
pub struct TicketMessageBody {
    pub content: String,
    #[serde(default)]
    pub attachment: Option<TicketAttachment>,
}

pub async fn create_ticket(
    State(state): State<AppState>,
    AuthPrincipal(principal): AuthPrincipal,
    Json(body): Json<CreateTicketBody>,
) -> Result<(StatusCode, Json<Ticket>), ApiError> {
    if body.name.trim().is_empty() {
        return Err(ApiError::BadRequest("name is required".into()));
    }

    let ticket = state.tickets.create(NewTicket {
        name: body.name,
        body: body.body,
        organization_id: principal.org_id.clone(),
        created_by: principal.user_id.clone(),
        assigned_to: body.assigned_to.map(UserId::from_raw),
    })?;

    spawn_org_broadcast(
        &state,
        principal.org_id,
        ServerEvent::TicketCreated { ticket: ticket.clone() },
        Some(principal.user_id),
    );
    Ok((StatusCode::CREATED, Json(ticket)))
}

pub async fn list_tickets(
    State(state): State<AppState>,
    AuthPrincipal(principal): AuthPrincipal,
) -> Result<Json<Vec<Ticket>>, ApiError> {
    Ok(Json(state.tickets.list_by_org(&principal.org_id)?))
}

pub async fn update_ticket(
    State(state): State<AppState>,
    AuthPrincipal(principal): AuthPrincipal,
    Path(ticket_id): Path<String>,
    Json(body): Json<UpdateTicketBody>,
) -> Result<Json<Ticket>, ApiError> {
    let ticket_id = TicketId::from_raw(ticket_id);
    authorize_ticket_access(&state, &ticket_id, &principal.org_id)?;

    let updated = state.tickets.update(
        &ticket_id,
        TicketPatch {
            status: body.status,
            assigned_to: body.assigned_to.map(UserId::from_raw),
        },
    )?;

    spawn_org_broadcast(
        &state,
        principal.org_id,
        ServerEvent::TicketUpdated { ticket: updated.clone() },
        None,
    );
    Ok(Json(updated))
}

pub async fn add_note(
    State(state): State<AppState>,
    AuthPrincipal(principal): AuthPrincipal,
    Path(ticket_id): Path<String>,
    Json(body): Json<NoteBody>,
) -> Result<Json<Ticket>, ApiError> {
    let ticket_id = TicketId::from_raw(ticket_id);
    authorize_ticket_access(&state, &ticket_id, &principal.org_id)?;

    let author = author_name(&state, &principal.user_id);
    let updated = state
        .tickets
        .add_note(&ticket_id, &author, &principal.user_id, &body.content)?;

    spawn_org_broadcast(
        &state,
        principal.org_id,
        ServerEvent::TicketUpdated { ticket: updated.clone() },
        None,
    );
    Ok(Json(updated))
}

pub async fn add_message(
    State(state): State<AppState>,
    AuthPrincipal(principal): AuthPrincipal,
    Path(ticket_id): Path<String>,
    Json(body): Json<TicketMessageBody>,
) -> Result<Json<Ticket>, ApiError> {
    let ticket_id = TicketId::from_raw(ticket_id);
    authorize_ticket_access(&state, &ticket_id, &principal.org_id)?;

    let author = author_name(&state, &principal.user_id);
    let updated = state.tickets.add_message(
        &ticket_id,
        &author,
        &principal.user_id,
        &body.content,
        body.attachment,
    )?;

    spawn_org_broadcast(
        &state,
        principal.org_id,
        ServerEvent::TicketMessageAdded { ticket: updated.clone() },
        None,
    );
    Ok(Json(updated))
}

fn authorize_ticket_access(
    state: &AppState,
    ticket_id: &TicketId,
    org_id: &OrgId,
) -> Result<(), ApiError> {
    let ticket = state.tickets.get(ticket_id)?;
    if &ticket.organization_id != org_id {
        return Err(ApiError::Forbidden("wrong organization".into()));
    }
    Ok(())
}

fn author_name(state: &AppState, user_id: &UserId) -> String {
    state
        .users
        .display_name(user_id)
        .unwrap_or_else(|_| "Unknown".to_string())
}

/// Fan the event out on a detached task. The HTTP response must not wait
/// on, or fail because of, broadcast delivery.
fn spawn_org_broadcast(
    state: &AppState,
    org_id: OrgId,
    event: ServerEvent,
    exclude: Option<UserId>,
) {
    let router = state.router.clone();
    tokio::spawn(async move {
        if let Err(e) = router.to_org(&org_id, &event, exclude.as_ref()) {
            warn!(org_id = %org_id, event_type = event.event_type(), error = %e,
                "ticket fan-out failed");
        }
    });
}
