//! HTTP endpoints for message history and receipt catch-up.
//!
//! Clients reconnecting after a gap fetch history and replay their receipt
//! state here; the live-path equivalents are the WebSocket frames.

use axum::extract::{Path, State};
use axum::Json;
use serde::Deserialize;

use parley_core::chat::Chat;
use parley_core::delivery::DeliveryStatus;
use parley_core::ids::{ChatId, MessageId};
use parley_core::message::ChatMessage;
use parley_core::principal::Principal;

use crate::auth::AuthPrincipal;
use crate::error::ApiError;
use crate::server::AppState;

/// Participant + organization check shared by every chat route.
fn authorize_chat_access(
    state: &AppState,
    chat_id: &ChatId,
    principal: &Principal,
) -> Result<Chat, ApiError> {
    let chat = state.chats.get(chat_id)?;
    if !chat.participants.contains(&principal.user_id) {
        return Err(ApiError::Forbidden("not a participant".into()));
    }
    if chat.organization_id != principal.org_id {
        return Err(ApiError::Forbidden("wrong organization".into()));
    }
    Ok(chat)
}

pub async fn list_messages(
    State(state): State<AppState>,
    AuthPrincipal(principal): AuthPrincipal,
    Path(chat_id): Path<String>,
) -> Result<Json<Vec<ChatMessage>>, ApiError> {
    let chat_id = ChatId::from_raw(chat_id);
    authorize_chat_access(&state, &chat_id, &principal)?;
    Ok(Json(state.messages.list(&chat_id)?))
}

pub async fn mark_delivered(
    State(state): State<AppState>,
    AuthPrincipal(principal): AuthPrincipal,
    Path(chat_id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let chat_id = ChatId::from_raw(chat_id);
    authorize_chat_access(&state, &chat_id, &principal)?;
    let updated_count = state.messages.mark_delivered(&chat_id, &principal.user_id)?;
    Ok(Json(serde_json::json!({ "updated_count": updated_count })))
}

pub async fn mark_read(
    State(state): State<AppState>,
    AuthPrincipal(principal): AuthPrincipal,
    Path(chat_id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let chat_id = ChatId::from_raw(chat_id);
    authorize_chat_access(&state, &chat_id, &principal)?;
    let username = state
        .users
        .display_name(&principal.user_id)
        .unwrap_or_else(|_| "User".to_string());
    let (updated_count, seen_at) =
        state.messages.mark_read(&chat_id, &principal.user_id, &username)?;
    Ok(Json(serde_json::json!({
        "updated_count": updated_count,
        "seen_at": seen_at.to_rfc3339(),
    })))
}

#[derive(Deserialize)]
pub struct StatusBody {
    pub status: DeliveryStatus,
}

/// Administrative status override. A regression (`read` back to
/// `delivered`, anything back to `sent`) is rejected with a conflict and
/// nothing is written.
pub async fn update_message_status(
    State(state): State<AppState>,
    AuthPrincipal(principal): AuthPrincipal,
    Path(message_id): Path<String>,
    Json(body): Json<StatusBody>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let message_id = MessageId::from_raw(message_id);
    let message = state.messages.get(&message_id)?;
    authorize_chat_access(&state, &message.chat_id, &principal)?;

    state.messages.update_status(&message_id, body.status)?;
    Ok(Json(serde_json::json!({ "status": body.status.to_string() })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::push::NoopPushGateway;
    use crate::server::ServerConfig;
    use parley_core::chat::ChatKind;
    use parley_core::ids::{OrgId, UserId};
    use parley_core::principal::Role;
    use parley_store::Database;
    use std::sync::Arc;

    fn test_state() -> AppState {
        let db = Database::in_memory().unwrap();
        AppState::new(ServerConfig::default(), db, Arc::new(NoopPushGateway))
    }

    fn principal(user_id: &UserId, org: &OrgId) -> Principal {
        Principal {
            user_id: user_id.clone(),
            role: Role::User,
            org_id: org.clone(),
        }
    }

    #[test]
    fn access_denied_for_non_participant() {
        let state = test_state();
        let org = OrgId::from_raw("org_1");
        let member = UserId::from_raw("user_a");
        let outsider = UserId::from_raw("user_x");
        let chat = state
            .chats
            .create(ChatKind::Direct, None, &[member.clone()], &org)
            .unwrap();

        let result = authorize_chat_access(&state, &chat.id, &principal(&outsider, &org));
        assert!(matches!(result, Err(ApiError::Forbidden(_))));
    }

    #[test]
    fn access_denied_across_organizations() {
        let state = test_state();
        let org = OrgId::from_raw("org_1");
        let member = UserId::from_raw("user_a");
        let chat = state
            .chats
            .create(ChatKind::Direct, None, &[member.clone()], &org)
            .unwrap();

        let foreign = principal(&member, &OrgId::from_raw("org_2"));
        let result = authorize_chat_access(&state, &chat.id, &foreign);
        assert!(matches!(result, Err(ApiError::Forbidden(_))));
    }

    #[test]
    fn access_granted_for_participant() {
        let state = test_state();
        let org = OrgId::from_raw("org_1");
        let member = UserId::from_raw("user_a");
        let chat = state
            .chats
            .create(ChatKind::Direct, None, &[member.clone()], &org)
            .unwrap();

        let result = authorize_chat_access(&state, &chat.id, &principal(&member, &org));
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn status_regression_is_rejected_with_conflict() {
        let state = test_state();
        let org = OrgId::from_raw("org_1");
        let member = UserId::from_raw("user_a");
        let reader = UserId::from_raw("user_b");
        let chat = state
            .chats
            .create(ChatKind::Direct, None, &[member.clone(), reader.clone()], &org)
            .unwrap();

        let msg = state
            .messages
            .insert(parley_store::messages::NewMessage {
                chat_id: chat.id.clone(),
                sender_id: member.clone(),
                body: "hi".into(),
                message_type: Default::default(),
                attachment: None,
                reply_to: None,
                timestamp: None,
            })
            .unwrap();
        state.messages.mark_read(&chat.id, &reader, "bea").unwrap();

        let result = update_message_status(
            State(state.clone()),
            AuthPrincipal(principal(&member, &org)),
            Path(msg.id.as_str().to_string()),
            Json(StatusBody { status: DeliveryStatus::Delivered }),
        )
        .await;
        assert!(matches!(result, Err(ApiError::Conflict(_))));

        // No partial mutation applied.
        assert_eq!(state.messages.get(&msg.id).unwrap().status, DeliveryStatus::Read);
    }

    #[test]
    fn unknown_chat_is_not_found() {
        let state = test_state();
        let result = authorize_chat_access(
            &state,
            &ChatId::from_raw("chat_nope"),
            &principal(&UserId::from_raw("user_a"), &OrgId::from_raw("org_1")),
        );
        assert!(matches!(result, Err(ApiError::NotFound(_))));
    }
}
