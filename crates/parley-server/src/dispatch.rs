//! Frame dispatch: maps each decoded client frame onto the room index,
//! delivery state machine and broadcast router.

use std::sync::Arc;

use tracing::{debug, error, warn};

use parley_core::events::ServerEvent;
use parley_core::frames::ClientFrame;
use parley_core::ids::ChatId;
use parley_store::messages::NewMessage;

use crate::connection::Connection;
use crate::push::{self, MessageNotification};
use crate::server::AppState;

/// Handle one decoded frame from an open connection.
pub async fn handle_frame(state: &AppState, conn: &Arc<Connection>, frame: ClientFrame) {
    let user_id = conn.user_id().clone();

    match frame {
        ClientFrame::JoinChat { chat_id } => {
            debug!(user_id = %user_id, chat_id = %chat_id, "join chat");
            state.rooms.join(user_id.clone(), chat_id.clone());
            state
                .registry
                .send(&user_id, &ServerEvent::JoinedChat { chat_id });
        }

        ClientFrame::LeaveChat { chat_id } => {
            debug!(user_id = %user_id, chat_id = %chat_id, "leave chat");
            state.rooms.leave(&user_id, &chat_id);
        }

        ClientFrame::Typing { chat_id, is_typing } => {
            if let Err(e) = state
                .presence
                .set_typing(&user_id, Some(&chat_id), is_typing)
            {
                warn!(user_id = %user_id, error = %e, "failed to persist typing state");
            }
            state.router.to_room(
                &chat_id,
                &ServerEvent::Typing {
                    chat_id: chat_id.clone(),
                    user_id: user_id.clone(),
                    is_typing,
                },
                Some(&user_id),
            );
        }

        ClientFrame::Message {
            chat_id,
            message,
            timestamp,
            message_type,
            attachment,
            reply_to,
        } => {
            // Persist before broadcasting: a client that reconnects right
            // after seeing the broadcast must be able to re-fetch it.
            let stored = state.messages.insert(NewMessage {
                chat_id: chat_id.clone(),
                sender_id: user_id.clone(),
                body: message,
                message_type,
                attachment,
                reply_to,
                timestamp,
            });

            let stored = match stored {
                Ok(stored) => stored,
                Err(e) => {
                    error!(user_id = %user_id, chat_id = %chat_id, error = %e,
                        "message persistence failed, broadcast aborted");
                    state.registry.send(
                        &user_id,
                        &ServerEvent::Error {
                            code: "PERSIST_FAILED".into(),
                            message: "message could not be stored".into(),
                        },
                    );
                    return;
                }
            };

            state.router.to_room(
                &chat_id,
                &ServerEvent::NewMessage {
                    chat_id: chat_id.clone(),
                    sender_id: user_id.clone(),
                    message: stored.body.clone(),
                    timestamp: stored.timestamp,
                    message_type: stored.message_type,
                    attachment: stored.attachment.clone(),
                    reply_to: stored.reply_to.clone(),
                },
                Some(&user_id),
            );

            notify_offline_recipients(state, conn, &chat_id, &stored.body, stored.message_type);
        }

        ClientFrame::MarkDelivered { chat_id } => {
            match state.messages.mark_delivered(&chat_id, &user_id) {
                Ok(updated_count) => {
                    state.router.to_room(
                        &chat_id,
                        &ServerEvent::MessagesDelivered {
                            chat_id: chat_id.clone(),
                            user_id: user_id.clone(),
                            updated_count,
                        },
                        Some(&user_id),
                    );
                }
                Err(e) => {
                    warn!(user_id = %user_id, chat_id = %chat_id, error = %e,
                        "mark delivered failed");
                }
            }
        }

        ClientFrame::MarkRead { chat_id } => {
            let username = state
                .users
                .display_name(&user_id)
                .unwrap_or_else(|_| "User".to_string());
            match state.messages.mark_read(&chat_id, &user_id, &username) {
                Ok((updated_count, seen_at)) => {
                    state.router.to_room(
                        &chat_id,
                        &ServerEvent::MessagesRead {
                            chat_id: chat_id.clone(),
                            user_id: user_id.clone(),
                            username,
                            updated_count,
                            seen_at,
                        },
                        Some(&user_id),
                    );
                }
                Err(e) => {
                    warn!(user_id = %user_id, chat_id = %chat_id, error = %e, "mark read failed");
                }
            }
        }

        ClientFrame::Pong => conn.mark_alive(),

        // Designed fallback for forward-incompatible clients.
        ClientFrame::Unknown => {
            debug!(user_id = %user_id, "ignoring unknown frame type");
        }
    }
}

/// Fire-and-forget push for the chat's other participants. Whether any of
/// them is actually offline is the gateway's concern, not ours.
fn notify_offline_recipients(
    state: &AppState,
    conn: &Arc<Connection>,
    chat_id: &ChatId,
    body: &str,
    message_type: parley_core::message::MessageType,
) {
    let sender_id = conn.user_id();
    let chat = match state.chats.get(chat_id) {
        Ok(chat) => chat,
        Err(e) => {
            debug!(chat_id = %chat_id, error = %e, "skipping push, chat not loadable");
            return;
        }
    };
    let recipients: Vec<_> = chat
        .participants
        .into_iter()
        .filter(|p| p != sender_id)
        .collect();
    let sender_name = state
        .users
        .display_name(sender_id)
        .unwrap_or_else(|_| "User".to_string());

    push::spawn_notify(
        Arc::clone(&state.push),
        MessageNotification {
            recipients,
            sender_name,
            body: body.to_string(),
            chat_id: chat_id.clone(),
            message_type,
            chat_name: chat.name,
        },
    );
}
