//! Per-connection WebSocket lifecycle.
//!
//! A connection moves `Connecting → Authenticated → Open → Closed`. The
//! token is verified before any registry state is created; a failed
//! handshake closes the socket with a distinguishing code and leaves no
//! trace. Once open, the receive loop decodes frames and dispatches them
//! until the socket ends, then runs the full cleanup path.

use std::sync::Arc;

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use axum::extract::{Path, Query, State, WebSocketUpgrade};
use axum::response::Response;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tracing::{debug, info, warn};

use parley_core::frames::ClientFrame;
use parley_core::principal::Principal;

use crate::auth::TokenVerifier;
use crate::dispatch;
use crate::heartbeat;
use crate::server::AppState;

/// Missing, invalid or expired token.
pub const CLOSE_INVALID_TOKEN: u16 = 4001;
/// Path user id does not match the token's user id.
pub const CLOSE_USER_MISMATCH: u16 = 4003;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum SessionState {
    Connecting,
    Authenticated,
    Open,
    Closed,
}

#[derive(Deserialize)]
pub struct WsQuery {
    /// Bearer token as a query parameter: some duplex-channel establishment
    /// paths cannot set custom headers.
    pub token: Option<String>,
}

/// Upgrade handler for `/ws/{user_id}`.
pub async fn ws_handler(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    Query(query): Query<WsQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, user_id, query.token, state))
}

/// Verify the handshake. No registry entry exists until this passes.
pub(crate) fn authenticate(
    verifier: &TokenVerifier,
    path_user_id: &str,
    token: Option<&str>,
) -> Result<Principal, (u16, &'static str)> {
    let token = token.ok_or((CLOSE_INVALID_TOKEN, "missing authentication token"))?;
    let principal = verifier
        .verify(token)
        .map_err(|_| (CLOSE_INVALID_TOKEN, "invalid or expired token"))?;
    if principal.user_id.as_str() != path_user_id {
        return Err((CLOSE_USER_MISMATCH, "user id mismatch"));
    }
    Ok(principal)
}

async fn handle_socket(
    mut socket: WebSocket,
    path_user_id: String,
    token: Option<String>,
    state: AppState,
) {
    let mut phase = SessionState::Connecting;
    debug!(user_id = %path_user_id, state = ?phase, "socket upgraded");

    let principal = match authenticate(&state.verifier, &path_user_id, token.as_deref()) {
        Ok(principal) => principal,
        Err((code, reason)) => {
            warn!(user_id = %path_user_id, code, reason, "handshake rejected");
            let _ = socket
                .send(Message::Close(Some(CloseFrame { code, reason: reason.into() })))
                .await;
            return;
        }
    };
    phase = SessionState::Authenticated;
    debug!(user_id = %principal.user_id, state = ?phase, "handshake verified");

    let user_id = principal.user_id.clone();
    let (conn, mut outbound) = state.registry.register(user_id.clone());
    let (mut ws_tx, mut ws_rx) = socket.split();

    // Write task: drains the connection's queue onto the socket. A failed
    // write ends the task; the next queued send then fails and the registry
    // reaps the connection.
    let writer = tokio::spawn(async move {
        while let Some(text) = outbound.recv().await {
            if ws_tx.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    let _monitor = heartbeat::spawn(
        Arc::clone(&state.registry),
        Arc::clone(&conn),
        state.config.heartbeat_interval,
        state.config.heartbeat_timeout,
    );

    if let Err(e) = state.presence.set_online(&user_id, true) {
        warn!(user_id = %user_id, error = %e, "failed to persist online presence");
    }

    phase = SessionState::Open;
    info!(user_id = %user_id, epoch = conn.epoch(), state = ?phase, "connection open");

    while let Some(Ok(msg)) = ws_rx.next().await {
        match msg {
            Message::Text(text) => match serde_json::from_str::<ClientFrame>(&text) {
                Ok(frame) => dispatch::handle_frame(&state, &conn, frame).await,
                Err(e) => {
                    // Malformed input is dropped, never fatal.
                    warn!(user_id = %user_id, error = %e, "malformed frame dropped");
                }
            },
            // Protocol-level pong counts as liveness too.
            Message::Pong(_) => conn.mark_alive(),
            Message::Close(_) => break,
            _ => {}
        }
    }

    phase = SessionState::Closed;
    state.registry.unregister_conn(&user_id, conn.epoch());
    if let Err(e) = state.presence.set_online(&user_id, false) {
        warn!(user_id = %user_id, error = %e, "failed to persist offline presence");
    }
    writer.abort();
    info!(user_id = %user_id, epoch = conn.epoch(), state = ?phase, "connection closed");
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_core::ids::{OrgId, UserId};
    use parley_core::principal::Role;
    use std::time::Duration;

    const SECRET: &str = "test-secret";

    fn token_for(user: &str) -> String {
        let principal = Principal {
            user_id: UserId::from_raw(user),
            role: Role::User,
            org_id: OrgId::from_raw("org_1"),
        };
        crate::auth::issue_token(SECRET, &principal, "a@example.com", Duration::from_secs(3600))
            .unwrap()
    }

    #[test]
    fn missing_token_closes_4001() {
        let verifier = TokenVerifier::new(SECRET);
        let err = authenticate(&verifier, "user_a", None).unwrap_err();
        assert_eq!(err.0, CLOSE_INVALID_TOKEN);
    }

    #[test]
    fn invalid_token_closes_4001() {
        let verifier = TokenVerifier::new(SECRET);
        let err = authenticate(&verifier, "user_a", Some("garbage")).unwrap_err();
        assert_eq!(err.0, CLOSE_INVALID_TOKEN);
    }

    #[test]
    fn mismatched_user_closes_4003() {
        let verifier = TokenVerifier::new(SECRET);
        let token = token_for("user_a");
        let err = authenticate(&verifier, "user_b", Some(&token)).unwrap_err();
        assert_eq!(err.0, CLOSE_USER_MISMATCH);
    }

    #[test]
    fn valid_handshake_yields_principal() {
        let verifier = TokenVerifier::new(SECRET);
        let token = token_for("user_a");
        let principal = authenticate(&verifier, "user_a", Some(&token)).unwrap();
        assert_eq!(principal.user_id.as_str(), "user_a");
    }
}
