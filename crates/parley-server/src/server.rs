use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::{get, patch, post, put};
use axum::{Json, Router};
use tower_http::cors::CorsLayer;

use parley_store::chats::ChatRepo;
use parley_store::messages::MessageRepo;
use parley_store::presence::PresenceRepo;
use parley_store::tickets::TicketRepo;
use parley_store::users::UserRepo;
use parley_store::Database;

use crate::auth::TokenVerifier;
use crate::chats;
use crate::push::PushGateway;
use crate::registry::ConnectionRegistry;
use crate::rooms::RoomIndex;
use crate::router::BroadcastRouter;
use crate::session;
use crate::tickets;

/// Server configuration.
pub struct ServerConfig {
    pub port: u16,
    /// Per-connection outbound queue depth before a send counts as failed.
    pub max_send_queue: usize,
    pub heartbeat_interval: Duration,
    pub heartbeat_timeout: Duration,
    pub jwt_secret: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            max_send_queue: 256,
            heartbeat_interval: Duration::from_secs(25),
            heartbeat_timeout: Duration::from_secs(60),
            jwt_secret: "change-me-dev-secret".to_string(),
        }
    }
}

/// Shared application state passed to Axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServerConfig>,
    pub registry: Arc<ConnectionRegistry>,
    pub rooms: Arc<RoomIndex>,
    pub router: Arc<BroadcastRouter>,
    pub verifier: Arc<TokenVerifier>,
    pub users: Arc<UserRepo>,
    pub chats: Arc<ChatRepo>,
    pub messages: Arc<MessageRepo>,
    pub tickets: Arc<TicketRepo>,
    pub presence: Arc<PresenceRepo>,
    pub push: Arc<dyn PushGateway>,
}

impl AppState {
    pub fn new(config: ServerConfig, db: Database, push: Arc<dyn PushGateway>) -> Self {
        let verifier = Arc::new(TokenVerifier::new(&config.jwt_secret));
        let rooms = Arc::new(RoomIndex::new());
        let registry = Arc::new(ConnectionRegistry::new(
            Arc::clone(&rooms),
            config.max_send_queue,
        ));
        let users = Arc::new(UserRepo::new(db.clone()));
        let directory: Arc<dyn crate::router::OrgDirectory> = users.clone();
        let router = Arc::new(BroadcastRouter::new(
            Arc::clone(&registry),
            Arc::clone(&rooms),
            directory,
        ));

        Self {
            config: Arc::new(config),
            registry,
            rooms,
            router,
            verifier,
            users,
            chats: Arc::new(ChatRepo::new(db.clone())),
            messages: Arc::new(MessageRepo::new(db.clone())),
            tickets: Arc::new(TicketRepo::new(db.clone())),
            presence: Arc::new(PresenceRepo::new(db)),
            push,
        }
    }
}

/// Build the Axum router with all routes.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/ws/{user_id}", get(session::ws_handler))
        .route("/chats/{chat_id}/messages", get(chats::list_messages))
        .route("/chats/{chat_id}/mark-delivered", post(chats::mark_delivered))
        .route("/chats/{chat_id}/mark-read", post(chats::mark_read))
        .route("/messages/{message_id}/status", put(chats::update_message_status))
        .route("/tickets", post(tickets::create_ticket).get(tickets::list_tickets))
        .route("/tickets/{ticket_id}", patch(tickets::update_ticket))
        .route("/tickets/{ticket_id}/notes", post(tickets::add_note))
        .route("/tickets/{ticket_id}/messages", post(tickets::add_message))
        .with_state(state)
        .layer(CorsLayer::permissive())
}

/// Create and start the server. Returns a handle that keeps it alive.
pub async fn start(
    config: ServerConfig,
    db: Database,
    push: Arc<dyn PushGateway>,
) -> Result<ServerHandle, std::io::Error> {
    let port = config.port;
    let state = AppState::new(config, db, push);
    let router = build_router(state);

    let addr = format!("0.0.0.0:{port}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    let local_addr = listener.local_addr()?;

    tracing::info!(port = local_addr.port(), "parley server started");

    let server = tokio::spawn(async move {
        axum::serve(listener, router).await.ok();
    });

    Ok(ServerHandle { port: local_addr.port(), _server: server })
}

/// Handle returned by `start()` — dropping it does not stop the server,
/// but callers usually keep it for the bound port.
pub struct ServerHandle {
    pub port: u16,
    _server: tokio::task::JoinHandle<()>,
}

/// Health check HTTP endpoint.
async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "connections": state.registry.count(),
        "rooms": state.rooms.room_count(),
    }))
}
