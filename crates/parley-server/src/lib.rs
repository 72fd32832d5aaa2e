pub mod auth;
pub mod chats;
pub mod connection;
pub mod dispatch;
pub mod error;
pub mod heartbeat;
pub mod push;
pub mod registry;
pub mod rooms;
pub mod router;
pub mod server;
pub mod session;
pub mod tickets;

pub use server::{start, AppState, ServerConfig, ServerHandle};
