pub mod chats;
pub mod database;
pub mod error;
pub mod messages;
pub mod presence;
pub mod row_helpers;
pub mod schema;
pub mod tickets;
pub mod users;

pub use database::Database;
pub use error::StoreError;
