pub mod chat;
pub mod delivery;
pub mod events;
pub mod frames;
pub mod ids;
pub mod message;
pub mod presence;
pub mod principal;
pub mod ticket;
