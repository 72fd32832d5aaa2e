//! Ephemeral room subscriptions.
//!
//! A room is the set of users currently viewing a chat over a live
//! connection, distinct from the chat's persisted participant list. Rooms
//! exist only in memory and empty rooms are dropped eagerly.

use std::collections::HashSet;

use dashmap::DashMap;

use parley_core::ids::{ChatId, UserId};

#[derive(Default)]
pub struct RoomIndex {
    rooms: DashMap<ChatId, HashSet<UserId>>,
    /// Most recently joined room per user, for typing-indicator attribution.
    current: DashMap<UserId, ChatId>,
}

impl RoomIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe a user to a room and record it as their current room.
    pub fn join(&self, user_id: UserId, chat_id: ChatId) {
        self.rooms
            .entry(chat_id.clone())
            .or_default()
            .insert(user_id.clone());
        self.current.insert(user_id, chat_id);
    }

    /// Remove a user from a room; clears their current room if it matches.
    pub fn leave(&self, user_id: &UserId, chat_id: &ChatId) {
        if let Some(mut members) = self.rooms.get_mut(chat_id) {
            members.remove(user_id);
            let emptied = members.is_empty();
            drop(members);
            if emptied {
                self.rooms.remove_if(chat_id, |_, m| m.is_empty());
            }
        }
        self.current
            .remove_if(user_id, |_, current| current == chat_id);
    }

    /// Snapshot of a room's members. Unknown rooms yield an empty set,
    /// never an error. Fan-out iterates this snapshot so membership churn
    /// during a broadcast cannot skip or double-send.
    pub fn members(&self, chat_id: &ChatId) -> HashSet<UserId> {
        self.rooms
            .get(chat_id)
            .map(|m| m.clone())
            .unwrap_or_default()
    }

    /// Remove a user from every room (disconnect path).
    pub fn purge_user(&self, user_id: &UserId) {
        self.rooms.retain(|_, members| {
            members.remove(user_id);
            !members.is_empty()
        });
        self.current.remove(user_id);
    }

    /// The room a typing indicator should attribute to, if any.
    pub fn current_room(&self, user_id: &UserId) -> Option<ChatId> {
        self.current.get(user_id).map(|c| c.clone())
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }
}
