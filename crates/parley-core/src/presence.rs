use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{ChatId, UserId};

/// Per-user presence persisted for display purposes. Independent of the
/// connection registry's liveness bookkeeping: a user can show "online"
/// for a moment after their socket died, until cleanup lands.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Presence {
    pub user_id: UserId,
    pub is_online: bool,
    pub last_seen: Option<DateTime<Utc>>,
    pub is_typing: bool,
    pub current_chat_id: Option<ChatId>,
}

impl Presence {
    /// Offline default for users never seen connecting.
    pub fn offline(user_id: UserId) -> Self {
        Self {
            user_id,
            is_online: false,
            last_seen: None,
            is_typing: false,
            current_chat_id: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offline_default() {
        let p = Presence::offline(UserId::from_raw("user_a"));
        assert!(!p.is_online);
        assert!(!p.is_typing);
        assert!(p.last_seen.is_none());
        assert!(p.current_chat_id.is_none());
    }
}
