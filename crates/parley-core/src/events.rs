use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{ChatId, MessageId, UserId};
use crate::message::{Attachment, MessageType};
use crate::ticket::Ticket;

/// Outbound events fanned out to connected clients. One JSON object per
/// text frame, discriminated by `type`.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    /// Confirmation sent back to the joining client only.
    JoinedChat {
        chat_id: ChatId,
    },
    NewMessage {
        chat_id: ChatId,
        sender_id: UserId,
        message: String,
        timestamp: DateTime<Utc>,
        message_type: MessageType,
        attachment: Option<Attachment>,
        reply_to: Option<MessageId>,
    },
    Typing {
        chat_id: ChatId,
        user_id: UserId,
        is_typing: bool,
    },
    MessagesDelivered {
        chat_id: ChatId,
        user_id: UserId,
        updated_count: u64,
    },
    MessagesRead {
        chat_id: ChatId,
        user_id: UserId,
        username: String,
        updated_count: u64,
        seen_at: DateTime<Utc>,
    },
    /// Heartbeat probe; clients answer with a `pong` frame.
    Ping {
        ts: DateTime<Utc>,
    },
    TicketCreated {
        ticket: Ticket,
    },
    TicketUpdated {
        ticket: Ticket,
    },
    TicketMessageAdded {
        ticket: Ticket,
    },
    /// Delivered to a single connection when its own request failed
    /// server-side (e.g. message persistence).
    Error {
        code: String,
        message: String,
    },
}

impl ServerEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::JoinedChat { .. } => "joined_chat",
            Self::NewMessage { .. } => "new_message",
            Self::Typing { .. } => "typing",
            Self::MessagesDelivered { .. } => "messages_delivered",
            Self::MessagesRead { .. } => "messages_read",
            Self::Ping { .. } => "ping",
            Self::TicketCreated { .. } => "ticket_created",
            Self::TicketUpdated { .. } => "ticket_updated",
            Self::TicketMessageAdded { .. } => "ticket_message_added",
            Self::Error { .. } => "error",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_message_wire_shape() {
        let evt = ServerEvent::NewMessage {
            chat_id: ChatId::from_raw("c1"),
            sender_id: UserId::from_raw("user_a"),
            message: "hi".into(),
            timestamp: Utc::now(),
            message_type: MessageType::Text,
            attachment: None,
            reply_to: None,
        };
        let json = serde_json::to_value(&evt).unwrap();
        assert_eq!(json["type"], "new_message");
        assert_eq!(json["chat_id"], "c1");
        assert_eq!(json["sender_id"], "user_a");
        assert_eq!(json["message"], "hi");
        assert_eq!(json["message_type"], "text");
        // Minimum fields are always present, even when empty.
        assert!(json.as_object().unwrap().contains_key("attachment"));
        assert!(json.as_object().unwrap().contains_key("reply_to"));
    }

    #[test]
    fn messages_read_wire_shape() {
        let evt = ServerEvent::MessagesRead {
            chat_id: ChatId::from_raw("c1"),
            user_id: UserId::from_raw("user_b"),
            username: "bea".into(),
            updated_count: 3,
            seen_at: Utc::now(),
        };
        let json = serde_json::to_value(&evt).unwrap();
        assert_eq!(json["type"], "messages_read");
        assert_eq!(json["updated_count"], 3);
        assert_eq!(json["username"], "bea");
    }

    #[test]
    fn ping_carries_timestamp() {
        let evt = ServerEvent::Ping { ts: Utc::now() };
        let json = serde_json::to_value(&evt).unwrap();
        assert_eq!(json["type"], "ping");
        assert!(json["ts"].is_string());
    }

    #[test]
    fn event_type_matches_tag() {
        let events = vec![
            ServerEvent::JoinedChat { chat_id: ChatId::from_raw("c1") },
            ServerEvent::Typing {
                chat_id: ChatId::from_raw("c1"),
                user_id: UserId::from_raw("u1"),
                is_typing: true,
            },
            ServerEvent::Error { code: "PERSIST_FAILED".into(), message: "db".into() },
        ];
        for evt in &events {
            let json = serde_json::to_value(evt).unwrap();
            assert_eq!(json["type"], evt.event_type());
        }
    }

    #[test]
    fn serde_roundtrip() {
        let evt = ServerEvent::MessagesDelivered {
            chat_id: ChatId::from_raw("c1"),
            user_id: UserId::from_raw("u1"),
            updated_count: 2,
        };
        let json = serde_json::to_string(&evt).unwrap();
        let parsed: ServerEvent = serde_json::from_str(&json).unwrap();
        let json2 = serde_json::to_string(&parsed).unwrap();
        assert_eq!(json, json2);
    }
}
