use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{ChatId, MessageId};
use crate::message::{Attachment, MessageType};

/// Inbound frames decoded off a client's WebSocket. One JSON object per
/// text frame, discriminated by `type`.
///
/// Unrecognized types decode to [`ClientFrame::Unknown`] by design:
/// forward-incompatible clients must not tear down the connection, so the
/// fallback is a variant to log and ignore, not a decode error.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    JoinChat {
        chat_id: ChatId,
    },
    LeaveChat {
        chat_id: ChatId,
    },
    Typing {
        chat_id: ChatId,
        #[serde(default)]
        is_typing: bool,
    },
    Message {
        chat_id: ChatId,
        message: String,
        #[serde(default)]
        timestamp: Option<DateTime<Utc>>,
        #[serde(default)]
        message_type: MessageType,
        #[serde(default)]
        attachment: Option<Attachment>,
        #[serde(default)]
        reply_to: Option<MessageId>,
    },
    MarkDelivered {
        chat_id: ChatId,
    },
    MarkRead {
        chat_id: ChatId,
    },
    /// Liveness acknowledgement for a server `ping`.
    Pong,
    #[serde(other)]
    Unknown,
}

impl ClientFrame {
    pub fn frame_type(&self) -> &'static str {
        match self {
            Self::JoinChat { .. } => "join_chat",
            Self::LeaveChat { .. } => "leave_chat",
            Self::Typing { .. } => "typing",
            Self::Message { .. } => "message",
            Self::MarkDelivered { .. } => "mark_delivered",
            Self::MarkRead { .. } => "mark_read",
            Self::Pong => "pong",
            Self::Unknown => "unknown",
        }
    }
}
