use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::delivery::{DeliveryStatus, SeenEntry};
use crate::ids::{ChatId, MessageId, UserId};

/// Payload kind of a chat message.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    #[default]
    Text,
    Image,
    File,
}

impl std::fmt::Display for MessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Text => write!(f, "text"),
            Self::Image => write!(f, "image"),
            Self::File => write!(f, "file"),
        }
    }
}

impl std::str::FromStr for MessageType {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text" => Ok(Self::Text),
            "image" => Ok(Self::Image),
            "file" => Ok(Self::File),
            other => Err(format!("unknown message type: {other}")),
        }
    }
}

/// Uploaded file metadata attached to a message. The file bytes live with
/// the upload storage collaborator; only this descriptor travels on the wire.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Attachment {
    pub file_id: String,
    pub filename: String,
    /// "image" or "document"
    pub file_type: String,
    pub file_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thumbnail_url: Option<String>,
    pub size: u64,
}

/// A persisted chat message with its delivery lifecycle state.
///
/// `status` is a broadcast-level flag: it flips to `read` as soon as any
/// non-sender participant reads the message. `seen_by` is the per-reader
/// ledger and keeps growing independently in group chats.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: MessageId,
    pub chat_id: ChatId,
    pub sender_id: UserId,
    #[serde(rename = "message")]
    pub body: String,
    pub message_type: MessageType,
    pub attachment: Option<Attachment>,
    pub reply_to: Option<MessageId>,
    pub status: DeliveryStatus,
    /// Timestamp of the first read, never overwritten by later readers.
    pub seen_at: Option<DateTime<Utc>>,
    pub seen_by: Vec<SeenEntry>,
    pub timestamp: DateTime<Utc>,
}
