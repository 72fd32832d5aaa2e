use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{ChatId, OrgId, UserId};

/// Whether a chat is a one-to-one conversation or a group.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatKind {
    Direct,
    Group,
}

impl std::fmt::Display for ChatKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Direct => write!(f, "direct"),
            Self::Group => write!(f, "group"),
        }
    }
}

impl std::str::FromStr for ChatKind {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "direct" => Ok(Self::Direct),
            "group" => Ok(Self::Group),
            other => Err(format!("unknown chat kind: {other}")),
        }
    }
}

/// A persisted chat. `participants` is the durable membership list, distinct
/// from the ephemeral room subscriptions tracked by the live room index.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Chat {
    pub id: ChatId,
    pub kind: ChatKind,
    /// Display name; groups usually have one, direct chats usually don't.
    pub name: Option<String>,
    pub participants: Vec<UserId>,
    pub organization_id: OrgId,
    pub last_message: Option<String>,
    pub created_at: DateTime<Utc>,
}
