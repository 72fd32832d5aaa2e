use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{OrgId, TicketId, UserId};

/// Support ticket lifecycle state. Wire values keep the human-facing
/// capitalization clients already render.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum TicketStatus {
    #[default]
    #[serde(rename = "Open")]
    Open,
    #[serde(rename = "In Progress")]
    InProgress,
    #[serde(rename = "Closed")]
    Closed,
}

impl std::fmt::Display for TicketStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Open => write!(f, "Open"),
            Self::InProgress => write!(f, "In Progress"),
            Self::Closed => write!(f, "Closed"),
        }
    }
}

impl std::str::FromStr for TicketStatus {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Open" => Ok(Self::Open),
            "In Progress" => Ok(Self::InProgress),
            "Closed" => Ok(Self::Closed),
            other => Err(format!("unknown ticket status: {other}")),
        }
    }
}

/// Internal annotation on a ticket, visible to org staff.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TicketNote {
    pub id: String,
    pub author: String,
    pub author_id: UserId,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

/// Attachment reference on a ticket message.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TicketAttachment {
    pub name: String,
    pub url: String,
}

/// One entry in a ticket's communication thread.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TicketMessage {
    pub id: String,
    pub author: String,
    pub author_id: UserId,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attachment: Option<TicketAttachment>,
    pub created_at: DateTime<Utc>,
}

/// A support ticket. CRUD over these is plumbing; what matters here is
/// that every mutation fans out a lifecycle event to the organization.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Ticket {
    pub id: TicketId,
    pub name: String,
    pub body: String,
    pub status: TicketStatus,
    pub organization_id: OrgId,
    pub created_by: UserId,
    pub assigned_to: Option<UserId>,
    pub notes: Vec<TicketNote>,
    pub communication: Vec<TicketMessage>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_wire_values() {
        assert_eq!(
            serde_json::to_string(&TicketStatus::InProgress).unwrap(),
            "\"In Progress\""
        );
        let parsed: TicketStatus = serde_json::from_str("\"Closed\"").unwrap();
        assert_eq!(parsed, TicketStatus::Closed);
    }

    #[test]
    fn status_display_from_str_roundtrip() {
        for s in [TicketStatus::Open, TicketStatus::InProgress, TicketStatus::Closed] {
            let parsed: TicketStatus = s.to_string().parse().unwrap();
            assert_eq!(parsed, s);
        }
        assert!("Resolved".parse::<TicketStatus>().is_err());
    }

    #[test]
    fn ticket_serde_roundtrip() {
        let t = Ticket {
            id: TicketId::from_raw("TKT-001"),
            name: "printer on fire".into(),
            body: "third floor".into(),
            status: TicketStatus::Open,
            organization_id: OrgId::new(),
            created_by: UserId::new(),
            assigned_to: None,
            notes: vec![],
            communication: vec![],
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        let json = serde_json::to_string(&t).unwrap();
        let parsed: Ticket = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.id.as_str(), "TKT-001");
        assert_eq!(parsed.status, TicketStatus::Open);
    }
}
