use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::UserId;

/// Message delivery lifecycle. Ordering matters: a status may only move
/// forward (`sent → delivered → read`); `read` is terminal.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    Sent,
    Delivered,
    Read,
}

impl DeliveryStatus {
    /// Whether moving to `next` is legal. Re-applying the current status is
    /// a no-op, never an error.
    pub fn can_transition_to(self, next: DeliveryStatus) -> bool {
        next >= self
    }

    /// Validate a transition, returning the new status or the rejection.
    pub fn transition_to(self, next: DeliveryStatus) -> Result<DeliveryStatus, InvalidTransition> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(InvalidTransition { from: self, to: next })
        }
    }
}

impl std::fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sent => write!(f, "sent"),
            Self::Delivered => write!(f, "delivered"),
            Self::Read => write!(f, "read"),
        }
    }
}

impl std::str::FromStr for DeliveryStatus {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sent" => Ok(Self::Sent),
            "delivered" => Ok(Self::Delivered),
            "read" => Ok(Self::Read),
            other => Err(format!("unknown delivery status: {other}")),
        }
    }
}

/// A regressive status change that was rejected.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("invalid status transition: {from} -> {to}")]
pub struct InvalidTransition {
    pub from: DeliveryStatus,
    pub to: DeliveryStatus,
}

/// One reader's receipt in a message's seen ledger.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SeenEntry {
    pub user_id: UserId,
    pub username: String,
    pub seen_at: DateTime<Utc>,
}

/// Append a reader to the ledger unless already present (set union keyed by
/// user id). Returns whether an entry was added. Entries are never removed
/// or overwritten, so the ledger grows monotonically per message.
pub fn record_seen(ledger: &mut Vec<SeenEntry>, entry: SeenEntry) -> bool {
    if ledger.iter().any(|e| e.user_id == entry.user_id) {
        return false;
    }
    ledger.push(entry);
    true
}
