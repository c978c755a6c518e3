/// Database row types for all tables.
/// These correspond 1:1 to the SQLite schema defined in migrations.rs.
/// Timestamps are stored as RFC 3339 text, written by the application.
use serde::{Deserialize, Serialize};

/// User record in the users table.
/// Profile management lives elsewhere — this server only needs identities
/// to exist so messages, calls, and notifications can reference them.
#[derive(Debug, Clone)]
pub struct UserRow {
    pub id: i64,
    pub display_name: String,
    pub avatar_url: Option<String>,
    pub created_at: String,
}

/// Direct message between two users.
#[derive(Debug, Clone)]
pub struct MessageRow {
    pub id: i64,
    pub sender_id: i64,
    pub receiver_id: i64,
    pub content: Option<String>,
    pub message_type: MessageType,
    pub sent_at: String,
    pub is_read: bool,
    pub is_revoked: bool,
    pub is_deleted_for_sender: bool,
    pub is_deleted_for_receiver: bool,
}

/// One reaction per (message, user); re-reacting replaces the emoji.
#[derive(Debug, Clone)]
pub struct ReactionRow {
    pub id: i64,
    pub message_id: i64,
    pub user_id: i64,
    pub emoji: String,
    pub created_at: String,
}

/// Messaging block. Direction matters: blocker_id created the block,
/// but sends are rejected in both directions while a row exists.
#[derive(Debug, Clone)]
pub struct BlockRow {
    pub id: i64,
    pub blocker_id: i64,
    pub blocked_id: i64,
    pub created_at: String,
}

/// Call record. `status` starts at `ongoing` and receives exactly one
/// terminal write. `message_id` links the summary message written on end.
#[derive(Debug, Clone)]
pub struct CallRow {
    pub id: i64,
    pub caller_id: i64,
    pub receiver_id: i64,
    pub call_type: CallType,
    pub status: CallStatus,
    pub started_at: String,
    pub ended_at: Option<String>,
    pub message_id: Option<i64>,
}

/// Notification row. `user_id` NULL means a global notification.
#[derive(Debug, Clone)]
pub struct NotificationRow {
    pub id: i64,
    pub user_id: Option<i64>,
    pub message: String,
    pub url: Option<String>,
    pub is_read: bool,
    pub created_at: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    Text,
    Call,
}

impl MessageType {
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "text" => Some(Self::Text),
            "call" => Some(Self::Call),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Call => "call",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallType {
    Audio,
    Video,
}

impl CallType {
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "audio" => Some(Self::Audio),
            "video" => Some(Self::Video),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Audio => "audio",
            Self::Video => "video",
        }
    }
}

/// Call lifecycle states. `Ongoing` is the only non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallStatus {
    Ongoing,
    Ended,
    Missed,
    Rejected,
    Cancelled,
    Busy,
}

impl CallStatus {
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "ongoing" => Some(Self::Ongoing),
            "ended" => Some(Self::Ended),
            "missed" => Some(Self::Missed),
            "rejected" => Some(Self::Rejected),
            "cancelled" => Some(Self::Cancelled),
            "busy" => Some(Self::Busy),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ongoing => "ongoing",
            Self::Ended => "ended",
            Self::Missed => "missed",
            Self::Rejected => "rejected",
            Self::Cancelled => "cancelled",
            Self::Busy => "busy",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Ongoing)
    }
}
